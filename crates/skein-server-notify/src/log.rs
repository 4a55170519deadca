// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use skein_sched_core::{NotificationEvent, NotificationKind, Notifier};

/// Emits every notification as a structured log record.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
	async fn notify(&self, event: NotificationEvent) {
		let reason = event
			.context
			.failure_reason
			.as_ref()
			.map(ToString::to_string)
			.unwrap_or_default();

		match event.kind {
			NotificationKind::OnFailure => tracing::warn!(
				task = %event.task_name,
				run_id = %event.run_id,
				attempt = event.context.attempt,
				max_retries = event.context.max_retries,
				owner = ?event.context.owner,
				email = ?event.context.email,
				reason = %reason,
				"Run failed"
			),
			NotificationKind::OnRetry => tracing::info!(
				task = %event.task_name,
				run_id = %event.run_id,
				attempt = event.context.attempt,
				max_retries = event.context.max_retries,
				next_backoff_ms = ?event.context.next_backoff_ms,
				reason = %reason,
				"Run will be retried"
			),
		}
	}
}

/// Hands every notification to each inner notifier in order.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
	notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
	pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
		Self { notifiers }
	}

	pub fn push(&mut self, notifier: Arc<dyn Notifier>) {
		self.notifiers.push(notifier);
	}

	pub fn len(&self) -> usize {
		self.notifiers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.notifiers.is_empty()
	}
}

#[async_trait]
impl Notifier for FanoutNotifier {
	async fn notify(&self, event: NotificationEvent) {
		for notifier in &self.notifiers {
			notifier.notify(event.clone()).await;
		}
	}
}
