// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Notification delivery capability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::{FailureReason, RunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
	OnFailure,
	OnRetry,
}

impl NotificationKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			NotificationKind::OnFailure => "on_failure",
			NotificationKind::OnRetry => "on_retry",
		}
	}
}

impl std::fmt::Display for NotificationKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for NotificationKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"on_failure" => Ok(NotificationKind::OnFailure),
			"on_retry" => Ok(NotificationKind::OnRetry),
			_ => Err(format!("unknown notification kind: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContext {
	pub attempt: u32,
	pub max_retries: u32,
	pub scheduled_at: DateTime<Utc>,
	pub failure_reason: Option<FailureReason>,
	pub owner: Option<String>,
	pub email: Vec<String>,
	/// Delay before the next attempt (retry notifications only).
	pub next_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
	pub task_name: String,
	pub run_id: RunId,
	pub kind: NotificationKind,
	pub context: NotificationContext,
}

/// Delivers run notifications. Implementations must not panic; the
/// scheduler ignores how delivery went.
#[async_trait]
pub trait Notifier: Send + Sync {
	async fn notify(&self, event: NotificationEvent);
}
