// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! One run, from queued to terminal.
//!
//! An execution owns its task's concurrency reservation for its whole
//! lifetime, including teardown and retry backoff. Every launched
//! container is torn down exactly once, whether the attempt succeeded,
//! failed, timed out or was cancelled. Notifications are delivered on
//! their own tasks and never hold the reservation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use skein_sched_core::{
	AttemptOutcome, ExecutionStatus, ExitInfo, FailureReason, LaunchError, LaunchHandle, LaunchRequest,
	NotificationContext, NotificationEvent, NotificationKind, RetryDecision, RunId, RunRecord, RunState,
	TaskSpec, TeardownError,
};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::scheduler::{Inner, RunCell};
use crate::slots::{Reservation, TriggerKind};

/// How watching an attempt ended.
enum Watch {
	Succeeded,
	Failed(FailureReason),
	Cancelled,
}

pub(crate) struct Execution {
	pub(crate) inner: Arc<Inner>,
	pub(crate) cell: Arc<RunCell>,
	pub(crate) run_id: RunId,
	pub(crate) spec: Arc<TaskSpec>,
	pub(crate) trigger: TriggerKind,
	pub(crate) _reservation: Reservation,
}

impl Execution {
	#[instrument(name = "execution", skip_all, fields(task = %self.spec.name, run_id = %self.run_id))]
	pub(crate) async fn run(self) {
		let queued = self.cell.record.lock().clone();
		self.inner.persist(&queued).await;

		if self.trigger == TriggerKind::Schedule {
			if let Some(repository) = &self.inner.repository {
				if let Err(e) = repository
					.save_watermark(&self.spec.name, queued.scheduled_at)
					.await
				{
					warn!(error = %e, "Failed to persist task watermark");
				}
			}
		}

		let policy = self.spec.retry_policy(self.inner.config.retry);

		loop {
			let Some(running) = self.commit(RunState::Running, None) else {
				return;
			};
			self.inner.persist(&running).await;
			let attempt = running.attempt;

			let request = LaunchRequest::for_attempt(&self.spec, &self.run_id, attempt);
			let Some(launched) = self.launch(request).await else {
				// cancel() already committed the terminal state
				return;
			};
			let (watched, teardown_error) = match launched {
				Ok(handle) => {
					info!(attempt, handle = %handle, image = %self.spec.image, "Container launched");
					let handle_text = handle.to_string();
					self.annotate(|record| record.set_handle(&handle_text));

					let watched = self.watch(&handle, attempt).await;
					let teardown_error = teardown(&self.inner, &handle).await.err();
					(watched, teardown_error)
				}
				Err(e) => {
					warn!(attempt, error = %e, "Container launch failed");
					(Watch::Failed(FailureReason::Launch(e.to_string())), None)
				}
			};

			if let Some(e) = &teardown_error {
				error!(attempt, error = %e, "Container teardown failed, manual cleanup required");
				let message = e.to_string();
				let annotated = self.annotate(|record| record.teardown_error = Some(message));
				self.inner.persist(&annotated).await;
			}

			let reason = match watched {
				// cancel() already committed the terminal state
				Watch::Cancelled => return,
				Watch::Succeeded => {
					if let Some(done) = self.commit(RunState::Succeeded, Some(AttemptOutcome::Succeeded)) {
						self.inner.persist(&done).await;
						info!(attempt, duration_ms = ?done.duration_ms(), "Run succeeded");
					}
					return;
				}
				Watch::Failed(reason) => reason,
			};

			let Some(failed) = self.commit(
				RunState::Failed,
				Some(AttemptOutcome::Failed(reason.clone())),
			) else {
				return;
			};
			self.inner.persist(&failed).await;

			// A container we could not remove must not be joined by another.
			let decision = if teardown_error.is_some() {
				RetryDecision::GiveUp
			} else {
				policy.should_retry(attempt, self.spec.max_retries, &reason)
			};

			match decision {
				RetryDecision::Retry { backoff } => {
					let Some(retrying) = self.commit(RunState::Retrying, None) else {
						return;
					};
					self.inner.persist(&retrying).await;
					warn!(
						attempt,
						max_retries = self.spec.max_retries,
						backoff_ms = backoff.as_millis() as u64,
						reason = %reason,
						"Attempt failed, retrying"
					);

					if self.spec.notify.on_retry {
						self.notify(NotificationKind::OnRetry, &retrying, Some(backoff));
					}

					tokio::select! {
						_ = self.cell.cancel.cancelled() => return,
						_ = tokio::time::sleep(backoff) => {}
					}
				}
				RetryDecision::GiveUp => {
					let Some(terminal) = self.commit(RunState::TerminalFailed, None) else {
						return;
					};
					self.inner.persist(&terminal).await;
					warn!(attempt, reason = %reason, "Run failed");

					if self.spec.notify.on_failure {
						self.notify(NotificationKind::OnFailure, &terminal, None);
					}
					return;
				}
			}
		}
	}

	/// Apply a transition if the record still allows it. Returns `None`
	/// when the run moved on without us, which only cancellation does.
	fn commit(&self, to: RunState, outcome: Option<AttemptOutcome>) -> Option<RunRecord> {
		let mut record = self.cell.record.lock();
		if !record.state.can_transition_to(to) {
			debug!(from = %record.state, to = %to, "Transition skipped");
			return None;
		}
		let now = Utc::now();
		if let Some(outcome) = outcome {
			record.finish_attempt(outcome, now);
		}
		record.transition(to, now).ok()?;
		Some(record.clone())
	}

	fn annotate(&self, f: impl FnOnce(&mut RunRecord)) -> RunRecord {
		let mut record = self.cell.record.lock();
		f(&mut record);
		record.clone()
	}

	/// Start the container unless the run is cancelled first. A launch
	/// that is already under way when the run is cancelled finishes on the
	/// tracker, and whatever it started is torn down there.
	async fn launch(&self, request: LaunchRequest) -> Option<Result<LaunchHandle, LaunchError>> {
		if self.cell.cancel.is_cancelled() {
			return None;
		}

		let launcher = self.inner.launcher.clone();
		let mut launch = Box::pin(async move { launcher.launch(&request).await });
		tokio::select! {
			biased;
			result = &mut launch => return Some(result),
			_ = self.cell.cancel.cancelled() => {}
		}

		let inner = self.inner.clone();
		self.inner.tracker.spawn(
			async move {
				if let Ok(handle) = launch.await {
					info!(handle = %handle, "Removing container launched after cancellation");
					if let Err(e) = teardown(&inner, &handle).await {
						error!(handle = %handle, error = %e, "Container teardown failed, manual cleanup required");
					}
				}
			}
			.in_current_span(),
		);
		None
	}

	async fn watch(&self, handle: &LaunchHandle, attempt: u32) -> Watch {
		let config = &self.inner.config;
		let deadline = self.spec.execution_timeout().map(|timeout| Instant::now() + timeout);
		let max_errors = config.max_status_errors.max(1);
		let mut errors = 0u32;

		loop {
			let status = tokio::select! {
				_ = self.cell.cancel.cancelled() => return Watch::Cancelled,
				_ = until(deadline) => return timed_out(attempt),
				status = self.inner.launcher.poll_status(handle) => status,
			};

			match status {
				Ok(ExecutionStatus::Succeeded) => return Watch::Succeeded,
				Ok(ExecutionStatus::Failed(exit)) => return Watch::Failed(exit_reason(exit)),
				Ok(ExecutionStatus::Pending | ExecutionStatus::Running) => errors = 0,
				Err(LaunchError::NotFound(message)) => {
					warn!(attempt, handle = %handle, "Container disappeared");
					return Watch::Failed(FailureReason::StatusUnavailable(format!(
						"container not found: {message}"
					)));
				}
				Err(e) => {
					errors += 1;
					warn!(attempt, errors, error = %e, "Status check failed");
					if errors >= max_errors {
						return Watch::Failed(FailureReason::StatusUnavailable(e.to_string()));
					}
				}
			}

			tokio::select! {
				_ = self.cell.cancel.cancelled() => return Watch::Cancelled,
				_ = until(deadline) => return timed_out(attempt),
				_ = tokio::time::sleep(config.status_poll_interval) => {}
			}
		}
	}

	/// Hand a notification to the notifier on its own task, bounded by the
	/// notify timeout. Neither a slow nor a panicking notifier affects the
	/// run or delays its next step.
	fn notify(&self, kind: NotificationKind, record: &RunRecord, backoff: Option<Duration>) {
		let event = NotificationEvent {
			task_name: record.task_name.clone(),
			run_id: record.run_id.clone(),
			kind,
			context: NotificationContext {
				attempt: record.attempt,
				max_retries: self.spec.max_retries,
				scheduled_at: record.scheduled_at,
				failure_reason: record.failure_reason.clone(),
				owner: self.spec.owner.clone(),
				email: self.spec.email.clone(),
				next_backoff_ms: backoff.map(|backoff| backoff.as_millis() as u64),
			},
		};

		let notifier = self.inner.notifier.clone();
		let limit = self.inner.config.notify_timeout;
		self.inner.tracker.spawn(
			async move {
				let mut delivery = tokio::spawn(async move { notifier.notify(event).await });
				match tokio::time::timeout(limit, &mut delivery).await {
					Ok(Ok(())) => debug!(kind = %kind, "Notification delivered"),
					Ok(Err(e)) => warn!(kind = %kind, error = %e, "Notifier failed"),
					Err(_) => {
						delivery.abort();
						warn!(kind = %kind, "Notifier timed out");
					}
				}
			}
			.in_current_span(),
		);
	}
}

/// Remove the container. Transient errors are retried with a linear
/// backoff; this is not interrupted by cancellation.
async fn teardown(inner: &Inner, handle: &LaunchHandle) -> Result<(), TeardownError> {
	let config = &inner.config;
	let max_tries = config.teardown_attempts.max(1);
	let mut tries = 0u32;

	loop {
		tries += 1;
		match inner.launcher.terminate(handle).await {
			Ok(()) => {
				debug!(handle = %handle, tries, "Container torn down");
				return Ok(());
			}
			Err(e) if e.is_transient() && tries < max_tries => {
				warn!(handle = %handle, tries, error = %e, "Teardown failed, retrying");
				tokio::time::sleep(config.teardown_backoff * tries).await;
			}
			Err(e) => return Err(e),
		}
	}
}

/// Resolves at `deadline`, or never when there is none.
async fn until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending::<()>().await,
	}
}

fn timed_out(attempt: u32) -> Watch {
	warn!(attempt, "Execution timeout reached");
	Watch::Failed(FailureReason::Timeout)
}

fn exit_reason(exit: ExitInfo) -> FailureReason {
	let message = match (exit.reason, exit.message) {
		(Some(reason), Some(message)) => Some(format!("{reason}: {message}")),
		(reason, message) => reason.or(message),
	};
	FailureReason::ExitStatus {
		exit_code: exit.exit_code,
		message,
	}
}
