// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Run records and the execution state machine's states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a run, using UUID7 (time-ordered).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(uuid7::Uuid);

impl RunId {
	pub fn new() -> Self {
		Self(uuid7::uuid7())
	}

	/// Last 12 hex characters (the random tail of the UUID7), for
	/// names that must stay short.
	pub fn short(&self) -> String {
		let simple: String = self.0.to_string().chars().filter(|c| *c != '-').collect();
		simple[simple.len().saturating_sub(12)..].to_string()
	}
}

impl Default for RunId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for RunId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for RunId {
	type Err = uuid7::ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(s.parse::<uuid7::Uuid>()?))
	}
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
	Queued,
	Running,
	Succeeded,
	Failed,
	Retrying,
	TerminalFailed,
}

impl RunState {
	pub fn as_str(&self) -> &'static str {
		match self {
			RunState::Queued => "queued",
			RunState::Running => "running",
			RunState::Succeeded => "succeeded",
			RunState::Failed => "failed",
			RunState::Retrying => "retrying",
			RunState::TerminalFailed => "terminal_failed",
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, RunState::Succeeded | RunState::TerminalFailed)
	}

	/// Legal edges of the state machine. Cancellation may move any
	/// non-terminal state straight to `TerminalFailed`.
	pub fn can_transition_to(&self, next: RunState) -> bool {
		use RunState::*;
		matches!(
			(self, next),
			(Queued, Running)
				| (Running, Succeeded)
				| (Running, Failed)
				| (Failed, Retrying)
				| (Failed, TerminalFailed)
				| (Retrying, Running)
				| (Queued, TerminalFailed)
				| (Running, TerminalFailed)
				| (Retrying, TerminalFailed)
		)
	}
}

impl std::fmt::Display for RunState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for RunState {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"queued" => Ok(RunState::Queued),
			"running" => Ok(RunState::Running),
			"succeeded" => Ok(RunState::Succeeded),
			"failed" => Ok(RunState::Failed),
			"retrying" => Ok(RunState::Retrying),
			"terminal_failed" => Ok(RunState::TerminalFailed),
			_ => Err(format!("unknown run state: {s}")),
		}
	}
}

/// Why an attempt or a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
	/// The launcher refused or failed to start the container.
	Launch(String),
	/// The container exited unsuccessfully.
	ExitStatus {
		exit_code: Option<i32>,
		message: Option<String>,
	},
	/// The attempt ran longer than the task's execution timeout.
	Timeout,
	/// The launcher stopped answering status polls.
	StatusUnavailable(String),
	/// The run was cancelled by an operator.
	Cancelled,
}

impl std::fmt::Display for FailureReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			FailureReason::Launch(msg) => write!(f, "launch failed: {msg}"),
			FailureReason::ExitStatus { exit_code, message } => {
				match exit_code {
					Some(code) => write!(f, "exited with code {code}")?,
					None => write!(f, "container failed")?,
				}
				if let Some(message) = message {
					write!(f, ": {message}")?;
				}
				Ok(())
			}
			FailureReason::Timeout => write!(f, "execution timed out"),
			FailureReason::StatusUnavailable(msg) => write!(f, "status unavailable: {msg}"),
			FailureReason::Cancelled => write!(f, "cancelled"),
		}
	}
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
	Succeeded,
	Failed(FailureReason),
}

/// History entry for one attempt of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
	pub attempt: u32,
	pub started_at: DateTime<Utc>,
	pub ended_at: Option<DateTime<Utc>>,
	/// Container handle id, when the launch was accepted.
	pub handle: Option<String>,
	pub outcome: Option<AttemptOutcome>,
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
	pub from: RunState,
	pub to: RunState,
}

/// One execution of a task at a scheduled instant, across all its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
	pub run_id: RunId,
	pub task_name: String,
	pub scheduled_at: DateTime<Utc>,
	pub attempt: u32,
	pub state: RunState,
	pub queued_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub ended_at: Option<DateTime<Utc>>,
	pub failure_reason: Option<FailureReason>,
	pub teardown_error: Option<String>,
	pub attempts: Vec<AttemptRecord>,
}

impl RunRecord {
	/// A fresh record in `queued`, attempt 1.
	pub fn queued(task_name: &str, scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
		Self {
			run_id: RunId::new(),
			task_name: task_name.to_string(),
			scheduled_at,
			attempt: 1,
			state: RunState::Queued,
			queued_at: now,
			started_at: None,
			ended_at: None,
			failure_reason: None,
			teardown_error: None,
			attempts: Vec::new(),
		}
	}

	pub fn is_terminal(&self) -> bool {
		self.state.is_terminal()
	}

	/// Apply a state change, stamping the bookkeeping fields that go with it.
	pub fn transition(&mut self, to: RunState, now: DateTime<Utc>) -> Result<(), TransitionError> {
		if !self.state.can_transition_to(to) {
			return Err(TransitionError {
				from: self.state,
				to,
			});
		}

		match to {
			RunState::Running => {
				if self.state == RunState::Retrying {
					self.attempt += 1;
				}
				self.started_at.get_or_insert(now);
				self.attempts.push(AttemptRecord {
					attempt: self.attempt,
					started_at: now,
					ended_at: None,
					handle: None,
					outcome: None,
				});
			}
			RunState::Succeeded | RunState::TerminalFailed => {
				self.ended_at = Some(now);
			}
			_ => {}
		}

		self.state = to;
		Ok(())
	}

	/// Close the current attempt's history entry.
	pub fn finish_attempt(&mut self, outcome: AttemptOutcome, now: DateTime<Utc>) {
		if let AttemptOutcome::Failed(reason) = &outcome {
			self.failure_reason = Some(reason.clone());
		}
		if let Some(current) = self.attempts.last_mut() {
			if current.outcome.is_none() {
				current.ended_at = Some(now);
				current.outcome = Some(outcome);
			}
		}
	}

	/// Record the container handle for the current attempt.
	pub fn set_handle(&mut self, handle: &str) {
		if let Some(current) = self.attempts.last_mut() {
			current.handle = Some(handle.to_string());
		}
	}

	/// Duration from first start to end, in milliseconds.
	pub fn duration_ms(&self) -> Option<i64> {
		match (self.started_at, self.ended_at) {
			(Some(start), Some(end)) => Some((end - start).num_milliseconds()),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn t(secs: i64) -> DateTime<Utc> {
		Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
	}

	#[test]
	fn test_happy_path() {
		let mut run = RunRecord::queued("t1", t(0), t(0));
		run.transition(RunState::Running, t(1)).unwrap();
		run.finish_attempt(AttemptOutcome::Succeeded, t(5));
		run.transition(RunState::Succeeded, t(5)).unwrap();

		assert!(run.is_terminal());
		assert_eq!(run.attempt, 1);
		assert_eq!(run.started_at, Some(t(1)));
		assert_eq!(run.ended_at, Some(t(5)));
		assert_eq!(run.duration_ms(), Some(4000));
		assert_eq!(run.attempts.len(), 1);
		assert_eq!(run.failure_reason, None);
	}

	#[test]
	fn test_retry_loop_increments_attempt() {
		let mut run = RunRecord::queued("t1", t(0), t(0));
		run.transition(RunState::Running, t(1)).unwrap();
		run.finish_attempt(AttemptOutcome::Failed(FailureReason::Timeout), t(2));
		run.transition(RunState::Failed, t(2)).unwrap();
		run.transition(RunState::Retrying, t(2)).unwrap();
		run.transition(RunState::Running, t(3)).unwrap();

		assert_eq!(run.attempt, 2);
		assert_eq!(run.started_at, Some(t(1)));
		let numbers: Vec<u32> = run.attempts.iter().map(|a| a.attempt).collect();
		assert_eq!(numbers, vec![1, 2]);
		assert_eq!(run.failure_reason, Some(FailureReason::Timeout));
	}

	#[test]
	fn test_terminal_states_reject_everything() {
		for terminal in [RunState::Succeeded, RunState::TerminalFailed] {
			for next in [
				RunState::Queued,
				RunState::Running,
				RunState::Succeeded,
				RunState::Failed,
				RunState::Retrying,
				RunState::TerminalFailed,
			] {
				assert!(!terminal.can_transition_to(next));
			}
		}
	}

	#[test]
	fn test_illegal_transition_is_reported() {
		let mut run = RunRecord::queued("t1", t(0), t(0));
		let err = run.transition(RunState::Succeeded, t(1)).unwrap_err();
		assert_eq!(err.from, RunState::Queued);
		assert_eq!(err.to, RunState::Succeeded);
		assert_eq!(run.state, RunState::Queued);
	}

	#[test]
	fn test_cancel_from_any_live_state() {
		for live in [RunState::Queued, RunState::Running, RunState::Retrying] {
			assert!(live.can_transition_to(RunState::TerminalFailed));
		}
		assert!(!RunState::Queued.can_transition_to(RunState::Failed));
	}

	#[test]
	fn test_state_string_roundtrip() {
		for state in [
			RunState::Queued,
			RunState::Running,
			RunState::Succeeded,
			RunState::Failed,
			RunState::Retrying,
			RunState::TerminalFailed,
		] {
			assert_eq!(state.as_str().parse::<RunState>().unwrap(), state);
		}
		assert!("paused".parse::<RunState>().is_err());
	}

	#[test]
	fn test_run_id_short_is_12_hex_chars() {
		let id = RunId::new();
		let short = id.short();
		assert_eq!(short.len(), 12);
		assert!(short.chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn test_failure_reason_display() {
		let reason = FailureReason::ExitStatus {
			exit_code: Some(137),
			message: Some("OOMKilled".to_string()),
		};
		assert_eq!(reason.to_string(), "exited with code 137: OOMKilled");
		assert_eq!(FailureReason::Timeout.to_string(), "execution timed out");
	}

	#[test]
	fn test_failure_reason_serializes_tagged() {
		let json = serde_json::to_string(&FailureReason::Launch("boom".into())).unwrap();
		assert_eq!(json, r#"{"kind":"launch","detail":"boom"}"#);
		let back: FailureReason = serde_json::from_str(&json).unwrap();
		assert_eq!(back, FailureReason::Launch("boom".into()));
	}
}
