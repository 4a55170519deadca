// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for task registration and scheduling.

use thiserror::Error;

/// Result type for scheduling operations.
pub type Result<T> = std::result::Result<T, SchedError>;

/// Errors surfaced at the scheduler boundary.
///
/// Failures inside a run never show up here; they are recorded on the
/// run itself as state plus [`crate::FailureReason`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedError {
	#[error("invalid schedule expression '{expression}': {reason}")]
	InvalidScheduleExpression { expression: String, reason: String },

	#[error("invalid timezone: {0}")]
	InvalidTimezone(String),

	#[error("invalid task spec '{name}': {reason}")]
	InvalidTaskSpec { name: String, reason: String },

	#[error("task '{name}' is already registered by owner {existing:?} (got {requested:?})")]
	DuplicateNameConflict {
		name: String,
		existing: Option<String>,
		requested: Option<String>,
	},

	#[error("task not found: {0}")]
	TaskNotFound(String),

	#[error("task '{name}' is at its concurrency limit ({limit} active)")]
	ConcurrencyLimit { name: String, limit: u32 },
}

impl SchedError {
	pub(crate) fn invalid_schedule(expression: &str, reason: impl Into<String>) -> Self {
		SchedError::InvalidScheduleExpression {
			expression: expression.to_string(),
			reason: reason.into(),
		}
	}

	pub(crate) fn invalid_spec(name: &str, reason: impl Into<String>) -> Self {
		SchedError::InvalidTaskSpec {
			name: name.to_string(),
			reason: reason.into(),
		}
	}
}
