// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Skein task scheduler.
//!
//! This crate holds the pure parts of the system: task declarations,
//! schedule expressions, the run state machine's states, the retry policy,
//! and the capability traits (`ContainerLauncher`, `Notifier`) that the
//! scheduler drives. Nothing here performs I/O.

pub mod error;
pub mod launcher;
pub mod notifier;
pub mod retry;
pub mod run;
pub mod schedule;
pub mod task;

pub use error::{Result, SchedError};
pub use launcher::{
	ContainerLauncher, ExecutionStatus, ExitInfo, LaunchError, LaunchHandle, LaunchRequest, TeardownError,
};
pub use notifier::{NotificationContext, NotificationEvent, NotificationKind, Notifier};
pub use retry::{RetryDecision, RetryPolicy};
pub use run::{AttemptOutcome, AttemptRecord, FailureReason, RunId, RunRecord, RunState, TransitionError};
pub use schedule::{next_fire_after, parse_timezone, validate_schedule, Schedule};
pub use task::{validate_name, NotificationPolicy, TaskSpec, MAX_TASK_NAME_LEN};
