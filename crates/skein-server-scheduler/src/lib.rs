// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Task scheduler for Skein server.
//!
//! Decides when registered tasks are due, enforces per-task concurrency,
//! and runs each run through its attempt/retry state machine against a
//! [`skein_sched_core::ContainerLauncher`], with optional SQLite
//! persistence of run records and schedule watermarks.

pub mod config;
mod execution;
pub mod health;
pub mod poll_loop;
pub mod repository;
pub mod scheduler;
pub mod slots;

pub use config::SchedulerConfig;
pub use health::{HealthState, LastRunInfo, SchedulerHealthStatus, TaskHealthStatus};
pub use poll_loop::run_poll_loop;
pub use repository::{create_pool, RepositoryError, RunRepository};
pub use scheduler::Scheduler;
pub use slots::{RunIntent, SlotSnapshot, TriggerKind};
