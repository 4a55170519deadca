// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod database;
mod launcher;
mod logging;
mod notify;
mod retry;
mod scheduler;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use launcher::{LauncherConfig, LauncherConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
pub use notify::{NotifyConfig, NotifyConfigLayer};
pub use retry::{RetryConfig, RetryConfigLayer};
pub use scheduler::{SchedulerConfig, SchedulerConfigLayer};
