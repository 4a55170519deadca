// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scheduler configuration section.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_STATUS_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_RUN_RETENTION_HOURS: u64 = 168;
const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 300;
const DEFAULT_NOTIFY_TIMEOUT_MS: u64 = 5000;
const DEFAULT_MAX_STATUS_ERRORS: u32 = 5;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

fn default_tasks_path() -> PathBuf {
	PathBuf::from("/etc/skein/tasks")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfigLayer {
	pub poll_interval_ms: Option<u64>,
	pub status_poll_interval_ms: Option<u64>,
	pub run_retention_hours: Option<u64>,
	pub prune_interval_secs: Option<u64>,
	pub notify_timeout_ms: Option<u64>,
	pub max_status_errors: Option<u32>,
	pub shutdown_grace_secs: Option<u64>,
	pub tasks_path: Option<PathBuf>,
}

impl SchedulerConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.poll_interval_ms.is_some() {
			self.poll_interval_ms = other.poll_interval_ms;
		}
		if other.status_poll_interval_ms.is_some() {
			self.status_poll_interval_ms = other.status_poll_interval_ms;
		}
		if other.run_retention_hours.is_some() {
			self.run_retention_hours = other.run_retention_hours;
		}
		if other.prune_interval_secs.is_some() {
			self.prune_interval_secs = other.prune_interval_secs;
		}
		if other.notify_timeout_ms.is_some() {
			self.notify_timeout_ms = other.notify_timeout_ms;
		}
		if other.max_status_errors.is_some() {
			self.max_status_errors = other.max_status_errors;
		}
		if other.shutdown_grace_secs.is_some() {
			self.shutdown_grace_secs = other.shutdown_grace_secs;
		}
		if other.tasks_path.is_some() {
			self.tasks_path = other.tasks_path;
		}
	}

	pub fn finalize(self) -> SchedulerConfig {
		SchedulerConfig {
			poll_interval_ms: self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
			status_poll_interval_ms: self
				.status_poll_interval_ms
				.unwrap_or(DEFAULT_STATUS_POLL_INTERVAL_MS),
			run_retention_hours: self.run_retention_hours.unwrap_or(DEFAULT_RUN_RETENTION_HOURS),
			prune_interval_secs: self.prune_interval_secs.unwrap_or(DEFAULT_PRUNE_INTERVAL_SECS),
			notify_timeout_ms: self.notify_timeout_ms.unwrap_or(DEFAULT_NOTIFY_TIMEOUT_MS),
			max_status_errors: self.max_status_errors.unwrap_or(DEFAULT_MAX_STATUS_ERRORS),
			shutdown_grace_secs: self.shutdown_grace_secs.unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
			tasks_path: self.tasks_path.unwrap_or_else(default_tasks_path),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
	pub poll_interval_ms: u64,
	pub status_poll_interval_ms: u64,
	pub run_retention_hours: u64,
	pub prune_interval_secs: u64,
	pub notify_timeout_ms: u64,
	pub max_status_errors: u32,
	pub shutdown_grace_secs: u64,
	/// Task definition file, or a directory of `*.toml` files
	pub tasks_path: PathBuf,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		SchedulerConfigLayer::default().finalize()
	}
}

impl SchedulerConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn status_poll_interval(&self) -> Duration {
		Duration::from_millis(self.status_poll_interval_ms)
	}

	pub fn run_retention(&self) -> Duration {
		Duration::from_secs(self.run_retention_hours.saturating_mul(3600))
	}

	pub fn prune_interval(&self) -> Duration {
		Duration::from_secs(self.prune_interval_secs)
	}

	pub fn notify_timeout(&self) -> Duration {
		Duration::from_millis(self.notify_timeout_ms)
	}

	pub fn shutdown_grace(&self) -> Duration {
		Duration::from_secs(self.shutdown_grace_secs)
	}
}
