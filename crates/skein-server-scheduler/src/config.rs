// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use skein_sched_core::RetryPolicy;

/// Runtime knobs for the scheduler and its executions.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	/// Delay between `poll_status` calls on a running container
	pub status_poll_interval: Duration,
	/// Upper bound on a single notifier call
	pub notify_timeout: Duration,
	/// Consecutive status errors before an attempt fails as `StatusUnavailable`
	pub max_status_errors: u32,
	/// How long terminal runs stay in the run table
	pub run_retention: Duration,
	/// Tries per teardown when the runtime reports transient errors
	pub teardown_attempts: u32,
	/// Base delay between teardown tries, multiplied by the try number
	pub teardown_backoff: Duration,
	/// Retry policy; a task's `retry_delay_secs` replaces the base delay
	pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			status_poll_interval: Duration::from_secs(2),
			notify_timeout: Duration::from_secs(5),
			max_status_errors: 5,
			run_retention: Duration::from_secs(168 * 3600),
			teardown_attempts: 3,
			teardown_backoff: Duration::from_millis(500),
			retry: RetryPolicy::default(),
		}
	}
}
