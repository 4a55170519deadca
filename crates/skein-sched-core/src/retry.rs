// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retry decisions and exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::run::FailureReason;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
const DEFAULT_FACTOR: f64 = 2.0;

/// Outcome of consulting the retry policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
	Retry { backoff: Duration },
	GiveUp,
}

impl RetryDecision {
	pub fn should_retry(&self) -> bool {
		matches!(self, RetryDecision::Retry { .. })
	}
}

/// Pure retry policy: whether to run another attempt and how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
	pub base_delay: Duration,
	pub factor: f64,
	pub max_delay: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			base_delay: DEFAULT_BASE_DELAY,
			factor: DEFAULT_FACTOR,
			max_delay: DEFAULT_MAX_DELAY,
		}
	}
}

impl RetryPolicy {
	pub fn new(base_delay: Duration, factor: f64, max_delay: Duration) -> Self {
		Self {
			base_delay,
			factor,
			max_delay,
		}
	}

	/// Same policy with a different base delay (a task's `retry_delay`).
	pub fn with_base(self, base_delay: Duration) -> Self {
		Self { base_delay, ..self }
	}

	/// Decide whether the run gets another attempt.
	///
	/// `attempt` is the 1-based number of the attempt that just failed. A
	/// retry is allowed iff `attempt <= max_retries`, so a task runs at
	/// most `max_retries + 1` times. Cancelled runs are never retried.
	pub fn should_retry(&self, attempt: u32, max_retries: u32, reason: &FailureReason) -> RetryDecision {
		if matches!(reason, FailureReason::Cancelled) || attempt == 0 || attempt > max_retries {
			return RetryDecision::GiveUp;
		}
		RetryDecision::Retry {
			backoff: self.backoff(attempt),
		}
	}

	/// Delay before the retry that follows `attempt`: `base * factor^(attempt - 1)`,
	/// capped at `max_delay`.
	pub fn backoff(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
		let factor = if self.factor.is_finite() && self.factor >= 1.0 {
			self.factor
		} else {
			1.0
		};
		let secs = self.base_delay.as_secs_f64() * factor.powi(exponent);
		let capped = secs.min(self.max_delay.as_secs_f64());
		if capped.is_finite() && capped > 0.0 {
			Duration::from_secs_f64(capped)
		} else {
			Duration::ZERO
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn failure() -> FailureReason {
		FailureReason::Launch("image pull backoff".to_string())
	}

	#[test]
	fn test_backoff_doubles_from_base() {
		let policy = RetryPolicy::default();
		assert_eq!(policy.backoff(1), Duration::from_secs(1));
		assert_eq!(policy.backoff(2), Duration::from_secs(2));
		assert_eq!(policy.backoff(3), Duration::from_secs(4));
	}

	#[test]
	fn test_backoff_caps_at_max() {
		let policy = RetryPolicy::default();
		assert_eq!(policy.backoff(10), Duration::from_secs(60));
		assert_eq!(policy.backoff(100), Duration::from_secs(60));
		assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(60));
	}

	#[test]
	fn test_with_base() {
		let policy = RetryPolicy::default().with_base(Duration::from_secs(300));
		assert_eq!(policy.backoff(1), Duration::from_secs(60));

		let policy = RetryPolicy::default().with_base(Duration::from_millis(10));
		assert_eq!(policy.backoff(2), Duration::from_millis(20));
	}

	#[test]
	fn test_retry_iff_attempt_within_max_retries() {
		let policy = RetryPolicy::default();
		assert!(policy.should_retry(1, 1, &failure()).should_retry());
		assert!(!policy.should_retry(2, 1, &failure()).should_retry());
		assert!(!policy.should_retry(1, 0, &failure()).should_retry());
		assert!(policy.should_retry(3, 3, &failure()).should_retry());
	}

	#[test]
	fn test_retry_carries_backoff() {
		let policy = RetryPolicy::default();
		assert_eq!(
			policy.should_retry(2, 5, &FailureReason::Timeout),
			RetryDecision::Retry {
				backoff: Duration::from_secs(2)
			}
		);
	}

	#[test]
	fn test_cancelled_is_never_retried() {
		let policy = RetryPolicy::default();
		assert_eq!(
			policy.should_retry(1, 10, &FailureReason::Cancelled),
			RetryDecision::GiveUp
		);
	}

	#[test]
	fn test_degenerate_factor_is_treated_as_constant() {
		let policy = RetryPolicy::new(Duration::from_secs(3), f64::NAN, Duration::from_secs(60));
		assert_eq!(policy.backoff(5), Duration::from_secs(3));
		let policy = RetryPolicy::new(Duration::from_secs(3), 0.5, Duration::from_secs(60));
		assert_eq!(policy.backoff(5), Duration::from_secs(3));
	}

	proptest! {
		#[test]
		fn backoff_is_bounded_and_monotonic(
			base_ms in 0u64..100_000,
			max_secs in 0u64..3_600,
			attempt in 1u32..200,
		) {
			let policy = RetryPolicy::new(
				Duration::from_millis(base_ms),
				2.0,
				Duration::from_secs(max_secs),
			);
			let delay = policy.backoff(attempt);
			prop_assert!(delay <= Duration::from_secs(max_secs));
			prop_assert!(policy.backoff(attempt + 1) >= delay);
		}

		#[test]
		fn total_attempts_never_exceed_max_retries_plus_one(max_retries in 0u32..20) {
			let policy = RetryPolicy::default();
			let mut attempt = 1;
			while policy.should_retry(attempt, max_retries, &FailureReason::Timeout).should_retry() {
				attempt += 1;
			}
			prop_assert_eq!(attempt, max_retries + 1);
		}
	}
}
