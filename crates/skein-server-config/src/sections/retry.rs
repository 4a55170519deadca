// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Default retry backoff for tasks.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use skein_sched_core::RetryPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetryConfigLayer {
	pub base_delay_ms: Option<u64>,
	pub factor: Option<f64>,
	pub max_delay_secs: Option<u64>,
}

impl RetryConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.base_delay_ms.is_some() {
			self.base_delay_ms = other.base_delay_ms;
		}
		if other.factor.is_some() {
			self.factor = other.factor;
		}
		if other.max_delay_secs.is_some() {
			self.max_delay_secs = other.max_delay_secs;
		}
	}

	pub fn finalize(self) -> RetryConfig {
		RetryConfig {
			base_delay_ms: self.base_delay_ms.unwrap_or(1000),
			factor: self.factor.unwrap_or(2.0),
			max_delay_secs: self.max_delay_secs.unwrap_or(60),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
	pub base_delay_ms: u64,
	pub factor: f64,
	pub max_delay_secs: u64,
}

impl Default for RetryConfig {
	fn default() -> Self {
		RetryConfigLayer::default().finalize()
	}
}

impl RetryConfig {
	pub fn policy(&self) -> RetryPolicy {
		RetryPolicy::new(
			Duration::from_millis(self.base_delay_ms),
			self.factor,
			Duration::from_secs(self.max_delay_secs),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults_match_policy_defaults() {
		assert_eq!(RetryConfig::default().policy(), RetryPolicy::default());
	}

	#[test]
	fn test_custom_policy() {
		let config = RetryConfigLayer {
			base_delay_ms: Some(250),
			factor: Some(3.0),
			max_delay_secs: None,
		}
		.finalize();
		let policy = config.policy();
		assert_eq!(policy.base_delay, Duration::from_millis(250));
		assert_eq!(policy.factor, 3.0);
		assert_eq!(policy.max_delay, Duration::from_secs(60));
	}
}
