// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Task declarations.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedError};
use crate::retry::RetryPolicy;
use crate::schedule::Schedule;

/// Kubernetes label values and pod name segments cap at 63 characters.
pub const MAX_TASK_NAME_LEN: usize = 63;

fn default_timezone() -> String {
	"UTC".to_string()
}

fn default_max_active_runs() -> u32 {
	1
}

fn default_true() -> bool {
	true
}

/// Which run events produce a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPolicy {
	#[serde(default = "default_true")]
	pub on_failure: bool,
	#[serde(default = "default_true")]
	pub on_retry: bool,
}

impl Default for NotificationPolicy {
	fn default() -> Self {
		Self {
			on_failure: true,
			on_retry: true,
		}
	}
}

/// A declared unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
	pub name: String,
	pub image: String,
	pub schedule: String,
	#[serde(default = "default_timezone")]
	pub timezone: String,
	#[serde(default)]
	pub start_date: Option<DateTime<Utc>>,
	#[serde(default)]
	pub max_retries: u32,
	#[serde(default)]
	pub retry_delay_secs: Option<u64>,
	#[serde(default)]
	pub owner: Option<String>,
	#[serde(default)]
	pub email: Vec<String>,
	#[serde(default = "default_max_active_runs")]
	pub max_active_runs: u32,
	#[serde(default)]
	pub execution_timeout_secs: Option<u64>,
	#[serde(default)]
	pub params: BTreeMap<String, String>,
	#[serde(default)]
	pub command: Option<Vec<String>>,
	#[serde(default)]
	pub args: Option<Vec<String>>,
	#[serde(default)]
	pub notify: NotificationPolicy,
	#[serde(default)]
	pub labels: BTreeMap<String, String>,
}

impl TaskSpec {
	/// A spec with every optional field at its default.
	pub fn new(name: impl Into<String>, image: impl Into<String>, schedule: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			image: image.into(),
			schedule: schedule.into(),
			timezone: default_timezone(),
			start_date: None,
			max_retries: 0,
			retry_delay_secs: None,
			owner: None,
			email: Vec::new(),
			max_active_runs: default_max_active_runs(),
			execution_timeout_secs: None,
			params: BTreeMap::new(),
			command: None,
			args: None,
			notify: NotificationPolicy::default(),
			labels: BTreeMap::new(),
		}
	}

	pub fn retry_delay(&self) -> Option<Duration> {
		self.retry_delay_secs.map(Duration::from_secs)
	}

	pub fn execution_timeout(&self) -> Option<Duration> {
		self.execution_timeout_secs.map(Duration::from_secs)
	}

	/// The effective retry policy: `base` with this task's `retry_delay` applied.
	pub fn retry_policy(&self, base: RetryPolicy) -> RetryPolicy {
		match self.retry_delay() {
			Some(delay) => base.with_base(delay),
			None => base,
		}
	}

	/// Parse the schedule in the task's timezone.
	pub fn parsed_schedule(&self) -> Result<Schedule> {
		Schedule::parse_in(&self.schedule, &self.timezone)
	}

	/// Check every field, returning the parsed schedule on success.
	pub fn validate(&self) -> Result<Schedule> {
		validate_name(&self.name)?;

		if self.image.trim().is_empty() {
			return Err(SchedError::invalid_spec(&self.name, "image must not be empty"));
		}
		if self.max_active_runs == 0 {
			return Err(SchedError::invalid_spec(
				&self.name,
				"max_active_runs must be at least 1",
			));
		}
		if self.execution_timeout_secs == Some(0) {
			return Err(SchedError::invalid_spec(
				&self.name,
				"execution_timeout_secs must be greater than zero",
			));
		}
		if let Some(command) = &self.command {
			if command.is_empty() {
				return Err(SchedError::invalid_spec(&self.name, "command must not be empty"));
			}
		}

		self.parsed_schedule()
	}
}

/// Task names end up in pod names and label values.
pub fn validate_name(name: &str) -> Result<()> {
	if name.is_empty() {
		return Err(SchedError::invalid_spec(name, "name must not be empty"));
	}
	if name.len() > MAX_TASK_NAME_LEN {
		return Err(SchedError::invalid_spec(
			name,
			format!("name must be at most {MAX_TASK_NAME_LEN} characters"),
		));
	}
	if !name
		.chars()
		.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
	{
		return Err(SchedError::invalid_spec(
			name,
			"name may only contain lowercase letters, digits, '-', '_' and '.'",
		));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn spec() -> TaskSpec {
		TaskSpec::new("nightly-report", "ghcr.io/acme/report:1.4", "0 2 * * *")
	}

	#[test]
	fn test_valid_spec() {
		let schedule = spec().validate().unwrap();
		assert!(!schedule.is_once());
	}

	#[test]
	fn test_name_rules() {
		assert!(validate_name("etl.daily_v2-a").is_ok());
		assert!(validate_name("").is_err());
		assert!(validate_name("Upper").is_err());
		assert!(validate_name("has space").is_err());
		assert!(validate_name(&"a".repeat(63)).is_ok());
		assert!(validate_name(&"a".repeat(64)).is_err());
	}

	#[test]
	fn test_rejects_zero_concurrency() {
		let mut spec = spec();
		spec.max_active_runs = 0;
		assert!(matches!(
			spec.validate(),
			Err(SchedError::InvalidTaskSpec { .. })
		));
	}

	#[test]
	fn test_rejects_empty_image_and_command() {
		let mut bad_image = spec();
		bad_image.image = " ".into();
		assert!(bad_image.validate().is_err());

		let mut bad_command = spec();
		bad_command.command = Some(vec![]);
		assert!(bad_command.validate().is_err());
	}

	#[test]
	fn test_rejects_bad_schedule_and_timezone() {
		let mut bad_schedule = spec();
		bad_schedule.schedule = "whenever".into();
		assert!(matches!(
			bad_schedule.validate(),
			Err(SchedError::InvalidScheduleExpression { .. })
		));

		let mut bad_tz = spec();
		bad_tz.timezone = "Mars/Olympus".into();
		assert!(matches!(bad_tz.validate(), Err(SchedError::InvalidTimezone(_))));
	}

	#[test]
	fn test_retry_policy_applies_task_delay() {
		let mut spec = spec();
		assert_eq!(spec.retry_policy(RetryPolicy::default()), RetryPolicy::default());

		spec.retry_delay_secs = Some(5);
		let policy = spec.retry_policy(RetryPolicy::default());
		assert_eq!(policy.backoff(1), Duration::from_secs(5));
		assert_eq!(policy.backoff(2), Duration::from_secs(10));
	}

	#[test]
	fn test_deserialize_from_toml_with_defaults() {
		let spec: TaskSpec = toml::from_str(
			r#"
			name = "sync"
			image = "busybox:1.36"
			schedule = "@every 5m"
			"#,
		)
		.unwrap();

		assert_eq!(spec.timezone, "UTC");
		assert_eq!(spec.max_active_runs, 1);
		assert_eq!(spec.max_retries, 0);
		assert!(spec.notify.on_failure);
		assert!(spec.notify.on_retry);
		assert!(spec.params.is_empty());
	}

	#[test]
	fn test_deserialize_from_toml_full() {
		let spec: TaskSpec = toml::from_str(
			r#"
			name = "sync"
			image = "busybox:1.36"
			schedule = "0 9 * * *"
			timezone = "Europe/Berlin"
			max_retries = 3
			retry_delay_secs = 30
			owner = "data-eng"
			email = ["oncall@example.com"]
			max_active_runs = 2
			execution_timeout_secs = 600
			command = ["sh", "-c"]
			args = ["echo hi"]

			[params]
			TARGET = "warehouse"

			[notify]
			on_retry = false
			"#,
		)
		.unwrap();

		assert_eq!(spec.max_retries, 3);
		assert_eq!(spec.retry_delay(), Some(Duration::from_secs(30)));
		assert_eq!(spec.execution_timeout(), Some(Duration::from_secs(600)));
		assert_eq!(spec.params.get("TARGET").map(String::as_str), Some("warehouse"));
		assert!(spec.notify.on_failure);
		assert!(!spec.notify.on_retry);
		spec.validate().unwrap();
	}
}
