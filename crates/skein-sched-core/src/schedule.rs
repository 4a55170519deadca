// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Schedule expressions and fire-time calculation.
//!
//! Supported grammar:
//!
//! - `@once` fires a single time, at the task's anchor
//! - `@every <n><unit>` fixed interval, unit one of `s`, `m`, `h`, `d`
//! - `@hourly`, `@daily` (`@midnight`), `@weekly`, `@monthly`, `@yearly` (`@annually`)
//! - standard 5-field Unix cron, or the 6/7-field form understood by the `cron` crate
//!
//! Cron schedules are evaluated in the task's timezone; everything returned
//! here is UTC.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SchedError};

/// Upper bound on cron steps walked when a poll arrives late.
const MAX_CATCHUP_STEPS: usize = 10_000;

/// A parsed schedule expression.
#[derive(Debug, Clone)]
pub enum Schedule {
	Once,
	Interval(Duration),
	Cron {
		expression: String,
		schedule: Box<cron::Schedule>,
		timezone: Tz,
	},
}

/// Compute the next fire time strictly after `last_fire`.
///
/// Returns `Ok(None)` when the schedule is exhausted (`@once` after it
/// has fired).
pub fn next_fire_after(expression: &str, last_fire: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
	Ok(Schedule::parse(expression)?.next_fire_after(last_fire))
}

/// Validate an expression without computing anything.
pub fn validate_schedule(expression: &str, timezone: &str) -> Result<()> {
	Schedule::parse_in(expression, timezone).map(|_| ())
}

/// Validate a timezone string.
pub fn parse_timezone(timezone: &str) -> Result<Tz> {
	timezone
		.parse()
		.map_err(|_| SchedError::InvalidTimezone(timezone.to_string()))
}

/// Convert a standard 5-field Unix cron expression to the 7-field format
/// expected by the `cron` crate (seconds pinned to 0, any year).
fn convert_to_cron_crate_format(expression: &str) -> String {
	match expression.split_whitespace().count() {
		5 => format!("0 {expression} *"),
		_ => expression.to_string(),
	}
}

fn preset(name: &str) -> Option<&'static str> {
	match name {
		"hourly" => Some("0 * * * *"),
		"daily" | "midnight" => Some("0 0 * * *"),
		"weekly" => Some("0 0 * * Sun"),
		"monthly" => Some("0 0 1 * *"),
		"yearly" | "annually" => Some("0 0 1 1 *"),
		_ => None,
	}
}

fn parse_interval(expression: &str, spec: &str) -> Result<Duration> {
	let spec = spec.trim();
	let split = spec
		.find(|c: char| !c.is_ascii_digit())
		.ok_or_else(|| SchedError::invalid_schedule(expression, "interval is missing a unit"))?;
	let (amount, unit) = spec.split_at(split);

	let amount: i64 = amount
		.parse()
		.map_err(|_| SchedError::invalid_schedule(expression, "interval amount is not a number"))?;
	if amount <= 0 {
		return Err(SchedError::invalid_schedule(
			expression,
			"interval must be greater than zero",
		));
	}

	let interval = match unit {
		"s" => Duration::try_seconds(amount),
		"m" => Duration::try_minutes(amount),
		"h" => Duration::try_hours(amount),
		"d" => Duration::try_days(amount),
		other => {
			return Err(SchedError::invalid_schedule(
				expression,
				format!("unknown interval unit '{other}'"),
			))
		}
	};

	interval.ok_or_else(|| SchedError::invalid_schedule(expression, "interval is too large"))
}

impl Schedule {
	/// Parse an expression, evaluating cron schedules in UTC.
	pub fn parse(expression: &str) -> Result<Self> {
		Self::parse_in(expression, "UTC")
	}

	/// Parse an expression, evaluating cron schedules in `timezone`.
	pub fn parse_in(expression: &str, timezone: &str) -> Result<Self> {
		let timezone = parse_timezone(timezone)?;
		let trimmed = expression.trim();
		if trimmed.is_empty() {
			return Err(SchedError::invalid_schedule(expression, "expression is empty"));
		}

		let cron_source = match trimmed.strip_prefix('@') {
			Some("once") => return Ok(Schedule::Once),
			Some(rest) if rest.starts_with("every") => {
				let interval = parse_interval(trimmed, &rest["every".len()..])?;
				return Ok(Schedule::Interval(interval));
			}
			Some(rest) => preset(rest)
				.ok_or_else(|| SchedError::invalid_schedule(expression, "unknown preset"))?,
			None => trimmed,
		};

		let schedule = cron::Schedule::from_str(&convert_to_cron_crate_format(cron_source))
			.map_err(|e| SchedError::invalid_schedule(expression, e.to_string()))?;

		Ok(Schedule::Cron {
			expression: trimmed.to_string(),
			schedule: Box::new(schedule),
			timezone,
		})
	}

	pub fn is_once(&self) -> bool {
		matches!(self, Schedule::Once)
	}

	/// The first fire time for a task anchored at `anchor`.
	///
	/// `@once` fires at the anchor itself; intervals fire one period later;
	/// cron fires at the first match after the anchor.
	pub fn first_fire(&self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
		match self {
			Schedule::Once => Some(anchor),
			_ => self.next_fire_after(anchor),
		}
	}

	/// The next fire time strictly after `last_fire`, or `None` when the
	/// schedule has nothing left to fire.
	pub fn next_fire_after(&self, last_fire: DateTime<Utc>) -> Option<DateTime<Utc>> {
		match self {
			Schedule::Once => None,
			Schedule::Interval(interval) => last_fire.checked_add_signed(*interval),
			Schedule::Cron {
				schedule, timezone, ..
			} => schedule
				.after(&last_fire.with_timezone(timezone))
				.next()
				.map(|next| next.with_timezone(&Utc)),
		}
	}

	/// The most recent fire instant that is still `<= now`, starting from a
	/// due instant `next`.
	///
	/// A poll that arrives several periods late collapses the missed
	/// periods into this single instant instead of backfilling them.
	pub fn latest_due(&self, next: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
		if now <= next {
			return next;
		}

		match self {
			Schedule::Once => next,
			Schedule::Interval(interval) => {
				let period = interval.num_milliseconds();
				let elapsed = (now - next).num_milliseconds();
				let steps = if period > 0 { elapsed / period } else { 0 };
				Duration::try_milliseconds(period.saturating_mul(steps))
					.and_then(|offset| next.checked_add_signed(offset))
					.unwrap_or(next)
			}
			Schedule::Cron { .. } => {
				let mut latest = next;
				for _ in 0..MAX_CATCHUP_STEPS {
					match self.next_fire_after(latest) {
						Some(candidate) if candidate <= now => latest = candidate,
						_ => break,
					}
				}
				latest
			}
		}
	}
}

impl std::fmt::Display for Schedule {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Schedule::Once => write!(f, "@once"),
			Schedule::Interval(interval) => write!(f, "@every {}s", interval.num_seconds()),
			Schedule::Cron {
				expression,
				timezone,
				..
			} => write!(f, "{expression} ({timezone})"),
		}
	}
}
