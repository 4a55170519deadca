// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::Serialize;
use skein_sched_core::{RunRecord, RunState};

const UNHEALTHY_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct TaskHealthStatus {
	pub task: String,
	pub status: HealthState,
	pub last_run: Option<LastRunInfo>,
	pub consecutive_failures: u32,
	pub next_fire: Option<DateTime<Utc>>,
	pub active_runs: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastRunInfo {
	pub run_id: String,
	pub state: RunState,
	pub scheduled_at: DateTime<Utc>,
	pub attempt: u32,
	pub duration_ms: Option<i64>,
	pub error: Option<String>,
}

impl LastRunInfo {
	pub fn from_record(run: &RunRecord) -> Self {
		Self {
			run_id: run.run_id.to_string(),
			state: run.state,
			scheduled_at: run.scheduled_at,
			attempt: run.attempt,
			duration_ms: run.duration_ms(),
			error: run.failure_reason.as_ref().map(ToString::to_string),
		}
	}
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
	Healthy,
	Degraded,
	Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerHealthStatus {
	pub status: HealthState,
	pub tasks: Vec<TaskHealthStatus>,
}

impl SchedulerHealthStatus {
	/// Overall state is the worst of the per-task states.
	pub fn from_tasks(tasks: Vec<TaskHealthStatus>) -> Self {
		let mut worst_state = HealthState::Healthy;
		for task in &tasks {
			if task.status == HealthState::Unhealthy {
				worst_state = HealthState::Unhealthy;
			} else if task.status == HealthState::Degraded && worst_state != HealthState::Unhealthy {
				worst_state = HealthState::Degraded;
			}
		}
		Self {
			status: worst_state,
			tasks,
		}
	}
}

/// Terminal failures since the most recent success, newest first.
pub(crate) fn count_consecutive_failures(runs_newest_first: &[&RunRecord]) -> u32 {
	runs_newest_first
		.iter()
		.filter(|run| run.is_terminal())
		.take_while(|run| run.state == RunState::TerminalFailed)
		.count() as u32
}

pub(crate) fn determine_health_state(last_run: Option<&RunRecord>, consecutive_failures: u32) -> HealthState {
	match last_run.map(|run| run.state) {
		None => HealthState::Healthy,
		Some(RunState::TerminalFailed) => {
			if consecutive_failures >= UNHEALTHY_AFTER_FAILURES {
				HealthState::Unhealthy
			} else {
				HealthState::Degraded
			}
		}
		Some(_) => HealthState::Healthy,
	}
}
