// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-task scheduling state and concurrency reservations.
//!
//! Every registered task owns one [`TaskSlot`]. The slot's mutex guards the
//! spec, the fire-time watermark, and the reservation count, so the
//! "is it due, is there room, advance" decision is a single critical
//! section per task. Different tasks never contend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use skein_sched_core::{Schedule, TaskSpec};

/// Why an intent was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
	Schedule,
	Manual,
}

struct SlotState {
	spec: Arc<TaskSpec>,
	schedule: Arc<Schedule>,
	next_fire: Option<DateTime<Utc>>,
	watermark: Option<DateTime<Utc>>,
	reserved: u32,
	retired: bool,
}

pub(crate) struct TaskSlot {
	state: Mutex<SlotState>,
}

/// Read-only view of a slot.
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
	pub spec: Arc<TaskSpec>,
	pub next_fire: Option<DateTime<Utc>>,
	pub watermark: Option<DateTime<Utc>>,
	pub reserved: u32,
}

impl TaskSlot {
	pub(crate) fn new(spec: TaskSpec, schedule: Schedule, anchor: DateTime<Utc>) -> Self {
		let next_fire = schedule.first_fire(spec.start_date.unwrap_or(anchor));
		Self {
			state: Mutex::new(SlotState {
				spec: Arc::new(spec),
				schedule: Arc::new(schedule),
				next_fire,
				watermark: None,
				reserved: 0,
				retired: false,
			}),
		}
	}

	pub(crate) fn owner(&self) -> Option<String> {
		self.state.lock().spec.owner.clone()
	}

	/// Swap in a new definition, keeping the watermark.
	pub(crate) fn replace(&self, spec: TaskSpec, schedule: Schedule, anchor: DateTime<Utc>) {
		let mut state = self.state.lock();
		state.next_fire = match state.watermark {
			Some(watermark) => schedule.next_fire_after(watermark),
			None => schedule.first_fire(spec.start_date.unwrap_or(anchor)),
		};
		state.spec = Arc::new(spec);
		state.schedule = Arc::new(schedule);
	}

	/// Apply a watermark loaded from storage if it is newer than ours.
	pub(crate) fn restore_watermark(&self, watermark: DateTime<Utc>) -> bool {
		let mut state = self.state.lock();
		if state.watermark.is_some_and(|current| current >= watermark) {
			return false;
		}
		state.watermark = Some(watermark);
		state.next_fire = state.schedule.next_fire_after(watermark);
		true
	}

	pub(crate) fn retire(&self) {
		self.state.lock().retired = true;
	}

	pub(crate) fn snapshot(&self) -> SlotSnapshot {
		let state = self.state.lock();
		SlotSnapshot {
			spec: state.spec.clone(),
			next_fire: state.next_fire,
			watermark: state.watermark,
			reserved: state.reserved,
		}
	}

	fn release(&self) {
		let mut state = self.state.lock();
		state.reserved = state.reserved.saturating_sub(1);
	}
}

/// Atomically check that the task is due and has room, then reserve a
/// slot and advance the watermark to the latest due instant.
pub(crate) fn reserve_due(slot: &Arc<TaskSlot>, now: DateTime<Utc>) -> Option<RunIntent> {
	let mut state = slot.state.lock();
	if state.retired {
		return None;
	}
	let next = state.next_fire?;
	if next > now || state.reserved >= state.spec.max_active_runs {
		return None;
	}

	let due = state.schedule.latest_due(next, now);
	state.watermark = Some(due);
	state.next_fire = state.schedule.next_fire_after(due);
	state.reserved += 1;

	Some(RunIntent {
		task_name: state.spec.name.clone(),
		scheduled_at: due,
		trigger: TriggerKind::Schedule,
		spec: state.spec.clone(),
		reservation: Reservation { slot: slot.clone() },
	})
}

/// Reserve a slot for a manual run, ignoring the schedule.
pub(crate) fn reserve_manual(
	slot: &Arc<TaskSlot>,
	now: DateTime<Utc>,
) -> Result<RunIntent, (String, u32)> {
	let mut state = slot.state.lock();
	if state.reserved >= state.spec.max_active_runs {
		return Err((state.spec.name.clone(), state.spec.max_active_runs));
	}
	state.reserved += 1;

	Ok(RunIntent {
		task_name: state.spec.name.clone(),
		scheduled_at: now,
		trigger: TriggerKind::Manual,
		spec: state.spec.clone(),
		reservation: Reservation { slot: slot.clone() },
	})
}

/// Holds one unit of a task's concurrency budget until dropped.
pub(crate) struct Reservation {
	slot: Arc<TaskSlot>,
}

impl Drop for Reservation {
	fn drop(&mut self) {
		self.slot.release();
	}
}

/// A decision that a task should run now. Dropping an intent without
/// dispatching it gives its concurrency slot back.
pub struct RunIntent {
	pub task_name: String,
	pub scheduled_at: DateTime<Utc>,
	pub trigger: TriggerKind,
	pub(crate) spec: Arc<TaskSpec>,
	pub(crate) reservation: Reservation,
}

impl RunIntent {
	/// The definition the intent was created from.
	pub fn spec(&self) -> &TaskSpec {
		&self.spec
	}
}

impl std::fmt::Debug for RunIntent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RunIntent")
			.field("task_name", &self.task_name)
			.field("scheduled_at", &self.scheduled_at)
			.field("trigger", &self.trigger)
			.finish()
	}
}
