// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use skein_sched_core::{
	AttemptOutcome, ContainerLauncher, FailureReason, Notifier, Result, RunId, RunRecord, RunState,
	SchedError, TaskSpec,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::execution::Execution;
use crate::health::{
	count_consecutive_failures, determine_health_state, LastRunInfo, SchedulerHealthStatus,
	TaskHealthStatus,
};
use crate::repository::{RepositoryError, RunRepository};
use crate::slots::{reserve_due, reserve_manual, RunIntent, SlotSnapshot, TaskSlot};

/// A run record plus the token that interrupts its execution.
pub(crate) struct RunCell {
	pub(crate) record: Mutex<RunRecord>,
	pub(crate) cancel: CancellationToken,
}

pub(crate) struct Inner {
	tasks: RwLock<HashMap<String, Arc<TaskSlot>>>,
	runs: RwLock<HashMap<RunId, Arc<RunCell>>>,
	pub(crate) launcher: Arc<dyn ContainerLauncher>,
	pub(crate) notifier: Arc<dyn Notifier>,
	pub(crate) repository: Option<RunRepository>,
	pub(crate) config: SchedulerConfig,
	pub(crate) tracker: TaskTracker,
	closed: AtomicBool,
}

impl Inner {
	/// Write a snapshot through to storage. Storage problems are logged,
	/// never surfaced to the run.
	pub(crate) async fn persist(&self, record: &RunRecord) {
		if let Some(repository) = &self.repository {
			if let Err(e) = repository.upsert_run(record).await {
				warn!(run_id = %record.run_id, state = %record.state, error = %e, "Failed to persist run record");
			}
		}
	}
}

/// Owns task registrations and the run table, and drives executions.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct Scheduler {
	inner: Arc<Inner>,
}

impl Scheduler {
	pub fn new(
		launcher: Arc<dyn ContainerLauncher>,
		notifier: Arc<dyn Notifier>,
		config: SchedulerConfig,
		repository: Option<RunRepository>,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				tasks: RwLock::new(HashMap::new()),
				runs: RwLock::new(HashMap::new()),
				launcher,
				notifier,
				repository,
				config,
				tracker: TaskTracker::new(),
				closed: AtomicBool::new(false),
			}),
		}
	}

	pub fn config(&self) -> &SchedulerConfig {
		&self.inner.config
	}

	/// Register or redefine a task, anchoring new schedules at the current time.
	pub fn register(&self, spec: TaskSpec) -> Result<()> {
		self.register_at(spec, Utc::now())
	}

	/// Register or redefine a task.
	///
	/// A redefinition keeps the task's watermark and recomputes the next
	/// fire time from it. Changing the owner of an existing name is refused.
	#[instrument(skip(self, spec), fields(task = %spec.name))]
	pub fn register_at(&self, spec: TaskSpec, now: DateTime<Utc>) -> Result<()> {
		let schedule = spec.validate()?;
		let mut tasks = self.inner.tasks.write();

		match tasks.get(&spec.name) {
			Some(slot) => {
				let existing = slot.owner();
				if existing != spec.owner {
					return Err(SchedError::DuplicateNameConflict {
						name: spec.name.clone(),
						existing,
						requested: spec.owner.clone(),
					});
				}
				info!(schedule = %schedule, "Task definition replaced");
				slot.replace(spec, schedule, now);
			}
			None => {
				info!(schedule = %schedule, max_active_runs = spec.max_active_runs, "Task registered");
				let name = spec.name.clone();
				tasks.insert(name, Arc::new(TaskSlot::new(spec, schedule, now)));
			}
		}
		Ok(())
	}

	/// Remove a task. Runs already in flight carry on to completion.
	#[instrument(skip(self))]
	pub fn unregister(&self, name: &str) -> bool {
		match self.inner.tasks.write().remove(name) {
			Some(slot) => {
				slot.retire();
				info!("Task unregistered");
				true
			}
			None => false,
		}
	}

	/// Emit one intent for every task that is due and under its
	/// concurrency limit, advancing each such task's watermark.
	///
	/// Safe to call from any number of threads at once: each task's
	/// check-and-advance happens under that task's own lock, so a due
	/// instant produces exactly one intent.
	pub fn poll(&self, now: DateTime<Utc>) -> Vec<RunIntent> {
		if self.inner.closed.load(Ordering::SeqCst) {
			return Vec::new();
		}

		let slots: Vec<Arc<TaskSlot>> = self.inner.tasks.read().values().cloned().collect();
		let intents: Vec<RunIntent> = slots
			.iter()
			.filter_map(|slot| reserve_due(slot, now))
			.collect();

		if !intents.is_empty() {
			debug!(count = intents.len(), "Tasks due");
		}
		intents
	}

	/// Manually start a task now, outside its schedule.
	#[instrument(skip(self))]
	pub fn trigger(&self, name: &str, now: DateTime<Utc>) -> Result<RunIntent> {
		let slot = self
			.inner
			.tasks
			.read()
			.get(name)
			.cloned()
			.ok_or_else(|| SchedError::TaskNotFound(name.to_string()))?;

		reserve_manual(&slot, now).map_err(|(name, limit)| SchedError::ConcurrencyLimit { name, limit })
	}

	/// Create the run record for `intent` and start its execution on a
	/// separate task. Returns the record as queued.
	pub fn dispatch(&self, intent: RunIntent) -> RunRecord {
		let RunIntent {
			task_name,
			scheduled_at,
			trigger,
			spec,
			reservation,
		} = intent;

		let record = RunRecord::queued(&task_name, scheduled_at, Utc::now());
		let cell = Arc::new(RunCell {
			record: Mutex::new(record.clone()),
			cancel: CancellationToken::new(),
		});
		self
			.inner
			.runs
			.write()
			.insert(record.run_id.clone(), cell.clone());

		info!(task = %task_name, run_id = %record.run_id, scheduled_at = %scheduled_at, ?trigger, "Run queued");

		let execution = Execution {
			inner: self.inner.clone(),
			cell,
			run_id: record.run_id.clone(),
			spec,
			trigger,
			_reservation: reservation,
		};
		self.inner.tracker.spawn(execution.run());

		record
	}

	/// Stop a run that has not finished. The run goes straight to
	/// `terminal_failed` with reason `Cancelled`; a live container is torn
	/// down, nothing is retried and nobody is notified.
	#[instrument(skip(self))]
	pub async fn cancel(&self, run_id: &RunId) -> bool {
		let Some(cell) = self.inner.runs.read().get(run_id).cloned() else {
			return false;
		};

		let snapshot = {
			let mut record = cell.record.lock();
			if record.is_terminal() {
				return false;
			}
			let now = Utc::now();
			record.finish_attempt(AttemptOutcome::Failed(FailureReason::Cancelled), now);
			record.failure_reason = Some(FailureReason::Cancelled);
			if record.transition(RunState::TerminalFailed, now).is_err() {
				return false;
			}
			record.clone()
		};

		cell.cancel.cancel();
		info!(task = %snapshot.task_name, attempt = snapshot.attempt, "Run cancelled");
		self.inner.persist(&snapshot).await;
		true
	}

	pub fn get_run(&self, run_id: &RunId) -> Option<RunRecord> {
		let cell = self.inner.runs.read().get(run_id).cloned()?;
		let record = cell.record.lock().clone();
		Some(record)
	}

	/// Every run of `task` still in the table, oldest first.
	pub fn list_runs(&self, task: &str) -> Vec<RunRecord> {
		let cells: Vec<Arc<RunCell>> = self.inner.runs.read().values().cloned().collect();
		let mut runs: Vec<RunRecord> = cells
			.iter()
			.map(|cell| cell.record.lock().clone())
			.filter(|record| record.task_name == task)
			.collect();
		runs.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then_with(|| a.run_id.cmp(&b.run_id)));
		runs
	}

	/// Non-terminal runs of `task`.
	pub fn active_runs(&self, task: &str) -> Vec<RunRecord> {
		self
			.list_runs(task)
			.into_iter()
			.filter(|run| !run.is_terminal())
			.collect()
	}

	pub fn task_names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.inner.tasks.read().keys().cloned().collect();
		names.sort();
		names
	}

	/// Current definition and schedule position of a task.
	pub fn task(&self, name: &str) -> Option<SlotSnapshot> {
		let slot = self.inner.tasks.read().get(name).cloned()?;
		Some(slot.snapshot())
	}

	/// Number of executions and notification deliveries still running.
	pub fn in_flight(&self) -> usize {
		self.inner.tracker.len()
	}

	/// Drop terminal runs that ended before the retention horizon.
	#[instrument(skip(self))]
	pub async fn prune(&self, now: DateTime<Utc>) -> usize {
		let retention = chrono::Duration::from_std(self.inner.config.run_retention)
			.unwrap_or(chrono::Duration::MAX);
		let cutoff = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);

		let pruned = {
			let mut runs = self.inner.runs.write();
			let before = runs.len();
			runs.retain(|_, cell| {
				let record = cell.record.lock();
				!(record.is_terminal() && record.ended_at.is_some_and(|ended| ended < cutoff))
			});
			before - runs.len()
		};

		if let Some(repository) = &self.inner.repository {
			if let Err(e) = repository.delete_ended_before(cutoff).await {
				warn!(error = %e, "Failed to prune persisted runs");
			}
		}

		if pruned > 0 {
			info!(pruned, cutoff = %cutoff, "Pruned expired runs");
		}
		pruned
	}

	pub fn task_health(&self, name: &str) -> Option<TaskHealthStatus> {
		let snapshot = self.task(name)?;
		let mut runs = self.list_runs(name);
		runs.reverse();
		let newest_first: Vec<&RunRecord> = runs.iter().collect();

		let consecutive_failures = count_consecutive_failures(&newest_first);
		let last_run = newest_first.first().copied();

		Some(TaskHealthStatus {
			task: name.to_string(),
			status: determine_health_state(last_run, consecutive_failures),
			last_run: last_run.map(LastRunInfo::from_record),
			consecutive_failures,
			next_fire: snapshot.next_fire,
			active_runs: runs.iter().filter(|run| !run.is_terminal()).count() as u32,
		})
	}

	pub fn health(&self) -> SchedulerHealthStatus {
		let tasks = self
			.task_names()
			.iter()
			.filter_map(|name| self.task_health(name))
			.collect();
		SchedulerHealthStatus::from_tasks(tasks)
	}

	/// Reload persisted watermarks so a restart neither re-fires nor
	/// backfills intervals that already ran. Returns how many tasks moved.
	#[instrument(skip(self))]
	pub async fn restore_watermarks(&self) -> std::result::Result<usize, RepositoryError> {
		let Some(repository) = &self.inner.repository else {
			return Ok(0);
		};
		let watermarks = repository.load_watermarks().await?;

		let tasks = self.inner.tasks.read();
		let restored = watermarks
			.iter()
			.filter(|(name, watermark)| {
				tasks
					.get(name.as_str())
					.is_some_and(|slot| slot.restore_watermark(**watermark))
			})
			.count();

		info!(restored, stored = watermarks.len(), "Restored task watermarks");
		Ok(restored)
	}

	/// Stop scheduling, wait up to `grace` for in-flight executions, then
	/// cancel the rest and wait for their teardown.
	#[instrument(skip(self))]
	pub async fn shutdown(&self, grace: Duration) {
		self.inner.closed.store(true, Ordering::SeqCst);
		self.inner.tracker.close();

		if tokio::time::timeout(grace, self.inner.tracker.wait()).await.is_err() {
			let active: Vec<RunId> = {
				let cells: Vec<Arc<RunCell>> = self.inner.runs.read().values().cloned().collect();
				cells
					.iter()
					.filter_map(|cell| {
						let record = cell.record.lock();
						(!record.is_terminal()).then(|| record.run_id.clone())
					})
					.collect()
			};
			warn!(count = active.len(), "Grace period elapsed, cancelling active runs");
			for run_id in &active {
				self.cancel(run_id).await;
			}
			self.inner.tracker.wait().await;
		}

		info!("Scheduler shut down");
	}
}
