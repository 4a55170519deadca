// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::scheduler::Scheduler;

/// Drive the scheduler until `shutdown` fires: poll for due tasks every
/// `poll_interval`, dispatch what comes back, and prune expired runs
/// every `prune_interval`.
pub async fn run_poll_loop(
	scheduler: Scheduler,
	poll_interval: Duration,
	prune_interval: Duration,
	shutdown: CancellationToken,
) {
	let mut poll_tick = tokio::time::interval(poll_interval);
	poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
	let mut prune_tick = tokio::time::interval(prune_interval);
	prune_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

	info!(
		poll_interval_ms = poll_interval.as_millis() as u64,
		tasks = scheduler.task_names().len(),
		"Poll loop started"
	);

	loop {
		tokio::select! {
			_ = shutdown.cancelled() => {
				info!("Poll loop stopping");
				break;
			}
			_ = poll_tick.tick() => {
				for intent in scheduler.poll(Utc::now()) {
					let run = scheduler.dispatch(intent);
					debug!(task = %run.task_name, run_id = %run.run_id, "Dispatched");
				}
			}
			_ = prune_tick.tick() => {
				scheduler.prune(Utc::now()).await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	use async_trait::async_trait;
	use skein_sched_core::{
		ContainerLauncher, ExecutionStatus, LaunchError, LaunchHandle, LaunchRequest, NotificationEvent,
		Notifier, RunState, TaskSpec, TeardownError,
	};

	use crate::config::SchedulerConfig;

	struct Done;

	#[async_trait]
	impl ContainerLauncher for Done {
		async fn launch(&self, request: &LaunchRequest) -> Result<LaunchHandle, LaunchError> {
			Ok(LaunchHandle::new(request.run_id.to_string()))
		}

		async fn poll_status(&self, _handle: &LaunchHandle) -> Result<ExecutionStatus, LaunchError> {
			Ok(ExecutionStatus::Succeeded)
		}

		async fn terminate(&self, _handle: &LaunchHandle) -> Result<(), TeardownError> {
			Ok(())
		}
	}

	#[async_trait]
	impl Notifier for Done {
		async fn notify(&self, _event: NotificationEvent) {}
	}

	#[tokio::test]
	async fn test_loop_dispatches_due_tasks_until_shutdown() {
		let scheduler = Scheduler::new(Arc::new(Done), Arc::new(Done), SchedulerConfig::default(), None);
		scheduler.register(TaskSpec::new("once", "busybox", "@once")).unwrap();

		let shutdown = CancellationToken::new();
		let handle = tokio::spawn(run_poll_loop(
			scheduler.clone(),
			Duration::from_millis(10),
			Duration::from_secs(3600),
			shutdown.clone(),
		));

		for _ in 0..200 {
			if !scheduler.list_runs("once").is_empty() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		shutdown.cancel();
		handle.await.unwrap();
		scheduler.shutdown(Duration::from_secs(5)).await;

		let runs = scheduler.list_runs("once");
		assert_eq!(runs.len(), 1);
		assert_eq!(runs[0].state, RunState::Succeeded);
	}
}
