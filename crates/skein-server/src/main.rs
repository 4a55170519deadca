// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Skein scheduler server binary.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use skein_sched_core::{Notifier, TaskSpec};
use skein_server_config::{LoggingConfig, ServerConfig};
use skein_server_k8s::KubeClient;
use skein_server_launcher::PodLauncher;
use skein_server_notify::{FanoutNotifier, LogNotifier, WebhookNotifier};
use skein_server_scheduler::{create_pool, run_poll_loop, RunRepository, Scheduler};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod tasks;

/// Skein server - runs scheduled container tasks on Kubernetes.
#[derive(Parser, Debug)]
#[command(name = "skein-server", about = "Container task scheduler", version)]
struct Args {
	/// Server config file (defaults to /etc/skein/server.toml)
	#[arg(short, long, env = "SKEIN_SERVER_CONFIG")]
	config: Option<PathBuf>,

	/// Task definition file or directory; overrides `scheduler.tasks_path`
	#[arg(short, long)]
	tasks: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Validate configuration and task definitions, then exit
	Check,
	/// Print upcoming fire times for every task
	Next {
		/// Fire times to show per task
		#[arg(short = 'n', long, default_value_t = 3)]
		count: usize,
	},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	let config = match &args.config {
		Some(path) => skein_server_config::load_config_with_file(path)?,
		None => skein_server_config::load_config()?,
	};
	init_tracing(&config.logging);

	let tasks_path = args
		.tasks
		.clone()
		.unwrap_or_else(|| config.scheduler.tasks_path.clone());
	let tasks = tasks::load_tasks(&tasks_path)?;

	match args.command {
		Some(Command::Check) => {
			println!("{} task(s) OK in {}", tasks.len(), tasks_path.display());
			Ok(())
		}
		Some(Command::Next { count }) => {
			print_next_fires(&tasks, count)?;
			Ok(())
		}
		None => serve(config, tasks).await,
	}
}

fn init_tracing(logging: &LoggingConfig) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);
	if logging.json {
		registry.with(tracing_subscriber::fmt::layer().json()).init();
	} else {
		registry.with(tracing_subscriber::fmt::layer()).init();
	}
}

fn print_next_fires(tasks: &[TaskSpec], count: usize) -> Result<(), skein_sched_core::SchedError> {
	let now = Utc::now();
	for spec in tasks {
		let schedule = spec.parsed_schedule()?;
		let mut fires = Vec::with_capacity(count);
		let mut next = schedule.first_fire(spec.start_date.unwrap_or(now));
		while let Some(at) = next {
			if fires.len() == count {
				break;
			}
			fires.push(at.to_rfc3339());
			next = schedule.next_fire_after(at);
		}
		println!("{} ({}): {}", spec.name, schedule, fires.join(", "));
	}
	Ok(())
}

async fn serve(config: ServerConfig, tasks: Vec<TaskSpec>) -> Result<(), Box<dyn std::error::Error>> {
	tracing::info!(
		namespace = %config.launcher.namespace,
		tasks = tasks.len(),
		persistence = config.database.url.is_some(),
		"starting skein-server"
	);

	let repository = match &config.database.url {
		Some(url) => {
			let repository = RunRepository::new(create_pool(url).await?);
			repository.migrate().await?;
			let abandoned = repository.abandon_unfinished(Utc::now()).await?;
			if abandoned > 0 {
				tracing::warn!(abandoned, "Closed runs left unfinished by a previous process");
			}
			Some(repository)
		}
		None => None,
	};

	let client = KubeClient::new().await?;
	let launcher = Arc::new(PodLauncher::new(
		Arc::new(client),
		skein_server_launcher::LauncherConfig {
			namespace: config.launcher.namespace.clone(),
			delete_grace_secs: config.launcher.delete_grace_secs,
			image_pull_secrets: config.launcher.image_pull_secrets.clone(),
			service_account: config.launcher.service_account.clone(),
		},
	));
	launcher.validate_namespace().await?;
	// nothing is running yet, so every managed pod is left over
	let reaped = launcher.reap_orphans(&HashSet::new()).await?;
	if reaped > 0 {
		tracing::warn!(reaped, "Removed run pods left by a previous process");
	}

	let mut notifier = FanoutNotifier::new(vec![Arc::new(LogNotifier) as Arc<dyn Notifier>]);
	if !config.notify.webhooks.is_empty() {
		notifier.push(Arc::new(WebhookNotifier::new(
			config.notify.webhooks.clone(),
			config.notify.timeout(),
		)?));
	}

	let scheduler = Scheduler::new(
		launcher,
		Arc::new(notifier),
		skein_server_scheduler::SchedulerConfig {
			status_poll_interval: config.scheduler.status_poll_interval(),
			notify_timeout: config.scheduler.notify_timeout(),
			max_status_errors: config.scheduler.max_status_errors,
			run_retention: config.scheduler.run_retention(),
			teardown_attempts: config.launcher.teardown_attempts,
			retry: config.retry.policy(),
			..Default::default()
		},
		repository,
	);

	for spec in tasks {
		scheduler.register(spec)?;
	}
	scheduler.restore_watermarks().await?;

	let shutdown = CancellationToken::new();
	let poll_loop = tokio::spawn(run_poll_loop(
		scheduler.clone(),
		config.scheduler.poll_interval(),
		config.scheduler.prune_interval(),
		shutdown.clone(),
	));

	shutdown_signal().await;
	tracing::info!("Received shutdown signal");
	shutdown.cancel();
	poll_loop.await?;

	tracing::info!(
		in_flight = scheduler.in_flight(),
		grace_secs = config.scheduler.shutdown_grace_secs,
		"Waiting for in-flight runs"
	);
	scheduler.shutdown(config.scheduler.shutdown_grace()).await;

	tracing::info!("Server shutdown complete");
	Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix (what the kubelet sends).
async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %e, "Failed to listen for Ctrl-C");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut signal) => {
				signal.recv().await;
			}
			Err(e) => {
				tracing::error!(error = %e, "Failed to listen for SIGTERM");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {}
		_ = terminate => {}
	}
}
