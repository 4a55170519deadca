// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use skein_sched_core::NotificationKind;
use skein_server_notify::WebhookConfig;
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	DatabaseConfigLayer, LauncherConfigLayer, LoggingConfigLayer, NotifyConfigLayer, RetryConfigLayer,
	SchedulerConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/skein/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: SKEIN_SERVER_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			scheduler: Some(load_scheduler_from_env()?),
			retry: Some(load_retry_from_env()?),
			launcher: Some(load_launcher_from_env()?),
			notify: Some(load_notify_from_env()?),
			database: Some(load_database_from_env()?),
			logging: Some(load_logging_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T: std::str::FromStr>(name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid {kind} value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
	env_parse(name, "u32")
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	env_parse(name, "u64")
}

fn env_f64(name: &str) -> Result<Option<f64>, ConfigError> {
	env_parse(name, "f64")
}

fn env_list(name: &str) -> Option<Vec<String>> {
	env_var(name).map(|s| {
		s.split(',')
			.map(|s| s.trim().to_string())
			.filter(|s| !s.is_empty())
			.collect()
	})
}

/// Read a secret from `VAR_FILE` (a mounted secret file) or `VAR`.
fn env_secret(name: &str) -> Result<Option<String>, ConfigError> {
	let file_var = format!("{name}_FILE");
	if let Some(path) = env_var(&file_var) {
		let path = PathBuf::from(path);
		let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileRead {
			path: path.clone(),
			source: e,
		})?;
		return Ok(Some(content.strip_suffix('\n').unwrap_or(&content).to_string()));
	}
	Ok(env_var(name))
}

fn load_scheduler_from_env() -> Result<SchedulerConfigLayer, ConfigError> {
	Ok(SchedulerConfigLayer {
		poll_interval_ms: env_u64("SKEIN_SERVER_POLL_INTERVAL_MS")?,
		status_poll_interval_ms: env_u64("SKEIN_SERVER_STATUS_POLL_INTERVAL_MS")?,
		run_retention_hours: env_u64("SKEIN_SERVER_RUN_RETENTION_HOURS")?,
		prune_interval_secs: env_u64("SKEIN_SERVER_PRUNE_INTERVAL_SECS")?,
		notify_timeout_ms: env_u64("SKEIN_SERVER_NOTIFY_TIMEOUT_MS")?,
		max_status_errors: env_u32("SKEIN_SERVER_MAX_STATUS_ERRORS")?,
		shutdown_grace_secs: env_u64("SKEIN_SERVER_SHUTDOWN_GRACE_SECS")?,
		tasks_path: env_var("SKEIN_SERVER_TASKS_PATH").map(PathBuf::from),
	})
}

fn load_retry_from_env() -> Result<RetryConfigLayer, ConfigError> {
	Ok(RetryConfigLayer {
		base_delay_ms: env_u64("SKEIN_SERVER_RETRY_BASE_DELAY_MS")?,
		factor: env_f64("SKEIN_SERVER_RETRY_FACTOR")?,
		max_delay_secs: env_u64("SKEIN_SERVER_RETRY_MAX_DELAY_SECS")?,
	})
}

fn load_launcher_from_env() -> Result<LauncherConfigLayer, ConfigError> {
	Ok(LauncherConfigLayer {
		namespace: env_var("SKEIN_SERVER_K8S_NAMESPACE"),
		delete_grace_secs: env_u32("SKEIN_SERVER_POD_DELETE_GRACE_SECS")?,
		teardown_attempts: env_u32("SKEIN_SERVER_TEARDOWN_ATTEMPTS")?,
		image_pull_secrets: env_list("SKEIN_SERVER_IMAGE_PULL_SECRETS"),
		service_account: env_var("SKEIN_SERVER_SERVICE_ACCOUNT"),
	})
}

/// A single webhook can be configured from the environment; more need TOML.
fn load_notify_from_env() -> Result<NotifyConfigLayer, ConfigError> {
	let webhooks = match env_var("SKEIN_SERVER_WEBHOOK_URL") {
		Some(url) => {
			let events = match env_list("SKEIN_SERVER_WEBHOOK_EVENTS") {
				Some(names) => names
					.iter()
					.map(|name| {
						name.parse::<NotificationKind>().map_err(|message| ConfigError::InvalidValue {
							key: "SKEIN_SERVER_WEBHOOK_EVENTS".to_string(),
							message,
						})
					})
					.collect::<Result<Vec<_>, _>>()?,
				None => vec![NotificationKind::OnFailure, NotificationKind::OnRetry],
			};
			Some(vec![WebhookConfig {
				url,
				events,
				secret: env_secret("SKEIN_SERVER_WEBHOOK_SECRET")?,
			}])
		}
		None => None,
	};

	Ok(NotifyConfigLayer {
		webhooks,
		timeout_secs: env_u64("SKEIN_SERVER_WEBHOOK_TIMEOUT_SECS")?,
	})
}

fn load_database_from_env() -> Result<DatabaseConfigLayer, ConfigError> {
	Ok(DatabaseConfigLayer {
		url: env_var("SKEIN_SERVER_DATABASE_URL"),
	})
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	Ok(LoggingConfigLayer {
		level: env_var("SKEIN_SERVER_LOG_LEVEL"),
		json: env_bool("SKEIN_SERVER_LOG_JSON"),
	})
}
