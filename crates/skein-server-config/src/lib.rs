// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration management for the Skein server.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`SKEIN_SERVER_*`)

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub scheduler: SchedulerConfig,
	pub retry: RetryConfig,
	pub launcher: LauncherConfig,
	pub notify: NotifyConfig,
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`SKEIN_SERVER_*`)
/// 2. Config file (`/etc/skein/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only (for testing or simple deployments).
pub fn load_config_from_env() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![Box::new(EnvSource)])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let config = ServerConfig {
		scheduler: layer.scheduler.unwrap_or_default().finalize(),
		retry: layer.retry.unwrap_or_default().finalize(),
		launcher: layer.launcher.unwrap_or_default().finalize(),
		notify: layer.notify.unwrap_or_default().finalize(),
		database: layer.database.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
	};

	validate_config(&config)?;

	info!(
		poll_interval_ms = config.scheduler.poll_interval_ms,
		tasks_path = %config.scheduler.tasks_path.display(),
		namespace = %config.launcher.namespace,
		webhooks = config.notify.webhooks.len(),
		persistence = config.database.url.is_some(),
		"Server configuration loaded"
	);

	Ok(config)
}

/// Validate cross-field configuration rules.
fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
	if config.scheduler.poll_interval_ms == 0 {
		return Err(ConfigError::Validation(
			"scheduler.poll_interval_ms must be greater than zero".to_string(),
		));
	}
	if config.scheduler.status_poll_interval_ms == 0 {
		return Err(ConfigError::Validation(
			"scheduler.status_poll_interval_ms must be greater than zero".to_string(),
		));
	}
	if config.scheduler.prune_interval_secs == 0 {
		return Err(ConfigError::Validation(
			"scheduler.prune_interval_secs must be greater than zero".to_string(),
		));
	}
	if !config.retry.factor.is_finite() || config.retry.factor < 1.0 {
		return Err(ConfigError::Validation(format!(
			"retry.factor must be a finite number >= 1.0, got {}",
			config.retry.factor
		)));
	}
	if config.launcher.namespace.trim().is_empty() {
		return Err(ConfigError::Validation(
			"launcher.namespace must not be empty".to_string(),
		));
	}
	if config.launcher.teardown_attempts == 0 {
		return Err(ConfigError::Validation(
			"launcher.teardown_attempts must be at least 1".to_string(),
		));
	}
	for webhook in &config.notify.webhooks {
		if !(webhook.url.starts_with("https://") || webhook.url.starts_with("http://")) {
			return Err(ConfigError::Validation(format!(
				"webhook url must be http(s): {}",
				webhook.url
			)));
		}
	}
	if let Some(url) = &config.database.url {
		if !url.starts_with("sqlite:") {
			return Err(ConfigError::Validation(format!(
				"database.url must be a sqlite: URL, got {url}"
			)));
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_defaults_are_valid() {
		let config = finalize(ServerConfigLayer::default()).unwrap();
		assert_eq!(config.scheduler, SchedulerConfig::default());
		assert_eq!(config.launcher.namespace, "skein-runs");
		assert!(config.database.url.is_none());
	}

	#[test]
	fn test_rejects_shrinking_backoff() {
		let layer = ServerConfigLayer {
			retry: Some(RetryConfigLayer {
				factor: Some(0.5),
				..Default::default()
			}),
			..Default::default()
		};
		let err = finalize(layer).unwrap_err();
		assert!(err.to_string().contains("retry.factor"));
	}

	#[test]
	fn test_rejects_zero_poll_interval() {
		let layer = ServerConfigLayer {
			scheduler: Some(SchedulerConfigLayer {
				poll_interval_ms: Some(0),
				..Default::default()
			}),
			..Default::default()
		};
		assert!(matches!(finalize(layer), Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_rejects_non_http_webhook() {
		let layer: ServerConfigLayer = toml::from_str(
			r#"
[[notify.webhooks]]
url = "ftp://example.com"
"#,
		)
		.unwrap();
		let err = finalize(layer).unwrap_err();
		assert!(err.to_string().contains("ftp://example.com"));
	}

	#[test]
	fn test_rejects_non_sqlite_database() {
		let layer = ServerConfigLayer {
			database: Some(DatabaseConfigLayer {
				url: Some("postgres://localhost/skein".to_string()),
			}),
			..Default::default()
		};
		assert!(finalize(layer).is_err());
	}

	#[test]
	fn test_load_with_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"
[scheduler]
poll_interval_ms = 250
tasks_path = "/srv/skein/tasks"

[retry]
base_delay_ms = 500

[launcher]
delete_grace_secs = 15

[[notify.webhooks]]
url = "https://hooks.example.com/skein"
events = ["on_failure"]
"#
		)
		.unwrap();

		let config = load_config_with_file(file.path()).unwrap();
		assert_eq!(config.scheduler.poll_interval_ms, 250);
		assert_eq!(
			config.scheduler.tasks_path,
			std::path::PathBuf::from("/srv/skein/tasks")
		);
		assert_eq!(config.retry.base_delay_ms, 500);
		assert_eq!(config.retry.factor, 2.0);
		assert_eq!(config.launcher.delete_grace_secs, 15);
		assert_eq!(config.notify.webhooks.len(), 1);
	}
}
