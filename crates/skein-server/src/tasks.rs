// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Task definition files.
//!
//! A definition file holds any number of `[[task]]` tables. The tasks path
//! is either one such file or a directory whose `*.toml` files are read in
//! name order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use skein_sched_core::{SchedError, TaskSpec};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TaskFileError {
	#[error("Failed to read task definitions at {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to parse task definitions at {path}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("Invalid task in {path}: {source}")]
	Invalid {
		path: PathBuf,
		#[source]
		source: SchedError,
	},

	#[error("Task {name} is defined in both {first} and {second}")]
	Duplicate {
		name: String,
		first: PathBuf,
		second: PathBuf,
	},
}

#[derive(Debug, Default, Deserialize)]
struct TaskFile {
	#[serde(default, rename = "task")]
	tasks: Vec<TaskSpec>,
}

/// Load and validate every task definition under `path`.
pub fn load_tasks(path: &Path) -> Result<Vec<TaskSpec>, TaskFileError> {
	let files = if path.is_dir() {
		definition_files(path)?
	} else {
		vec![path.to_path_buf()]
	};

	let mut seen: HashMap<String, PathBuf> = HashMap::new();
	let mut tasks = Vec::new();
	for file in files {
		for spec in parse_file(&file)? {
			spec.validate().map_err(|source| TaskFileError::Invalid {
				path: file.clone(),
				source,
			})?;
			if let Some(first) = seen.insert(spec.name.clone(), file.clone()) {
				return Err(TaskFileError::Duplicate {
					name: spec.name,
					first,
					second: file,
				});
			}
			tasks.push(spec);
		}
	}

	info!(path = %path.display(), count = tasks.len(), "Loaded task definitions");
	Ok(tasks)
}

fn definition_files(dir: &Path) -> Result<Vec<PathBuf>, TaskFileError> {
	let read_err = |source| TaskFileError::Read {
		path: dir.to_path_buf(),
		source,
	};

	let mut files = Vec::new();
	for entry in std::fs::read_dir(dir).map_err(read_err)? {
		let path = entry.map_err(read_err)?.path();
		if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
			files.push(path);
		}
	}
	files.sort();
	Ok(files)
}

fn parse_file(path: &Path) -> Result<Vec<TaskSpec>, TaskFileError> {
	debug!(path = %path.display(), "Reading task definitions");
	let content = std::fs::read_to_string(path).map_err(|source| TaskFileError::Read {
		path: path.to_path_buf(),
		source,
	})?;
	let file: TaskFile = toml::from_str(&content).map_err(|source| TaskFileError::Parse {
		path: path.to_path_buf(),
		source,
	})?;
	Ok(file.tasks)
}

#[cfg(test)]
mod tests {
	use super::*;

	const NIGHTLY: &str = r#"
[[task]]
name = "nightly-etl"
image = "registry.example.com/etl:2.1"
schedule = "0 0 2 * * *"
timezone = "Europe/Berlin"
max_retries = 2
owner = "data"
email = ["data-oncall@example.com"]

[task.params]
TARGET = "warehouse"

[[task]]
name = "heartbeat"
image = "busybox:1.36"
schedule = "@every 5m"
command = ["sh", "-c", "echo ok"]
"#;

	fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
		let path = dir.join(name);
		std::fs::write(&path, content).unwrap();
		path
	}

	#[test]
	fn test_load_single_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = write(dir.path(), "tasks.toml", NIGHTLY);

		let tasks = load_tasks(&path).unwrap();
		assert_eq!(tasks.len(), 2);
		assert_eq!(tasks[0].name, "nightly-etl");
		assert_eq!(tasks[0].max_retries, 2);
		assert_eq!(tasks[0].params.get("TARGET").map(String::as_str), Some("warehouse"));
		assert_eq!(tasks[1].max_active_runs, 1);
	}

	#[test]
	fn test_load_directory_in_name_order() {
		let dir = tempfile::tempdir().unwrap();
		write(
			dir.path(),
			"b.toml",
			"[[task]]\nname = \"second\"\nimage = \"busybox\"\nschedule = \"@every 1h\"\n",
		);
		write(
			dir.path(),
			"a.toml",
			"[[task]]\nname = \"first\"\nimage = \"busybox\"\nschedule = \"@every 1h\"\n",
		);
		write(dir.path(), "notes.txt", "not a task file");

		let names: Vec<String> = load_tasks(dir.path())
			.unwrap()
			.into_iter()
			.map(|t| t.name)
			.collect();
		assert_eq!(names, vec!["first", "second"]);
	}

	#[test]
	fn test_empty_file_has_no_tasks() {
		let dir = tempfile::tempdir().unwrap();
		let path = write(dir.path(), "empty.toml", "");
		assert!(load_tasks(&path).unwrap().is_empty());
	}

	#[test]
	fn test_invalid_schedule_names_the_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = write(
			dir.path(),
			"bad.toml",
			"[[task]]\nname = \"etl\"\nimage = \"busybox\"\nschedule = \"every tuesday\"\n",
		);

		let err = load_tasks(&path).unwrap_err();
		assert!(matches!(
			err,
			TaskFileError::Invalid {
				source: SchedError::InvalidScheduleExpression { .. },
				..
			}
		));
		assert!(err.to_string().contains("bad.toml"));
	}

	#[test]
	fn test_duplicate_names_across_files() {
		let dir = tempfile::tempdir().unwrap();
		let body = "[[task]]\nname = \"etl\"\nimage = \"busybox\"\nschedule = \"@once\"\n";
		write(dir.path(), "a.toml", body);
		write(dir.path(), "b.toml", body);

		assert!(matches!(
			load_tasks(dir.path()),
			Err(TaskFileError::Duplicate { name, .. }) if name == "etl"
		));
	}

	#[test]
	fn test_missing_path() {
		assert!(matches!(
			load_tasks(Path::new("/nonexistent/skein/tasks.toml")),
			Err(TaskFileError::Read { .. })
		));
	}

	#[test]
	fn test_malformed_toml() {
		let dir = tempfile::tempdir().unwrap();
		let path = write(dir.path(), "broken.toml", "[[task]\nname = ");
		assert!(matches!(load_tasks(&path), Err(TaskFileError::Parse { .. })));
	}
}
