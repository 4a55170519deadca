// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Container runtime capability.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::run::RunId;
use crate::task::TaskSpec;

/// Everything a runtime needs to start one attempt of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
	pub run_id: RunId,
	pub task_name: String,
	pub attempt: u32,
	pub image: String,
	pub command: Option<Vec<String>>,
	pub args: Option<Vec<String>>,
	pub env: BTreeMap<String, String>,
	pub labels: BTreeMap<String, String>,
}

impl LaunchRequest {
	pub fn for_attempt(spec: &TaskSpec, run_id: &RunId, attempt: u32) -> Self {
		Self {
			run_id: run_id.clone(),
			task_name: spec.name.clone(),
			attempt,
			image: spec.image.clone(),
			command: spec.command.clone(),
			args: spec.args.clone(),
			env: spec.params.clone(),
			labels: spec.labels.clone(),
		}
	}
}

/// Opaque reference to a launched container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaunchHandle {
	/// Runtime-specific identifier (a pod name for Kubernetes).
	pub id: String,
	/// Runtime-specific scope (a namespace for Kubernetes).
	pub scope: Option<String>,
}

impl LaunchHandle {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			scope: None,
		}
	}

	pub fn scoped(id: impl Into<String>, scope: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			scope: Some(scope.into()),
		}
	}
}

impl std::fmt::Display for LaunchHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match &self.scope {
			Some(scope) => write!(f, "{scope}/{}", self.id),
			None => f.write_str(&self.id),
		}
	}
}

/// How a container ended when it did not succeed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
	pub exit_code: Option<i32>,
	pub reason: Option<String>,
	pub message: Option<String>,
}

/// Observed state of a launched container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
	Pending,
	Running,
	Succeeded,
	Failed(ExitInfo),
}

/// The runtime could not start a container or report on one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LaunchError {
	#[error("launch rejected: {0}")]
	Rejected(String),

	#[error("container not found: {0}")]
	NotFound(String),

	#[error("runtime unavailable: {0}")]
	Unavailable(String),
}

/// The runtime could not remove a container.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TeardownError {
	/// Worth retrying (timeouts, API hiccups).
	#[error("transient teardown failure: {0}")]
	Transient(String),

	#[error("permanent teardown failure: {0}")]
	Permanent(String),
}

impl TeardownError {
	pub fn is_transient(&self) -> bool {
		matches!(self, TeardownError::Transient(_))
	}
}

/// A container runtime the scheduler launches attempts on.
///
/// `terminate` must treat an already-gone container as success.
#[async_trait]
pub trait ContainerLauncher: Send + Sync {
	async fn launch(&self, request: &LaunchRequest) -> Result<LaunchHandle, LaunchError>;

	async fn poll_status(&self, handle: &LaunchHandle) -> Result<ExecutionStatus, LaunchError>;

	async fn terminate(&self, handle: &LaunchHandle) -> Result<(), TeardownError>;
}
