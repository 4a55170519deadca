// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pod construction and status mapping.

use std::collections::BTreeMap;

use skein_sched_core::{ExecutionStatus, ExitInfo, LaunchRequest, RunId};
use skein_server_k8s::{
	Capabilities, Container, ContainerStatus, EnvVar, LocalObjectReference, ObjectMeta, Pod,
	PodSecurityContext, PodSpec, SeccompProfile, SecurityContext,
};

use crate::config::LauncherConfig;

pub(crate) const MANAGED_LABEL: &str = "skein.dev/managed";
pub(crate) const TASK_LABEL: &str = "skein.dev/task";
pub(crate) const RUN_ID_LABEL: &str = "skein.dev/run-id";
pub(crate) const ATTEMPT_LABEL: &str = "skein.dev/attempt";
const LABEL_IMAGE_REGISTRY: &str = "skein.dev/image-registry";
const LABEL_IMAGE_NAME: &str = "skein.dev/image-name";
pub(crate) const CONTAINER_NAME: &str = "task";
const MAX_LABEL_LENGTH: usize = 63;
const DEFAULT_REGISTRY: &str = "docker.io";

/// Waiting reasons that never resolve on their own.
const FATAL_WAITING_REASONS: &[&str] = &[
	"ErrImagePull",
	"ImagePullBackOff",
	"InvalidImageName",
	"CreateContainerConfigError",
	"CreateContainerError",
];

/// Pod name for one attempt of a run.
pub fn pod_name(run_id: &RunId, attempt: u32) -> String {
	format!("run-{}-{attempt}", run_id.short())
}

/// Sanitize a string to be a valid Kubernetes label value.
///
/// K8s label values must:
/// - Be 63 characters or less
/// - Begin and end with an alphanumeric character
/// - Contain only alphanumeric characters, dashes, underscores, and dots
pub fn sanitize_label_value(value: &str) -> String {
	let sanitized: String = value
		.chars()
		.map(|c| {
			if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
				c
			} else {
				'_'
			}
		})
		.collect();

	let trimmed = sanitized
		.trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
		.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());

	if trimmed.len() > MAX_LABEL_LENGTH {
		trimmed[..MAX_LABEL_LENGTH]
			.trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
			.to_string()
	} else {
		trimmed.to_string()
	}
}

/// Registry and repository name of an image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageParts {
	pub registry: String,
	pub name: String,
}

/// Split an image reference into registry and name.
///
/// - `busybox:1.36` → `docker.io`, `busybox`
/// - `acme/etl:2` → `docker.io`, `acme/etl`
/// - `ghcr.io/acme/etl@sha256:...` → `ghcr.io`, `acme/etl`
/// - `localhost:5000/etl:dev` → `localhost:5000`, `etl`
pub fn parse_image_parts(image: &str) -> ImageParts {
	let without_digest = image.split('@').next().unwrap_or(image);
	let (first, rest) = match without_digest.split_once('/') {
		Some((first, rest)) if looks_like_registry(first) => (Some(first), rest),
		_ => (None, without_digest),
	};

	// A tag is a ':' in the last path segment; a port lives in the registry.
	let name = match rest.rsplit_once(':') {
		Some((name, tag)) if !tag.contains('/') => name,
		_ => rest,
	};

	ImageParts {
		registry: first.unwrap_or(DEFAULT_REGISTRY).to_string(),
		name: name.to_string(),
	}
}

fn looks_like_registry(s: &str) -> bool {
	s.contains('.') || s.contains(':') || s == "localhost"
}

fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
	EnvVar {
		name: name.to_string(),
		value: Some(value.into()),
		value_from: None,
	}
}

/// Build the pod for one attempt of a run.
pub fn build_pod_spec(request: &LaunchRequest, config: &LauncherConfig) -> Pod {
	let mut labels: BTreeMap<String, String> = request
		.labels
		.iter()
		.map(|(k, v)| (k.clone(), sanitize_label_value(v)))
		.collect();
	labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
	labels.insert(TASK_LABEL.to_string(), sanitize_label_value(&request.task_name));
	labels.insert(RUN_ID_LABEL.to_string(), request.run_id.to_string());
	labels.insert(ATTEMPT_LABEL.to_string(), request.attempt.to_string());

	let image_parts = parse_image_parts(&request.image);
	labels.insert(
		LABEL_IMAGE_REGISTRY.to_string(),
		sanitize_label_value(&image_parts.registry),
	);
	labels.insert(
		LABEL_IMAGE_NAME.to_string(),
		sanitize_label_value(&image_parts.name),
	);

	let mut env: Vec<EnvVar> = request
		.env
		.iter()
		.map(|(k, v)| env_var(k, v.clone()))
		.collect();
	env.push(env_var("SKEIN_TASK", request.task_name.clone()));
	env.push(env_var("SKEIN_RUN_ID", request.run_id.to_string()));
	env.push(env_var("SKEIN_ATTEMPT", request.attempt.to_string()));

	let security_context = SecurityContext {
		run_as_non_root: Some(true),
		run_as_user: Some(1000),
		run_as_group: Some(1000),
		allow_privilege_escalation: Some(false),
		read_only_root_filesystem: Some(false),
		capabilities: Some(Capabilities {
			drop: Some(vec!["ALL".to_string()]),
			add: None,
		}),
		..Default::default()
	};

	let container = Container {
		name: CONTAINER_NAME.to_string(),
		image: Some(request.image.clone()),
		command: request.command.clone(),
		args: request.args.clone(),
		env: Some(env),
		security_context: Some(security_context),
		..Default::default()
	};

	let image_pull_secrets = if config.image_pull_secrets.is_empty() {
		None
	} else {
		Some(
			config
				.image_pull_secrets
				.iter()
				.map(|name| LocalObjectReference { name: name.clone() })
				.collect(),
		)
	};

	Pod {
		metadata: ObjectMeta {
			name: Some(pod_name(&request.run_id, request.attempt)),
			namespace: Some(config.namespace.clone()),
			labels: Some(labels),
			..Default::default()
		},
		spec: Some(PodSpec {
			containers: vec![container],
			restart_policy: Some("Never".to_string()),
			image_pull_secrets,
			service_account_name: config.service_account.clone(),
			automount_service_account_token: Some(config.service_account.is_some()),
			security_context: Some(PodSecurityContext {
				seccomp_profile: Some(SeccompProfile {
					type_: "RuntimeDefault".to_string(),
					..Default::default()
				}),
				..Default::default()
			}),
			..Default::default()
		}),
		status: None,
	}
}

fn task_container_status(pod: &Pod) -> Option<&ContainerStatus> {
	let statuses = pod.status.as_ref()?.container_statuses.as_ref()?;
	statuses
		.iter()
		.find(|s| s.name == CONTAINER_NAME)
		.or_else(|| statuses.first())
}

fn terminated_exit(status: &ContainerStatus) -> Option<ExitInfo> {
	let terminated = status.state.as_ref()?.terminated.as_ref()?;
	Some(ExitInfo {
		exit_code: Some(terminated.exit_code),
		reason: terminated.reason.clone(),
		message: terminated.message.clone(),
	})
}

/// Map a pod's phase and container state onto an execution status.
pub fn map_pod_status(pod: &Pod) -> ExecutionStatus {
	let phase = pod
		.status
		.as_ref()
		.and_then(|s| s.phase.as_deref())
		.unwrap_or("Unknown");
	let container = task_container_status(pod);

	match phase {
		"Succeeded" => ExecutionStatus::Succeeded,
		"Failed" => {
			let exit = container.and_then(terminated_exit).unwrap_or_else(|| ExitInfo {
				exit_code: None,
				reason: pod.status.as_ref().and_then(|s| s.reason.clone()),
				message: pod.status.as_ref().and_then(|s| s.message.clone()),
			});
			ExecutionStatus::Failed(exit)
		}
		"Running" => match container.and_then(terminated_exit) {
			Some(exit) if exit.exit_code == Some(0) => ExecutionStatus::Succeeded,
			Some(exit) => ExecutionStatus::Failed(exit),
			None => ExecutionStatus::Running,
		},
		_ => {
			let waiting = container
				.and_then(|s| s.state.as_ref())
				.and_then(|s| s.waiting.as_ref());
			match waiting {
				Some(w)
					if w
						.reason
						.as_deref()
						.is_some_and(|r| FATAL_WAITING_REASONS.contains(&r)) =>
				{
					ExecutionStatus::Failed(ExitInfo {
						exit_code: None,
						reason: w.reason.clone(),
						message: w.message.clone(),
					})
				}
				_ => ExecutionStatus::Pending,
			}
		}
	}
}
