// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `ContainerLauncher` backed by Kubernetes pods.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use skein_sched_core::{
	ContainerLauncher, ExecutionStatus, LaunchError, LaunchHandle, LaunchRequest, TeardownError,
};
use skein_server_k8s::{K8sClient, K8sError};
use tracing::instrument;

use crate::config::LauncherConfig;
use crate::pod::{build_pod_spec, map_pod_status, MANAGED_LABEL, RUN_ID_LABEL};

fn launch_error(err: K8sError) -> LaunchError {
	match err {
		K8sError::PodNotFound { name } => LaunchError::NotFound(name),
		e if e.is_transient() => LaunchError::Unavailable(e.to_string()),
		e => LaunchError::Rejected(e.to_string()),
	}
}

/// Runs each attempt as a single pod with restart policy `Never`.
pub struct PodLauncher {
	client: Arc<dyn K8sClient>,
	config: LauncherConfig,
}

impl PodLauncher {
	pub fn new(client: Arc<dyn K8sClient>, config: LauncherConfig) -> Self {
		Self { client, config }
	}

	pub fn namespace(&self) -> &str {
		&self.config.namespace
	}

	fn pod_namespace<'a>(&'a self, handle: &'a LaunchHandle) -> &'a str {
		handle.scope.as_deref().unwrap_or(&self.config.namespace)
	}

	/// Best-effort delete of a pod whose creation outcome is unknown. The
	/// next attempt uses a different pod name, so nothing else would remove it.
	async fn discard(&self, pod_name: &str) {
		match self
			.client
			.delete_pod(pod_name, &self.config.namespace, self.config.delete_grace_secs)
			.await
		{
			Ok(()) => tracing::warn!(pod_name = %pod_name, "Deleted pod left by a failed create"),
			Err(K8sError::PodNotFound { .. }) => {}
			Err(e) => {
				tracing::warn!(pod_name = %pod_name, error = %e, "Failed to delete pod after a failed create")
			}
		}
	}

	/// Fail fast on startup when the namespace is missing.
	pub async fn validate_namespace(&self) -> Result<(), K8sError> {
		self.client.get_namespace(&self.config.namespace).await?;
		tracing::info!(namespace = %self.config.namespace, "Validated namespace exists");
		Ok(())
	}

	/// Delete managed pods whose run is not in `active_run_ids`.
	///
	/// Run state lives in memory, so pods left behind by a previous process
	/// have no owner after a restart.
	pub async fn reap_orphans(&self, active_run_ids: &HashSet<String>) -> Result<u32, K8sError> {
		let pods = self
			.client
			.list_pods(&self.config.namespace, &format!("{MANAGED_LABEL}=true"))
			.await?;

		let mut reaped = 0;
		for pod in pods {
			let Some(name) = pod.metadata.name.clone() else {
				continue;
			};
			let run_id = pod
				.metadata
				.labels
				.as_ref()
				.and_then(|labels| labels.get(RUN_ID_LABEL))
				.cloned()
				.unwrap_or_default();
			if active_run_ids.contains(&run_id) {
				continue;
			}

			match self
				.client
				.delete_pod(&name, &self.config.namespace, self.config.delete_grace_secs)
				.await
			{
				Ok(()) => {
					tracing::info!(pod_name = %name, run_id = %run_id, "Deleted orphaned run pod");
					reaped += 1;
				}
				Err(K8sError::PodNotFound { .. }) => {
					tracing::debug!(pod_name = %name, "Orphaned pod already deleted");
				}
				Err(e) => {
					tracing::error!(pod_name = %name, error = %e, "Failed to delete orphaned pod");
				}
			}
		}

		Ok(reaped)
	}
}

#[async_trait]
impl ContainerLauncher for PodLauncher {
	#[instrument(skip(self, request), fields(task = %request.task_name, run_id = %request.run_id, attempt = request.attempt))]
	async fn launch(&self, request: &LaunchRequest) -> Result<LaunchHandle, LaunchError> {
		let pod = build_pod_spec(request, &self.config);
		let pod_name = pod.metadata.name.clone().unwrap_or_default();

		tracing::info!(pod_name = %pod_name, image = %request.image, "Creating run pod");
		if let Err(e) = self.client.create_pod(&self.config.namespace, pod).await {
			// the API server may have created the pod before the call failed
			if e.is_transient() {
				self.discard(&pod_name).await;
			}
			return Err(launch_error(e));
		}

		Ok(LaunchHandle::scoped(pod_name, self.config.namespace.clone()))
	}

	async fn poll_status(&self, handle: &LaunchHandle) -> Result<ExecutionStatus, LaunchError> {
		let pod = self
			.client
			.get_pod(&handle.id, self.pod_namespace(handle))
			.await
			.map_err(launch_error)?;
		Ok(map_pod_status(&pod))
	}

	#[instrument(skip(self), fields(pod_name = %handle.id))]
	async fn terminate(&self, handle: &LaunchHandle) -> Result<(), TeardownError> {
		match self
			.client
			.delete_pod(
				&handle.id,
				self.pod_namespace(handle),
				self.config.delete_grace_secs,
			)
			.await
		{
			Ok(()) => {
				tracing::debug!("Deleted run pod");
				Ok(())
			}
			Err(K8sError::PodNotFound { .. }) => {
				tracing::debug!("Run pod already deleted");
				Ok(())
			}
			Err(e) if e.is_transient() => Err(TeardownError::Transient(e.to_string())),
			Err(e) => Err(TeardownError::Permanent(e.to_string())),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	use parking_lot::Mutex;
	use skein_sched_core::{RunId, TaskSpec};
	use skein_server_k8s::{Namespace, ObjectMeta, Pod, PodStatus};

	use crate::pod::pod_name;

	/// In-memory cluster: pods keyed by name, plus scripted delete errors.
	#[derive(Default)]
	struct FakeCluster {
		pods: Mutex<HashMap<String, Pod>>,
		delete_errors: Mutex<Vec<K8sError>>,
		create_error: Mutex<Option<K8sError>>,
		/// Error returned after the pod was stored anyway.
		lost_create: Mutex<Option<K8sError>>,
		deletes: Mutex<Vec<(String, u32)>>,
	}

	impl FakeCluster {
		fn set_phase(&self, name: &str, phase: &str) {
			if let Some(pod) = self.pods.lock().get_mut(name) {
				pod.status = Some(PodStatus {
					phase: Some(phase.to_string()),
					..Default::default()
				});
			}
		}
	}

	#[async_trait]
	impl K8sClient for FakeCluster {
		async fn create_pod(&self, _namespace: &str, pod: Pod) -> Result<Pod, K8sError> {
			if let Some(err) = self.create_error.lock().take() {
				return Err(err);
			}
			let name = pod.metadata.name.clone().unwrap_or_default();
			self.pods.lock().insert(name, pod.clone());
			if let Some(err) = self.lost_create.lock().take() {
				return Err(err);
			}
			Ok(pod)
		}

		async fn delete_pod(
			&self,
			name: &str,
			_namespace: &str,
			grace_period_seconds: u32,
		) -> Result<(), K8sError> {
			self
				.deletes
				.lock()
				.push((name.to_string(), grace_period_seconds));
			if let Some(err) = self.delete_errors.lock().pop() {
				return Err(err);
			}
			match self.pods.lock().remove(name) {
				Some(_) => Ok(()),
				None => Err(K8sError::PodNotFound { name: name.into() }),
			}
		}

		async fn list_pods(&self, _namespace: &str, _selector: &str) -> Result<Vec<Pod>, K8sError> {
			Ok(self.pods.lock().values().cloned().collect())
		}

		async fn get_pod(&self, name: &str, _namespace: &str) -> Result<Pod, K8sError> {
			self
				.pods
				.lock()
				.get(name)
				.cloned()
				.ok_or_else(|| K8sError::PodNotFound { name: name.into() })
		}

		async fn get_namespace(&self, name: &str) -> Result<Namespace, K8sError> {
			if name == "skein-runs" {
				Ok(Namespace {
					metadata: ObjectMeta {
						name: Some(name.to_string()),
						..Default::default()
					},
					..Default::default()
				})
			} else {
				Err(K8sError::NamespaceNotFound { name: name.into() })
			}
		}
	}

	fn setup() -> (Arc<FakeCluster>, PodLauncher) {
		let cluster = Arc::new(FakeCluster::default());
		let launcher = PodLauncher::new(cluster.clone(), LauncherConfig::default());
		(cluster, launcher)
	}

	fn request() -> LaunchRequest {
		let spec = TaskSpec::new("etl", "busybox:1.36", "@hourly");
		LaunchRequest::for_attempt(&spec, &RunId::new(), 1)
	}

	#[tokio::test]
	async fn test_launch_poll_terminate() {
		let (cluster, launcher) = setup();
		let request = request();

		let handle = launcher.launch(&request).await.unwrap();
		assert_eq!(handle.id, pod_name(&request.run_id, 1));
		assert_eq!(handle.scope.as_deref(), Some("skein-runs"));

		assert_eq!(
			launcher.poll_status(&handle).await.unwrap(),
			ExecutionStatus::Pending
		);
		cluster.set_phase(&handle.id, "Running");
		assert_eq!(
			launcher.poll_status(&handle).await.unwrap(),
			ExecutionStatus::Running
		);
		cluster.set_phase(&handle.id, "Succeeded");
		assert_eq!(
			launcher.poll_status(&handle).await.unwrap(),
			ExecutionStatus::Succeeded
		);

		launcher.terminate(&handle).await.unwrap();
		assert!(cluster.pods.lock().is_empty());
		assert_eq!(cluster.deletes.lock()[0].1, 5);
	}

	#[tokio::test]
	async fn test_terminate_missing_pod_is_ok() {
		let (_cluster, launcher) = setup();
		let handle = LaunchHandle::scoped("run-gone-1", "skein-runs");
		assert!(launcher.terminate(&handle).await.is_ok());
	}

	#[tokio::test]
	async fn test_terminate_classifies_errors() {
		let (cluster, launcher) = setup();
		let handle = launcher.launch(&request()).await.unwrap();

		cluster.delete_errors.lock().push(K8sError::ApiError {
			code: Some(503),
			message: "unavailable".into(),
		});
		assert!(matches!(
			launcher.terminate(&handle).await,
			Err(TeardownError::Transient(_))
		));

		cluster.delete_errors.lock().push(K8sError::ApiError {
			code: Some(403),
			message: "forbidden".into(),
		});
		assert!(matches!(
			launcher.terminate(&handle).await,
			Err(TeardownError::Permanent(_))
		));
	}

	#[tokio::test]
	async fn test_launch_errors_are_classified() {
		let (cluster, launcher) = setup();

		*cluster.create_error.lock() = Some(K8sError::ApiError {
			code: Some(422),
			message: "invalid".into(),
		});
		assert!(matches!(
			launcher.launch(&request()).await,
			Err(LaunchError::Rejected(_))
		));

		*cluster.create_error.lock() = Some(K8sError::Timeout);
		assert!(matches!(
			launcher.launch(&request()).await,
			Err(LaunchError::Unavailable(_))
		));
	}

	#[tokio::test]
	async fn test_transient_create_failure_removes_stray_pod() {
		let (cluster, launcher) = setup();
		let request = request();

		*cluster.lost_create.lock() = Some(K8sError::Timeout);
		assert!(matches!(
			launcher.launch(&request).await,
			Err(LaunchError::Unavailable(_))
		));
		assert!(cluster.pods.lock().is_empty());
		assert_eq!(cluster.deletes.lock()[0].0, pod_name(&request.run_id, 1));
	}

	#[tokio::test]
	async fn test_rejected_create_does_not_delete() {
		let (cluster, launcher) = setup();

		*cluster.create_error.lock() = Some(K8sError::ApiError {
			code: Some(422),
			message: "invalid".into(),
		});
		assert!(launcher.launch(&request()).await.is_err());
		assert!(cluster.deletes.lock().is_empty());
	}

	#[tokio::test]
	async fn test_poll_missing_pod_is_not_found() {
		let (_cluster, launcher) = setup();
		let handle = LaunchHandle::scoped("run-missing-1", "skein-runs");
		assert!(matches!(
			launcher.poll_status(&handle).await,
			Err(LaunchError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_validate_namespace() {
		let (_cluster, launcher) = setup();
		assert!(launcher.validate_namespace().await.is_ok());

		let other = PodLauncher::new(
			Arc::new(FakeCluster::default()),
			LauncherConfig {
				namespace: "missing".into(),
				..Default::default()
			},
		);
		assert!(matches!(
			other.validate_namespace().await,
			Err(K8sError::NamespaceNotFound { .. })
		));
	}

	#[tokio::test]
	async fn test_reap_orphans_keeps_active_runs() {
		let (cluster, launcher) = setup();
		let keep = request();
		let stale = request();
		launcher.launch(&keep).await.unwrap();
		launcher.launch(&stale).await.unwrap();

		let active: HashSet<String> = [keep.run_id.to_string()].into_iter().collect();
		let reaped = launcher.reap_orphans(&active).await.unwrap();

		assert_eq!(reaped, 1);
		let remaining: Vec<String> = cluster.pods.lock().keys().cloned().collect();
		assert_eq!(remaining, vec![pod_name(&keep.run_id, 1)]);
	}
}
