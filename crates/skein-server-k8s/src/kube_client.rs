// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::{
	api::{Api, DeleteParams, ListParams, PostParams},
	Client,
};
use tracing::{debug, instrument};

use crate::client::K8sClient;
use crate::error::K8sError;

/// Production K8s client implementation using the kube crate.
pub struct KubeClient {
	client: Client,
}

impl KubeClient {
	/// Create a new KubeClient that auto-discovers cluster configuration.
	///
	/// In-cluster service account first, then `KUBECONFIG`, then
	/// `~/.kube/config`.
	pub async fn new() -> Result<Self, K8sError> {
		let client = Client::try_default().await?;
		debug!("K8s client initialized");
		Ok(Self { client })
	}

	fn pods(&self, namespace: &str) -> Api<Pod> {
		Api::namespaced(self.client.clone(), namespace)
	}
}

fn is_not_found(err: &kube::Error) -> bool {
	matches!(err, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl K8sClient for KubeClient {
	#[instrument(skip(self, pod), fields(pod = ?pod.metadata.name))]
	async fn create_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, K8sError> {
		let pod = self.pods(namespace).create(&PostParams::default(), &pod).await?;
		Ok(pod)
	}

	#[instrument(skip(self))]
	async fn delete_pod(
		&self,
		name: &str,
		namespace: &str,
		grace_period_seconds: u32,
	) -> Result<(), K8sError> {
		let dp = DeleteParams {
			grace_period_seconds: Some(grace_period_seconds),
			..Default::default()
		};
		match self.pods(namespace).delete(name, &dp).await {
			Ok(_) => Ok(()),
			Err(e) if is_not_found(&e) => Err(K8sError::PodNotFound { name: name.into() }),
			Err(e) => Err(e.into()),
		}
	}

	async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, K8sError> {
		let lp = ListParams::default().labels(label_selector);
		let pod_list = self.pods(namespace).list(&lp).await?;
		Ok(pod_list.items)
	}

	async fn get_pod(&self, name: &str, namespace: &str) -> Result<Pod, K8sError> {
		match self.pods(namespace).get(name).await {
			Ok(pod) => Ok(pod),
			Err(e) if is_not_found(&e) => Err(K8sError::PodNotFound { name: name.into() }),
			Err(e) => Err(e.into()),
		}
	}

	async fn get_namespace(&self, name: &str) -> Result<Namespace, K8sError> {
		let namespaces: Api<Namespace> = Api::all(self.client.clone());
		match namespaces.get(name).await {
			Ok(ns) => Ok(ns),
			Err(e) if is_not_found(&e) => Err(K8sError::NamespaceNotFound { name: name.into() }),
			Err(e) => Err(e.into()),
		}
	}
}
