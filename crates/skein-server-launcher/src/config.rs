// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pod launcher configuration.

/// Configuration for the pod launcher.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
	/// Kubernetes namespace for run pods
	pub namespace: String,
	/// Grace period passed to pod deletion
	pub delete_grace_secs: u32,
	/// Image pull secret names for private registries
	pub image_pull_secrets: Vec<String>,
	/// Service account the run pods execute as
	pub service_account: Option<String>,
}

impl Default for LauncherConfig {
	fn default() -> Self {
		Self {
			namespace: "skein-runs".to_string(),
			delete_grace_secs: 5,
			image_pull_secrets: Vec::new(),
			service_account: None,
		}
	}
}
