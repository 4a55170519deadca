// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Container launcher configuration section.

use serde::{Deserialize, Serialize};

fn default_namespace() -> String {
	"skein-runs".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LauncherConfigLayer {
	pub namespace: Option<String>,
	pub delete_grace_secs: Option<u32>,
	pub teardown_attempts: Option<u32>,
	pub image_pull_secrets: Option<Vec<String>>,
	pub service_account: Option<String>,
}

impl LauncherConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.namespace.is_some() {
			self.namespace = other.namespace;
		}
		if other.delete_grace_secs.is_some() {
			self.delete_grace_secs = other.delete_grace_secs;
		}
		if other.teardown_attempts.is_some() {
			self.teardown_attempts = other.teardown_attempts;
		}
		if other.image_pull_secrets.is_some() {
			self.image_pull_secrets = other.image_pull_secrets;
		}
		if other.service_account.is_some() {
			self.service_account = other.service_account;
		}
	}

	pub fn finalize(self) -> LauncherConfig {
		LauncherConfig {
			namespace: self.namespace.unwrap_or_else(default_namespace),
			delete_grace_secs: self.delete_grace_secs.unwrap_or(5),
			teardown_attempts: self.teardown_attempts.unwrap_or(3),
			image_pull_secrets: self.image_pull_secrets.unwrap_or_default(),
			service_account: self.service_account,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LauncherConfig {
	pub namespace: String,
	pub delete_grace_secs: u32,
	/// Tries per pod deletion before giving up
	pub teardown_attempts: u32,
	pub image_pull_secrets: Vec<String>,
	pub service_account: Option<String>,
}

impl Default for LauncherConfig {
	fn default() -> Self {
		LauncherConfigLayer::default().finalize()
	}
}
