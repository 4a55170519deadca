// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Notification delivery configuration section.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use skein_server_notify::WebhookConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NotifyConfigLayer {
	pub webhooks: Option<Vec<WebhookConfig>>,
	pub timeout_secs: Option<u64>,
}

impl NotifyConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.webhooks.is_some() {
			self.webhooks = other.webhooks;
		}
		if other.timeout_secs.is_some() {
			self.timeout_secs = other.timeout_secs;
		}
	}

	pub fn finalize(self) -> NotifyConfig {
		NotifyConfig {
			webhooks: self.webhooks.unwrap_or_default(),
			timeout_secs: self.timeout_secs.unwrap_or(10),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyConfig {
	pub webhooks: Vec<WebhookConfig>,
	/// HTTP timeout per webhook delivery
	pub timeout_secs: u64,
}

impl Default for NotifyConfig {
	fn default() -> Self {
		NotifyConfigLayer::default().finalize()
	}
}

impl NotifyConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}
}
