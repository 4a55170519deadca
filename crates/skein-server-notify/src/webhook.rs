// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Webhook delivery for run notifications.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skein_sched_core::{NotificationEvent, NotificationKind, Notifier};
use tracing::{debug, error, warn};

use crate::error::NotifyError;
use crate::signature;

pub const SIGNATURE_HEADER: &str = "X-Skein-Signature";

/// Configuration for a webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
	pub url: String,
	/// Notification kinds delivered to this endpoint
	#[serde(default = "all_kinds")]
	pub events: Vec<NotificationKind>,
	/// HMAC secret for signing payloads
	#[serde(default)]
	pub secret: Option<String>,
}

fn all_kinds() -> Vec<NotificationKind> {
	vec![NotificationKind::OnFailure, NotificationKind::OnRetry]
}

/// Payload POSTed to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
	/// `run.failed` or `run.retrying`
	pub event: &'static str,
	pub timestamp: DateTime<Utc>,
	pub task: String,
	pub run_id: String,
	pub attempt: u32,
	pub max_retries: u32,
	pub scheduled_at: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub owner: Option<String>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub email: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub next_backoff_ms: Option<u64>,
}

impl WebhookPayload {
	pub fn from_event(event: &NotificationEvent, timestamp: DateTime<Utc>) -> Self {
		let name = match event.kind {
			NotificationKind::OnFailure => "run.failed",
			NotificationKind::OnRetry => "run.retrying",
		};
		Self {
			event: name,
			timestamp,
			task: event.task_name.clone(),
			run_id: event.run_id.to_string(),
			attempt: event.context.attempt,
			max_retries: event.context.max_retries,
			scheduled_at: event.context.scheduled_at,
			reason: event.context.failure_reason.as_ref().map(ToString::to_string),
			owner: event.context.owner.clone(),
			email: event.context.email.clone(),
			next_backoff_ms: event.context.next_backoff_ms,
		}
	}
}

/// One HTTP request ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
	pub url: String,
	pub body: String,
	pub signature: Option<String>,
}

/// Posts notifications to every configured webhook subscribed to the
/// event's kind. Each delivery runs on its own task.
#[derive(Clone)]
pub struct WebhookNotifier {
	webhooks: Vec<WebhookConfig>,
	http_client: reqwest::Client,
}

impl WebhookNotifier {
	pub fn new(webhooks: Vec<WebhookConfig>, timeout: Duration) -> Result<Self, NotifyError> {
		let http_client = reqwest::Client::builder().timeout(timeout).build()?;
		Ok(Self {
			webhooks,
			http_client,
		})
	}

	pub fn webhook_count(&self) -> usize {
		self.webhooks.len()
	}

	/// Build the signed requests for `event` without sending them.
	pub fn deliveries(&self, event: &NotificationEvent) -> Result<Vec<Delivery>, NotifyError> {
		let matching: Vec<&WebhookConfig> = self
			.webhooks
			.iter()
			.filter(|w| w.events.contains(&event.kind))
			.collect();
		if matching.is_empty() {
			return Ok(Vec::new());
		}

		let body = serde_json::to_string(&WebhookPayload::from_event(event, Utc::now()))?;
		Ok(matching
			.into_iter()
			.map(|webhook| Delivery {
				url: webhook.url.clone(),
				body: body.clone(),
				signature: webhook
					.secret
					.as_ref()
					.map(|secret| signature::sign(secret.as_bytes(), body.as_bytes())),
			})
			.collect())
	}

	async fn send(client: reqwest::Client, delivery: Delivery) {
		let mut request = client
			.post(&delivery.url)
			.header("Content-Type", "application/json")
			.body(delivery.body);
		if let Some(signature) = delivery.signature {
			request = request.header(SIGNATURE_HEADER, signature);
		}

		match request.send().await {
			Ok(response) if response.status().is_success() => {
				debug!(url = %delivery.url, "Webhook delivered successfully");
			}
			Ok(response) => {
				warn!(
					url = %delivery.url,
					status = %response.status(),
					"Webhook returned non-success status"
				);
			}
			Err(e) => {
				error!(url = %delivery.url, error = %e, "Failed to deliver webhook");
			}
		}
	}
}

#[async_trait]
impl Notifier for WebhookNotifier {
	async fn notify(&self, event: NotificationEvent) {
		let deliveries = match self.deliveries(&event) {
			Ok(deliveries) => deliveries,
			Err(e) => {
				error!(task = %event.task_name, error = %e, "Failed to build webhook payload");
				return;
			}
		};
		if deliveries.is_empty() {
			debug!(kind = %event.kind, "No webhooks configured for event");
			return;
		}

		for delivery in deliveries {
			tokio::spawn(Self::send(self.http_client.clone(), delivery));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use skein_sched_core::{FailureReason, NotificationContext, RunId};

	fn event(kind: NotificationKind) -> NotificationEvent {
		NotificationEvent {
			task_name: "etl".to_string(),
			run_id: RunId::new(),
			kind,
			context: NotificationContext {
				attempt: 2,
				max_retries: 3,
				scheduled_at: Utc::now(),
				failure_reason: Some(FailureReason::Timeout),
				owner: Some("data".to_string()),
				email: vec!["oncall@example.com".to_string()],
				next_backoff_ms: Some(2000),
			},
		}
	}

	fn webhook(url: &str, events: Vec<NotificationKind>, secret: Option<&str>) -> WebhookConfig {
		WebhookConfig {
			url: url.to_string(),
			events,
			secret: secret.map(str::to_string),
		}
	}

	#[test]
	fn test_deliveries_filter_by_kind() {
		let notifier = WebhookNotifier::new(
			vec![
				webhook("http://a", vec![NotificationKind::OnFailure], None),
				webhook("http://b", all_kinds(), None),
				webhook("http://c", vec![NotificationKind::OnRetry], None),
			],
			Duration::from_secs(1),
		)
		.unwrap();

		let urls: Vec<String> = notifier
			.deliveries(&event(NotificationKind::OnFailure))
			.unwrap()
			.into_iter()
			.map(|d| d.url)
			.collect();
		assert_eq!(urls, vec!["http://a", "http://b"]);

		let urls: Vec<String> = notifier
			.deliveries(&event(NotificationKind::OnRetry))
			.unwrap()
			.into_iter()
			.map(|d| d.url)
			.collect();
		assert_eq!(urls, vec!["http://b", "http://c"]);
	}

	#[test]
	fn test_deliveries_are_signed_when_secret_set() {
		let notifier = WebhookNotifier::new(
			vec![
				webhook("http://signed", all_kinds(), Some("s3cret")),
				webhook("http://plain", all_kinds(), None),
			],
			Duration::from_secs(1),
		)
		.unwrap();

		let deliveries = notifier
			.deliveries(&event(NotificationKind::OnFailure))
			.unwrap();
		let signed = &deliveries[0];
		let signature = signed.signature.as_deref().unwrap();
		assert!(signature::verify(b"s3cret", signed.body.as_bytes(), signature));
		assert_eq!(deliveries[1].signature, None);
	}

	#[test]
	fn test_payload_shape() {
		let event = event(NotificationKind::OnRetry);
		let payload = WebhookPayload::from_event(&event, Utc::now());
		let json: serde_json::Value = serde_json::to_value(&payload).unwrap();

		assert_eq!(json["event"], "run.retrying");
		assert_eq!(json["task"], "etl");
		assert_eq!(json["run_id"], event.run_id.to_string());
		assert_eq!(json["attempt"], 2);
		assert_eq!(json["reason"], "execution timed out");
		assert_eq!(json["next_backoff_ms"], 2000);
	}

	#[test]
	fn test_optional_fields_are_skipped() {
		let mut event = event(NotificationKind::OnFailure);
		event.context.owner = None;
		event.context.email.clear();
		event.context.next_backoff_ms = None;

		let json = serde_json::to_string(&WebhookPayload::from_event(&event, Utc::now())).unwrap();
		assert!(json.contains("run.failed"));
		assert!(!json.contains("owner"));
		assert!(!json.contains("email"));
		assert!(!json.contains("next_backoff_ms"));
	}

	#[test]
	fn test_config_defaults_to_all_kinds() {
		let config: WebhookConfig = serde_json::from_str(r#"{"url":"http://x"}"#).unwrap();
		assert_eq!(config.events, all_kinds());
		assert_eq!(config.secret, None);
	}

	#[tokio::test]
	async fn test_notify_without_matching_webhooks_is_noop() {
		let notifier = WebhookNotifier::new(
			vec![webhook("http://a", vec![NotificationKind::OnRetry], None)],
			Duration::from_secs(1),
		)
		.unwrap();
		notifier.notify(event(NotificationKind::OnFailure)).await;
	}
}
