// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Notification delivery for Skein runs.
//!
//! - [`WebhookNotifier`] POSTs signed JSON to configured endpoints
//! - [`LogNotifier`] writes a structured log record
//! - [`FanoutNotifier`] combines several notifiers

mod error;
mod log;
pub mod signature;
mod webhook;

pub use error::NotifyError;
pub use log::{FanoutNotifier, LogNotifier};
pub use webhook::{Delivery, WebhookConfig, WebhookNotifier, WebhookPayload, SIGNATURE_HEADER};
