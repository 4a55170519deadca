// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Result type alias for K8s operations.
pub type K8sResult<T> = Result<T, K8sError>;

/// Errors that can occur during K8s operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum K8sError {
	#[error("K8s API error ({code:?}): {message}")]
	ApiError { code: Option<u16>, message: String },

	#[error("Pod not found: {name}")]
	PodNotFound { name: String },

	#[error("Namespace not found: {name}")]
	NamespaceNotFound { name: String },

	#[error("Operation timed out")]
	Timeout,
}

impl K8sError {
	/// Whether repeating the same call may succeed: timeouts, throttling,
	/// server-side errors, and failures that never got an HTTP status.
	pub fn is_transient(&self) -> bool {
		match self {
			K8sError::Timeout => true,
			K8sError::ApiError { code: None, .. } => true,
			K8sError::ApiError {
				code: Some(code), ..
			} => *code == 429 || *code >= 500,
			K8sError::PodNotFound { .. } | K8sError::NamespaceNotFound { .. } => false,
		}
	}
}

impl From<kube::Error> for K8sError {
	fn from(err: kube::Error) -> Self {
		let code = match &err {
			kube::Error::Api(response) => Some(response.code),
			_ => None,
		};
		K8sError::ApiError {
			code,
			message: err.to_string(),
		}
	}
}
