// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! K8s client abstraction for Skein run pods.
//!
//! This crate provides:
//! - A trait-based K8s client abstraction for testability
//! - Production implementation using the kube crate
//! - Re-exports of the k8s-openapi types the launcher builds pods from

mod client;
mod error;
mod kube_client;
mod types;

pub use client::K8sClient;
pub use error::{K8sError, K8sResult};
pub use kube_client::KubeClient;
pub use types::{
	Capabilities, Container, ContainerState, ContainerStateTerminated, ContainerStateWaiting,
	ContainerStatus, EnvVar, LocalObjectReference, Namespace, ObjectMeta, Pod, PodSecurityContext,
	PodSpec, PodStatus, SeccompProfile, SecurityContext,
};
