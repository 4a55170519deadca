// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Kubernetes pod launcher for Skein task runs.

pub mod config;
pub mod launcher;
pub mod pod;

pub use config::LauncherConfig;
pub use launcher::PodLauncher;
pub use pod::{build_pod_spec, map_pod_status, parse_image_parts, pod_name, sanitize_label_value, ImageParts};
