// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-pipeline runtime configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
	/// Upper bound on concurrently running handlers for this pipeline.
	pub max_concurrent: usize,
	/// Retry budget consulted by the retry controller when a chain is created.
	pub retry_attempts: u32,
	/// Base backoff delay in milliseconds.
	pub retry_delay_ms: u64,
	/// Whether terminal job state is written through to the store.
	pub persistence_enabled: bool,
	/// Whether the scheduler wraps handlers in the branch/commit/push/PR
	/// workflow.
	pub enable_git_workflow: bool,
}

impl PipelineConfig {
	pub fn retry_delay(&self) -> Duration {
		Duration::from_millis(self.retry_delay_ms)
	}
}

impl Default for PipelineConfig {
	fn default() -> Self {
		Self {
			max_concurrent: DEFAULT_MAX_CONCURRENT,
			retry_attempts: DEFAULT_RETRY_ATTEMPTS,
			retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
			persistence_enabled: true,
			enable_git_workflow: false,
		}
	}
}
