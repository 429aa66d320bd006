// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sidequest_core::PipelineError;

#[derive(Clone)]
pub struct CancellationToken {
	cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self {
			cancelled: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}
}

impl Default for CancellationToken {
	fn default() -> Self {
		Self::new()
	}
}

type ProgressFn = dyn Fn(u8, Option<String>) + Send + Sync;

/// Handle given to a running handler.
///
/// Handlers touch the runtime only through this context: the cancellation
/// token for cooperative checkpoints, and the progress channel. The job
/// snapshot they received does not update while they run.
#[derive(Clone)]
pub struct JobContext {
	pub job_id: String,
	pub pipeline_id: String,
	pub cancellation_token: CancellationToken,
	progress: Arc<ProgressFn>,
}

impl JobContext {
	pub fn new(
		job_id: impl Into<String>,
		pipeline_id: impl Into<String>,
		cancellation_token: CancellationToken,
		progress: Arc<ProgressFn>,
	) -> Self {
		Self {
			job_id: job_id.into(),
			pipeline_id: pipeline_id.into(),
			cancellation_token,
			progress,
		}
	}

	/// Context with no progress sink, for tests and direct invocation.
	pub fn detached(job_id: impl Into<String>, pipeline_id: impl Into<String>) -> Self {
		Self::new(
			job_id,
			pipeline_id,
			CancellationToken::new(),
			Arc::new(|_, _| {}),
		)
	}

	pub fn report_progress(&self, progress: u8, operation: Option<&str>) {
		(self.progress)(progress.min(100), operation.map(|s| s.to_string()));
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancellation_token.is_cancelled()
	}

	/// Cooperative checkpoint: returns the cancelled error when a cancel has
	/// been requested.
	pub fn check_cancelled(&self) -> std::result::Result<(), PipelineError> {
		if self.is_cancelled() {
			Err(PipelineError::cancelled())
		} else {
			Ok(())
		}
	}
}
