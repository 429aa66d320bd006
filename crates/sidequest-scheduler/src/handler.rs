// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;

use sidequest_core::{ErrorCategory, Job, PipelineError};

use crate::context::JobContext;

/// Commit message produced by a pipeline for the wrapper git workflow.
#[derive(Debug, Clone)]
pub struct CommitMessage {
	pub title: String,
	pub body: String,
}

/// Pull request description produced by a pipeline.
#[derive(Debug, Clone)]
pub struct PrContext {
	pub branch_name: String,
	pub title: String,
	pub body: String,
	pub labels: Vec<String>,
}

/// A pipeline's declaration of when its handler is safe to retry.
///
/// Handlers must be idempotent with respect to externally observable side
/// effects for every category they allow; a pipeline that cannot guarantee
/// this narrows or disables retries here, and the scheduler downgrades the
/// classifier's verdict accordingly.
#[derive(Debug, Clone, Default)]
pub enum RetryPolicy {
	/// Accept the classifier's verdict unchanged.
	#[default]
	FollowClassifier,
	/// Never retry, whatever the classification says.
	Never,
	/// Retry only for these categories.
	Only(BTreeSet<ErrorCategory>),
}

impl RetryPolicy {
	pub fn permits(&self, category: ErrorCategory) -> bool {
		match self {
			RetryPolicy::FollowClassifier => true,
			RetryPolicy::Never => false,
			RetryPolicy::Only(allowed) => allowed.contains(&category),
		}
	}
}

/// Contract every pipeline implements against the scheduler.
#[async_trait]
pub trait PipelineHandler: Send + Sync {
	fn pipeline_id(&self) -> &str;

	/// Pipeline-specific warm-up (loading config, preflight checks).
	/// Idempotent; the registry runs it once per instantiation.
	async fn initialize(&self) -> Result<(), PipelineError> {
		Ok(())
	}

	/// The actual work. Runs on its own task; communicates with the runtime
	/// only through the job snapshot, the context, and the return value.
	async fn run_job_handler(
		&self,
		job: &Job,
		ctx: &JobContext,
	) -> Result<serde_json::Value, PipelineError>;

	fn retry_policy(&self) -> RetryPolicy {
		RetryPolicy::FollowClassifier
	}

	/// Repository the wrapper git workflow operates on, derived from job
	/// data. `None` disables the wrapper for this job.
	fn repo_path(&self, job: &Job) -> Option<PathBuf> {
		job
			.data
			.get("repo_path")
			.or_else(|| job.data.get("path"))
			.and_then(|v| v.as_str())
			.map(PathBuf::from)
	}

	fn commit_message(&self, job: &Job) -> CommitMessage {
		CommitMessage {
			title: format!("chore({}): job {}", self.pipeline_id(), job.id),
			body: String::new(),
		}
	}

	fn pr_context(&self, job: &Job, commit: &CommitMessage) -> PrContext {
		PrContext {
			branch_name: job
				.git
				.as_ref()
				.and_then(|g| g.branch_name.clone())
				.unwrap_or_default(),
			title: commit.title.clone(),
			body: commit.body.clone(),
			labels: vec!["automated".to_string()],
		}
	}
}
