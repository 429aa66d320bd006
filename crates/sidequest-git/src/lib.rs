// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Git workflow manager for Sidequest jobs.
//!
//! Wraps a job in the branch → commit → push → pull-request sequence:
//!
//! ```text
//!  NoBranch ──create_job_branch──▶ BranchCreated
//!  BranchCreated ──commit_changes──▶ Committed
//!  Committed ──push_branch──▶ Pushed
//!  Pushed ──create_pull_request──▶ PrCreated
//!  any state ──error──▶ Failed (surfaced non-fatally; the job's own
//!                               outcome stands)
//! ```
//!
//! With `dry_run` every operation succeeds without touching the repository;
//! branch names, commit SHAs, and PR URLs are synthesized.

pub mod client;
pub mod command_client;
pub mod error;
pub mod locks;
pub mod workflow;

pub use client::GitClient;
pub use command_client::CommandGitClient;
pub use error::GitError;
pub use locks::RepoLocks;
pub use workflow::{
	BranchRequest, CommitOutcome, CommitRequest, CreatedPr, GitWorkflow, GitWorkflowConfig,
	HttpPullRequestClient, PrRequest, PullRequestClient,
};
