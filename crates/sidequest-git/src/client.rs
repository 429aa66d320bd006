// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::Path;

use async_trait::async_trait;

use crate::error::GitError;

/// Capability surface the workflow manager needs from git.
///
/// The production implementation shells out to the git CLI
/// ([`crate::CommandGitClient`]); tests may substitute their own.
#[async_trait]
pub trait GitClient: Send + Sync {
	async fn is_repository(&self, path: &Path) -> bool;

	async fn current_branch(&self, path: &Path) -> Result<String, GitError>;

	/// Whether the working tree has staged, unstaged, or untracked changes.
	async fn is_dirty(&self, path: &Path) -> Result<bool, GitError>;

	/// Create `branch` off `base` and switch to it.
	async fn create_branch(&self, path: &Path, branch: &str, base: &str) -> Result<(), GitError>;

	async fn checkout(&self, path: &Path, branch: &str) -> Result<(), GitError>;

	async fn stage_all(&self, path: &Path) -> Result<(), GitError>;

	/// Commit staged changes, returning the commit SHA.
	async fn commit(&self, path: &Path, message: &str) -> Result<String, GitError>;

	async fn push(&self, path: &Path, branch: &str) -> Result<(), GitError>;

	/// Files changed in the working tree (staged + unstaged + untracked).
	async fn changed_files(&self, path: &Path) -> Result<Vec<String>, GitError>;

	/// URL of the `origin` remote.
	async fn remote_url(&self, path: &Path) -> Result<String, GitError>;
}
