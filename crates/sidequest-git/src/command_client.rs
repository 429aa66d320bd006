// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::client::GitClient;
use crate::error::GitError;

/// Git client implementation using the git CLI.
pub struct CommandGitClient;

impl CommandGitClient {
	pub fn new() -> Self {
		Self
	}
}

impl Default for CommandGitClient {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl GitClient for CommandGitClient {
	async fn is_repository(&self, path: &Path) -> bool {
		run_git(path, &["rev-parse", "--show-toplevel"])
			.await
			.is_ok()
	}

	async fn current_branch(&self, path: &Path) -> Result<String, GitError> {
		run_git(path, &["rev-parse", "--abbrev-ref", "HEAD"]).await
	}

	async fn is_dirty(&self, path: &Path) -> Result<bool, GitError> {
		let output = run_git(path, &["status", "--porcelain"]).await?;
		Ok(!output.is_empty())
	}

	async fn create_branch(&self, path: &Path, branch: &str, base: &str) -> Result<(), GitError> {
		run_git(path, &["checkout", "-b", branch, base]).await?;
		debug!(path = %path.display(), branch, base, "created branch");
		Ok(())
	}

	async fn checkout(&self, path: &Path, branch: &str) -> Result<(), GitError> {
		run_git(path, &["checkout", branch]).await?;
		Ok(())
	}

	async fn stage_all(&self, path: &Path) -> Result<(), GitError> {
		run_git(path, &["add", "-A"]).await?;
		debug!(path = %path.display(), "staged all changes");
		Ok(())
	}

	async fn commit(&self, path: &Path, message: &str) -> Result<String, GitError> {
		run_git(path, &["commit", "-m", message]).await?;

		let sha = run_git(path, &["rev-parse", "HEAD"]).await?;

		debug!(path = %path.display(), sha = %sha, "created commit");
		Ok(sha)
	}

	async fn push(&self, path: &Path, branch: &str) -> Result<(), GitError> {
		run_git(path, &["push", "--set-upstream", "origin", branch]).await?;
		debug!(path = %path.display(), branch, "pushed branch");
		Ok(())
	}

	async fn changed_files(&self, path: &Path) -> Result<Vec<String>, GitError> {
		// Porcelain format: XY filename; first two chars are status, then
		// space, then filename.
		let output = run_git(path, &["status", "--porcelain"])
			.await
			.unwrap_or_default();

		let files: Vec<String> = output
			.lines()
			.filter_map(|line| {
				if line.len() > 3 {
					Some(line[3..].to_string())
				} else {
					None
				}
			})
			.collect();

		debug!(
				path = %path.display(),
				files_count = files.len(),
				"listed changed files"
		);

		Ok(files)
	}

	async fn remote_url(&self, path: &Path) -> Result<String, GitError> {
		run_git(path, &["remote", "get-url", "origin"]).await
	}
}

/// Runs a git command and returns the stdout on success.
async fn run_git(path: &Path, args: &[&str]) -> Result<String, GitError> {
	let mut cmd = Command::new("git");
	cmd.arg("-C").arg(path).args(args);

	trace!(
			cmd = %format!("git -C {} {}", path.display(), args.join(" ")),
			"running git command"
	);

	let output = cmd.output().await.map_err(|e| {
		if e.kind() == std::io::ErrorKind::NotFound {
			warn!("git not found in PATH");
			GitError::GitNotInstalled
		} else {
			GitError::Io(e)
		}
	})?;

	if output.status.success() {
		Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
	} else {
		let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
		Err(GitError::CommandFailed {
			cmd: "git",
			args: args.iter().map(|s| s.to_string()).collect(),
			stderr,
		})
	}
}
