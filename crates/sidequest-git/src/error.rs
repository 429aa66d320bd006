// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum GitError {
	#[error("git is not installed or not in PATH")]
	GitNotInstalled,

	#[error("not a git repository: {0}")]
	NotARepository(String),

	#[error("working tree is dirty: {0}")]
	DirtyWorkingTree(String),

	#[error("{cmd} {args:?} failed: {stderr}")]
	CommandFailed {
		cmd: &'static str,
		args: Vec<String>,
		stderr: String,
	},

	#[error("cannot determine repository slug from remote: {0}")]
	RemoteParse(String),

	#[error("pull request failed: {0}")]
	PullRequest(String),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}
