// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::client::GitClient;
use crate::error::GitError;
use crate::locks::RepoLocks;

#[derive(Debug, Clone)]
pub struct GitWorkflowConfig {
	pub branch_prefix: String,
	pub base_branch: String,
	pub dry_run: bool,
	pub enable_pr_creation: bool,
	pub pr_dry_run: bool,
}

impl Default for GitWorkflowConfig {
	fn default() -> Self {
		Self {
			branch_prefix: "sidequest".to_string(),
			base_branch: "main".to_string(),
			dry_run: false,
			enable_pr_creation: false,
			pr_dry_run: false,
		}
	}
}

#[derive(Debug, Clone)]
pub struct BranchRequest {
	pub job_id: String,
	pub job_type: String,
	pub description: String,
}

#[derive(Debug, Clone)]
pub struct CommitRequest {
	pub message: String,
	pub description: Option<String>,
	pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
	Committed { sha: String },
	/// The working tree had no changes; not an error.
	NothingToCommit,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrRequest {
	pub branch_name: String,
	pub title: String,
	pub body: String,
	pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedPr {
	pub url: String,
	pub number: Option<u64>,
}

/// Forge-side pull request creation.
#[async_trait]
pub trait PullRequestClient: Send + Sync {
	async fn create_pull_request(
		&self,
		repo_slug: &str,
		base_branch: &str,
		request: &PrRequest,
	) -> Result<CreatedPr, GitError>;
}

/// Pull request client speaking the GitHub-style REST API.
pub struct HttpPullRequestClient {
	http: reqwest::Client,
	api_url: String,
	token: String,
}

impl HttpPullRequestClient {
	pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, GitError> {
		let http = reqwest::Client::builder()
			.timeout(std::time::Duration::from_secs(30))
			.build()?;
		Ok(Self {
			http,
			api_url: api_url.into().trim_end_matches('/').to_string(),
			token: token.into(),
		})
	}
}

#[async_trait]
impl PullRequestClient for HttpPullRequestClient {
	#[instrument(skip(self, request), fields(branch = %request.branch_name))]
	async fn create_pull_request(
		&self,
		repo_slug: &str,
		base_branch: &str,
		request: &PrRequest,
	) -> Result<CreatedPr, GitError> {
		let url = format!("{}/repos/{repo_slug}/pulls", self.api_url);
		let response = self
			.http
			.post(&url)
			.bearer_auth(&self.token)
			.header("Accept", "application/vnd.github+json")
			.json(&serde_json::json!({
				"title": request.title,
				"head": request.branch_name,
				"base": base_branch,
				"body": request.body,
			}))
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(GitError::PullRequest(format!(
				"forge returned {status}: {body}"
			)));
		}

		let payload: serde_json::Value = response.json().await?;
		let html_url = payload
			.get("html_url")
			.and_then(|v| v.as_str())
			.ok_or_else(|| GitError::PullRequest("response missing html_url".to_string()))?
			.to_string();
		let number = payload.get("number").and_then(|v| v.as_u64());

		if let Some(number) = number {
			if !request.labels.is_empty() {
				let labels_url = format!("{}/repos/{repo_slug}/issues/{number}/labels", self.api_url);
				let labelled = self
					.http
					.post(&labels_url)
					.bearer_auth(&self.token)
					.json(&serde_json::json!({ "labels": request.labels }))
					.send()
					.await;
				if let Err(e) = labelled {
					warn!(error = %e, "failed to apply labels to pull request");
				}
			}
		}

		info!(url = %html_url, "pull request created");
		Ok(CreatedPr {
			url: html_url,
			number,
		})
	}
}

/// Per-job git workflow manager.
///
/// Holds no state beyond configuration; everything it learns about a job is
/// written into the job's git info by the caller.
pub struct GitWorkflow {
	client: Arc<dyn GitClient>,
	pr_client: Option<Arc<dyn PullRequestClient>>,
	config: GitWorkflowConfig,
	locks: RepoLocks,
}

impl GitWorkflow {
	pub fn new(
		client: Arc<dyn GitClient>,
		pr_client: Option<Arc<dyn PullRequestClient>>,
		config: GitWorkflowConfig,
	) -> Self {
		Self {
			client,
			pr_client,
			config,
			locks: RepoLocks::new(),
		}
	}

	pub fn config(&self) -> &GitWorkflowConfig {
		&self.config
	}

	/// Named mutexes serializing jobs per repository path.
	pub fn locks(&self) -> &RepoLocks {
		&self.locks
	}

	pub fn branch_name_for(&self, request: &BranchRequest) -> String {
		format!(
			"{}/{}/{}",
			self.config.branch_prefix,
			request.job_type,
			slugify(&format!("{}-{}", request.job_id, request.description)),
		)
	}

	/// Create the job branch off the base branch.
	///
	/// Fails on a dirty working tree unless dry-run: unrelated local edits
	/// must never ride along on a job branch.
	#[instrument(skip(self, request), fields(job_id = %request.job_id))]
	pub async fn create_job_branch(
		&self,
		repo_path: &Path,
		request: &BranchRequest,
	) -> Result<String, GitError> {
		let branch = self.branch_name_for(request);

		if self.config.dry_run {
			debug!(branch, "dry-run: skipping branch creation");
			return Ok(branch);
		}

		if !self.client.is_repository(repo_path).await {
			return Err(GitError::NotARepository(
				repo_path.display().to_string(),
			));
		}
		if self.client.is_dirty(repo_path).await? {
			return Err(GitError::DirtyWorkingTree(
				repo_path.display().to_string(),
			));
		}

		self
			.client
			.create_branch(repo_path, &branch, &self.config.base_branch)
			.await?;

		Ok(branch)
	}

	#[instrument(skip(self, request), fields(job_id = %request.job_id))]
	pub async fn commit_changes(
		&self,
		repo_path: &Path,
		request: &CommitRequest,
	) -> Result<CommitOutcome, GitError> {
		if self.config.dry_run {
			let sha = synthesized_sha(&request.job_id);
			debug!(sha, "dry-run: skipping commit");
			return Ok(CommitOutcome::Committed { sha });
		}

		if !self.client.is_dirty(repo_path).await? {
			debug!("nothing to commit");
			return Ok(CommitOutcome::NothingToCommit);
		}

		self.client.stage_all(repo_path).await?;

		let message = match &request.description {
			Some(description) => format!("{}\n\n{description}", request.message),
			None => request.message.clone(),
		};
		let sha = self.client.commit(repo_path, &message).await?;

		Ok(CommitOutcome::Committed { sha })
	}

	#[instrument(skip(self))]
	pub async fn push_branch(&self, repo_path: &Path, branch: &str) -> Result<(), GitError> {
		if self.config.dry_run {
			debug!(branch, "dry-run: skipping push");
			return Ok(());
		}

		self.client.push(repo_path, branch).await
	}

	#[instrument(skip(self, request), fields(branch = %request.branch_name))]
	pub async fn create_pull_request(
		&self,
		repo_path: &Path,
		request: &PrRequest,
	) -> Result<String, GitError> {
		if self.config.dry_run || self.config.pr_dry_run {
			let url = format!(
				"https://example.com/dry-run/{}/pull/1",
				request.branch_name
			);
			debug!(url, "dry-run: synthesized pull request");
			return Ok(url);
		}

		let Some(pr_client) = &self.pr_client else {
			return Err(GitError::PullRequest(
				"no forge client configured".to_string(),
			));
		};

		let remote = self.client.remote_url(repo_path).await?;
		let slug = parse_repo_slug(&remote)
			.ok_or_else(|| GitError::RemoteParse(remote.clone()))?;

		let created = pr_client
			.create_pull_request(&slug, &self.config.base_branch, request)
			.await?;
		Ok(created.url)
	}
}

/// Lowercase, alphanumeric-and-hyphen slug, bounded to keep branch names
/// within ref-length limits.
fn slugify(input: &str) -> String {
	let mut out = String::with_capacity(input.len());
	let mut last_dash = true;
	for c in input.chars() {
		if c.is_ascii_alphanumeric() {
			out.push(c.to_ascii_lowercase());
			last_dash = false;
		} else if !last_dash {
			out.push('-');
			last_dash = true;
		}
	}
	while out.ends_with('-') {
		out.pop();
	}
	out.truncate(60);
	while out.ends_with('-') {
		out.pop();
	}
	if out.is_empty() {
		out.push_str("job");
	}
	out
}

/// `owner/repo` from an SSH or HTTPS remote URL.
fn parse_repo_slug(remote: &str) -> Option<String> {
	let trimmed = remote.trim().trim_end_matches(".git");

	let path = if let Some(rest) = trimmed.split_once("://").map(|(_, rest)| rest) {
		// https://host/owner/repo
		rest.split_once('/').map(|(_, path)| path)?
	} else if let Some((_, path)) = trimmed.split_once(':') {
		// git@host:owner/repo
		path
	} else {
		return None;
	};

	let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
	if segments.len() < 2 {
		return None;
	}
	let owner = segments[segments.len() - 2];
	let repo = segments[segments.len() - 1];
	if owner.is_empty() || repo.is_empty() {
		return None;
	}
	Some(format!("{owner}/{repo}"))
}

/// Deterministic 40-hex placeholder SHA for dry-run commits.
fn synthesized_sha(seed: &str) -> String {
	let mut hash: u64 = 0xcbf29ce484222325;
	for byte in seed.bytes() {
		hash ^= byte as u64;
		hash = hash.wrapping_mul(0x100000001b3);
	}
	format!("{hash:016x}{hash:016x}{:08x}", hash as u32)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::command_client::CommandGitClient;
	use std::fs;
	use std::process::Command as StdCommand;
	use tempfile::TempDir;

	fn init_repo_with_commit(dir: &Path) {
		StdCommand::new("git")
			.args(["init", "-b", "main"])
			.current_dir(dir)
			.output()
			.expect("git init failed");
		StdCommand::new("git")
			.args(["config", "user.email", "test@test.com"])
			.current_dir(dir)
			.output()
			.unwrap();
		StdCommand::new("git")
			.args(["config", "user.name", "Test"])
			.current_dir(dir)
			.output()
			.unwrap();
		fs::write(dir.join("README.md"), "# Test").unwrap();
		StdCommand::new("git")
			.args(["add", "."])
			.current_dir(dir)
			.output()
			.unwrap();
		StdCommand::new("git")
			.args(["commit", "-m", "Initial commit"])
			.current_dir(dir)
			.output()
			.unwrap();
	}

	fn workflow(config: GitWorkflowConfig) -> GitWorkflow {
		GitWorkflow::new(Arc::new(CommandGitClient::new()), None, config)
	}

	fn branch_request(job_id: &str) -> BranchRequest {
		BranchRequest {
			job_id: job_id.to_string(),
			job_type: "schema-enhancement".to_string(),
			description: "Add structured data".to_string(),
		}
	}

	#[test]
	fn branch_names_are_prefixed_and_slugged() {
		let wf = workflow(GitWorkflowConfig::default());
		let branch = wf.branch_name_for(&branch_request("job-1700000000000"));
		assert_eq!(
			branch,
			"sidequest/schema-enhancement/job-1700000000000-add-structured-data"
		);
	}

	#[test]
	fn slugify_strips_noise() {
		assert_eq!(slugify("Hello, World!"), "hello-world");
		assert_eq!(slugify("--weird--input--"), "weird-input");
		assert_eq!(slugify("***"), "job");
	}

	#[test]
	fn parse_repo_slug_handles_common_forms() {
		assert_eq!(
			parse_repo_slug("git@github.com:ghuntley/sidequest.git").as_deref(),
			Some("ghuntley/sidequest")
		);
		assert_eq!(
			parse_repo_slug("https://github.com/ghuntley/sidequest.git").as_deref(),
			Some("ghuntley/sidequest")
		);
		assert_eq!(
			parse_repo_slug("https://github.com/ghuntley/sidequest").as_deref(),
			Some("ghuntley/sidequest")
		);
		assert_eq!(parse_repo_slug("/srv/local/repo"), None);
	}

	#[test]
	fn synthesized_sha_looks_like_a_sha() {
		let sha = synthesized_sha("job-1");
		assert_eq!(sha.len(), 40);
		assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
		assert_eq!(sha, synthesized_sha("job-1"));
	}

	/// Dry-run performs no repository side effects while still producing a
	/// branch name, a SHA, and a PR URL.
	#[tokio::test]
	async fn dry_run_synthesizes_without_touching_repo() {
		let temp = TempDir::new().unwrap();
		init_repo_with_commit(temp.path());

		let wf = workflow(GitWorkflowConfig {
			dry_run: true,
			..GitWorkflowConfig::default()
		});

		let branch = wf
			.create_job_branch(temp.path(), &branch_request("job-1"))
			.await
			.unwrap();
		let outcome = wf
			.commit_changes(
				temp.path(),
				&CommitRequest {
					message: "chore: job output".to_string(),
					description: None,
					job_id: "job-1".to_string(),
				},
			)
			.await
			.unwrap();
		wf.push_branch(temp.path(), &branch).await.unwrap();
		let url = wf
			.create_pull_request(
				temp.path(),
				&PrRequest {
					branch_name: branch.clone(),
					title: "Job output".to_string(),
					body: "body".to_string(),
					labels: vec![],
				},
			)
			.await
			.unwrap();

		assert!(branch.starts_with("sidequest/"));
		assert!(matches!(outcome, CommitOutcome::Committed { .. }));
		assert!(url.starts_with("https://example.com/dry-run/"));

		// The repository is untouched: still on main, only one branch.
		let branches = StdCommand::new("git")
			.args(["branch", "--list"])
			.current_dir(temp.path())
			.output()
			.unwrap();
		let output = String::from_utf8_lossy(&branches.stdout);
		assert!(output.contains("main"));
		assert!(!output.contains("sidequest/"));
	}

	#[tokio::test]
	async fn create_branch_fails_on_dirty_tree() {
		let temp = TempDir::new().unwrap();
		init_repo_with_commit(temp.path());
		fs::write(temp.path().join("README.md"), "# Local edits").unwrap();

		let wf = workflow(GitWorkflowConfig::default());
		let err = wf
			.create_job_branch(temp.path(), &branch_request("job-1"))
			.await
			.unwrap_err();
		assert!(matches!(err, GitError::DirtyWorkingTree(_)));
	}

	#[tokio::test]
	async fn create_branch_fails_outside_repository() {
		let temp = TempDir::new().unwrap();

		let wf = workflow(GitWorkflowConfig::default());
		let err = wf
			.create_job_branch(temp.path(), &branch_request("job-1"))
			.await
			.unwrap_err();
		assert!(matches!(err, GitError::NotARepository(_)));
	}

	#[tokio::test]
	async fn commit_flow_produces_sha_then_noop() {
		let temp = TempDir::new().unwrap();
		init_repo_with_commit(temp.path());

		let wf = workflow(GitWorkflowConfig::default());
		let branch = wf
			.create_job_branch(temp.path(), &branch_request("job-1"))
			.await
			.unwrap();
		assert!(branch.starts_with("sidequest/schema-enhancement/"));

		fs::write(temp.path().join("schema.json"), "{}").unwrap();
		let outcome = wf
			.commit_changes(
				temp.path(),
				&CommitRequest {
					message: "feat: add schema".to_string(),
					description: Some("Generated structured data".to_string()),
					job_id: "job-1".to_string(),
				},
			)
			.await
			.unwrap();
		let CommitOutcome::Committed { sha } = outcome else {
			panic!("expected a commit");
		};
		assert_eq!(sha.len(), 40);

		// A second commit attempt with a clean tree is a no-op.
		let outcome = wf
			.commit_changes(
				temp.path(),
				&CommitRequest {
					message: "feat: add schema".to_string(),
					description: None,
					job_id: "job-1".to_string(),
				},
			)
			.await
			.unwrap();
		assert_eq!(outcome, CommitOutcome::NothingToCommit);
	}

	struct StaticPrClient;

	#[async_trait]
	impl PullRequestClient for StaticPrClient {
		async fn create_pull_request(
			&self,
			repo_slug: &str,
			base_branch: &str,
			_request: &PrRequest,
		) -> Result<CreatedPr, GitError> {
			assert_eq!(repo_slug, "ghuntley/sidequest");
			assert_eq!(base_branch, "main");
			Ok(CreatedPr {
				url: "https://github.com/ghuntley/sidequest/pull/7".to_string(),
				number: Some(7),
			})
		}
	}

	#[tokio::test]
	async fn pull_request_goes_through_forge_client() {
		let temp = TempDir::new().unwrap();
		init_repo_with_commit(temp.path());
		StdCommand::new("git")
			.args([
				"remote",
				"add",
				"origin",
				"git@github.com:ghuntley/sidequest.git",
			])
			.current_dir(temp.path())
			.output()
			.unwrap();

		let wf = GitWorkflow::new(
			Arc::new(CommandGitClient::new()),
			Some(Arc::new(StaticPrClient)),
			GitWorkflowConfig {
				enable_pr_creation: true,
				..GitWorkflowConfig::default()
			},
		);

		let url = wf
			.create_pull_request(
				temp.path(),
				&PrRequest {
					branch_name: "sidequest/test/job-1".to_string(),
					title: "Job output".to_string(),
					body: "body".to_string(),
					labels: vec!["automated".to_string()],
				},
			)
			.await
			.unwrap();
		assert_eq!(url, "https://github.com/ghuntley/sidequest/pull/7");
	}

	#[tokio::test]
	async fn pull_request_without_client_is_an_error() {
		let temp = TempDir::new().unwrap();
		init_repo_with_commit(temp.path());

		let wf = workflow(GitWorkflowConfig {
			enable_pr_creation: true,
			..GitWorkflowConfig::default()
		});
		let err = wf
			.create_pull_request(
				temp.path(),
				&PrRequest {
					branch_name: "sidequest/test/job-1".to_string(),
					title: "t".to_string(),
					body: "b".to_string(),
					labels: vec![],
				},
			)
			.await
			.unwrap_err();
		assert!(matches!(err, GitError::PullRequest(_)));
	}
}
