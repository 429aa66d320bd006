// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use sidequest_core::{ErrorCategory, Job, PipelineError};
use sidequest_scheduler::{JobContext, PipelineHandler};

pub const PIPELINE_ID: &str = "repomix";

/// Last bytes of captured output kept on failures.
const OUTPUT_TAIL_CAP: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct RepomixConfig {
	pub binary: String,
	pub output_dir: PathBuf,
	pub timeout: Duration,
	pub preflight_timeout: Duration,
	pub additional_ignores: Vec<String>,
}

impl Default for RepomixConfig {
	fn default() -> Self {
		Self {
			binary: "repomix".to_string(),
			output_dir: PathBuf::from("./repomix-output"),
			timeout: Duration::from_secs(600),
			preflight_timeout: Duration::from_secs(15),
			additional_ignores: Vec::new(),
		}
	}
}

/// Packs a repository into a single review-ready file with the external
/// `repomix` tool.
pub struct RepomixWorker {
	config: RepomixConfig,
}

impl RepomixWorker {
	pub fn new(config: RepomixConfig) -> Self {
		Self { config }
	}

	/// Job data for packing `target`.
	pub fn job_data(target: &Path) -> serde_json::Value {
		serde_json::json!({ "path": target.to_string_lossy() })
	}

	fn output_path_for(&self, target: &Path) -> PathBuf {
		let name = target
			.file_name()
			.map(|n| n.to_string_lossy().to_string())
			.unwrap_or_else(|| "repository".to_string());
		self.config.output_dir.join(format!("{name}.repomix.txt"))
	}

	fn spawn_error(&self, err: std::io::Error, command_line: &str) -> PipelineError {
		let code = match err.kind() {
			std::io::ErrorKind::NotFound => Some("ENOENT"),
			std::io::ErrorKind::PermissionDenied => Some("EACCES"),
			_ => None,
		};
		let mut out = PipelineError::new(format!("spawn {} failed: {err}", self.config.binary))
			.with_category(ErrorCategory::SpawnFailure)
			.with_context("command", command_line)
			.with_cause(err);
		if let Some(code) = code {
			out = out.with_code(code);
		}
		out
	}

	fn exit_error(&self, status_code: Option<i32>, stderr: &str, command_line: &str) -> PipelineError {
		let tail = output_tail(stderr);
		let lower = tail.to_lowercase();

		let base = PipelineError::new(format!(
			"{} exited with status {:?}",
			self.config.binary, status_code
		))
		.with_stack(tail.clone())
		.with_context("command", command_line);

		// Classify by stderr pattern; the classifier handles the rest.
		if lower.contains("enoent") || lower.contains("no such file") {
			base.with_category(ErrorCategory::NotFound)
		} else if lower.contains("eacces") || lower.contains("permission denied") {
			base.with_category(ErrorCategory::Permission)
		} else if lower.contains("rate limit") || lower.contains("429") {
			base.with_category(ErrorCategory::RateLimit)
		} else {
			base
		}
	}
}

#[async_trait]
impl PipelineHandler for RepomixWorker {
	fn pipeline_id(&self) -> &str {
		PIPELINE_ID
	}

	/// Preflight: verify the external tool answers `--version`. A timeout is
	/// tolerated (the host may be under load); a missing binary is not.
	async fn initialize(&self) -> Result<(), PipelineError> {
		let mut cmd = Command::new(&self.config.binary);
		cmd.arg("--version")
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let spawned = cmd.output();
		match tokio::time::timeout(self.config.preflight_timeout, spawned).await {
			Err(_) => {
				warn!(binary = %self.config.binary, "preflight timed out; continuing");
				Ok(())
			}
			Ok(Err(e)) => Err(self.spawn_error(e, &format!("{} --version", self.config.binary))),
			Ok(Ok(output)) => {
				debug!(
					binary = %self.config.binary,
					version = %String::from_utf8_lossy(&output.stdout).trim(),
					"preflight ok"
				);
				Ok(())
			}
		}
	}

	#[instrument(skip(self, job, ctx), fields(job_id = %job.id))]
	async fn run_job_handler(
		&self,
		job: &Job,
		ctx: &JobContext,
	) -> Result<serde_json::Value, PipelineError> {
		ctx.check_cancelled()?;

		let target = job
			.data
			.get("path")
			.and_then(|v| v.as_str())
			.ok_or_else(|| PipelineError::validation("missing required field: path"))?;
		let target = PathBuf::from(target);

		// Temp trees vanish mid-sweep; validating up front turns an opaque
		// spawn error into a clean non-retryable not-found.
		ctx.report_progress(5, Some("validating target"));
		let metadata = tokio::fs::metadata(&target).await.map_err(|_| {
			PipelineError::not_found(format!("target directory not found: {}", target.display()))
		})?;
		if !metadata.is_dir() {
			return Err(PipelineError::validation(format!(
				"target is not a directory: {}",
				target.display()
			)));
		}

		tokio::fs::create_dir_all(&self.config.output_dir)
			.await
			.map_err(PipelineError::from)?;
		let output_path = self.output_path_for(&target);

		let mut args: Vec<String> = vec![
			"--output".to_string(),
			output_path.to_string_lossy().to_string(),
		];
		for ignore in &self.config.additional_ignores {
			args.push("--ignore".to_string());
			args.push(ignore.clone());
		}
		let command_line = format!(
			"{} {} (cwd: {})",
			self.config.binary,
			args.join(" "),
			target.display()
		);

		ctx.check_cancelled()?;
		ctx.report_progress(20, Some("running repomix"));

		let mut cmd = Command::new(&self.config.binary);
		cmd.args(&args)
			.current_dir(&target)
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let output = match tokio::time::timeout(self.config.timeout, cmd.output()).await {
			Err(_) => {
				return Err(
					PipelineError::timeout(format!(
						"{} timed out after {}s",
						self.config.binary,
						self.config.timeout.as_secs()
					))
					.with_context("command", &command_line),
				);
			}
			Ok(Err(e)) => return Err(self.spawn_error(e, &command_line)),
			Ok(Ok(output)) => output,
		};

		if !output.status.success() {
			let stderr = String::from_utf8_lossy(&output.stderr);
			return Err(self.exit_error(output.status.code(), &stderr, &command_line));
		}

		ctx.report_progress(90, Some("collecting output"));
		let bytes_written = tokio::fs::metadata(&output_path)
			.await
			.map(|m| m.len())
			.unwrap_or(0);

		info!(
			target = %target.display(),
			output = %output_path.display(),
			bytes_written,
			"repomix completed"
		);

		Ok(serde_json::json!({
			"output_path": output_path.to_string_lossy(),
			"bytes_written": bytes_written,
			"stdout_tail": output_tail(&String::from_utf8_lossy(&output.stdout)),
		}))
	}
}

/// Last `OUTPUT_TAIL_CAP` bytes of `text`, on a char boundary.
fn output_tail(text: &str) -> String {
	if text.len() <= OUTPUT_TAIL_CAP {
		return text.to_string();
	}
	let mut start = text.len() - OUTPUT_TAIL_CAP;
	while !text.is_char_boundary(start) {
		start += 1;
	}
	text[start..].to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use sidequest_retry::classify;

	fn job_for(data: serde_json::Value) -> Job {
		Job::queued("repomix-1", PIPELINE_ID, data, 3, Utc::now())
	}

	fn worker_with(binary: &str, output_dir: &Path) -> RepomixWorker {
		RepomixWorker::new(RepomixConfig {
			binary: binary.to_string(),
			output_dir: output_dir.to_path_buf(),
			timeout: Duration::from_secs(10),
			preflight_timeout: Duration::from_secs(5),
			additional_ignores: vec!["node_modules".to_string()],
		})
	}

	#[tokio::test]
	async fn missing_path_field_is_validation() {
		let dir = tempfile::tempdir().unwrap();
		let worker = worker_with("echo", dir.path());
		let ctx = JobContext::detached("repomix-1", PIPELINE_ID);

		let err = worker
			.run_job_handler(&job_for(serde_json::json!({})), &ctx)
			.await
			.unwrap_err();
		let classification = classify(&err);
		assert_eq!(classification.category, ErrorCategory::Validation);
		assert!(!classification.retryable);
	}

	#[tokio::test]
	async fn vanished_target_is_not_retryable() {
		let dir = tempfile::tempdir().unwrap();
		let worker = worker_with("echo", dir.path());
		let ctx = JobContext::detached("repomix-1", PIPELINE_ID);

		let err = worker
			.run_job_handler(
				&job_for(serde_json::json!({"path": "/tmp/definitely-gone-by-now"})),
				&ctx,
			)
			.await
			.unwrap_err();
		let classification = classify(&err);
		assert_eq!(classification.category, ErrorCategory::NotFound);
		assert!(!classification.retryable);
	}

	#[tokio::test]
	async fn missing_binary_is_spawn_failure() {
		let out = tempfile::tempdir().unwrap();
		let target = tempfile::tempdir().unwrap();
		let worker = worker_with("definitely-not-a-real-binary-xyz", out.path());
		let ctx = JobContext::detached("repomix-1", PIPELINE_ID);

		let err = worker
			.run_job_handler(
				&job_for(serde_json::json!({"path": target.path().to_str().unwrap()})),
				&ctx,
			)
			.await
			.unwrap_err();
		assert_eq!(err.code.as_deref(), Some("ENOENT"));

		let classification = classify(&err);
		assert_eq!(classification.category, ErrorCategory::SpawnFailure);
		// ENOENT on spawn means the environment is gone; retrying spawns
		// into the same hole.
		assert!(!classification.retryable);
	}

	#[tokio::test]
	async fn successful_run_reports_output_path() {
		let out = tempfile::tempdir().unwrap();
		let target = tempfile::tempdir().unwrap();
		// `echo` accepts the flags and exits zero; no output file appears,
		// which the handler reports as zero bytes.
		let worker = worker_with("echo", out.path());
		let ctx = JobContext::detached("repomix-1", PIPELINE_ID);

		let result = worker
			.run_job_handler(
				&job_for(serde_json::json!({"path": target.path().to_str().unwrap()})),
				&ctx,
			)
			.await
			.unwrap();

		let output_path = result.get("output_path").unwrap().as_str().unwrap();
		assert!(output_path.ends_with(".repomix.txt"));
		assert_eq!(result.get("bytes_written").unwrap().as_u64(), Some(0));
	}

	#[tokio::test]
	async fn nonzero_exit_with_missing_file_stderr_is_not_found() {
		let out = tempfile::tempdir().unwrap();
		let worker = worker_with("echo", out.path());
		let err = worker.exit_error(
			Some(1),
			"Error: ENOENT: no such file or directory, open 'repomix.config.json'",
			"repomix --output x",
		);
		let classification = classify(&err);
		assert_eq!(classification.category, ErrorCategory::NotFound);
	}

	#[tokio::test]
	async fn preflight_with_echo_succeeds() {
		let out = tempfile::tempdir().unwrap();
		let worker = worker_with("echo", out.path());
		worker.initialize().await.unwrap();
	}

	#[tokio::test]
	async fn preflight_with_missing_binary_fails() {
		let out = tempfile::tempdir().unwrap();
		let worker = worker_with("definitely-not-a-real-binary-xyz", out.path());
		assert!(worker.initialize().await.is_err());
	}

	#[test]
	fn output_tail_caps_long_text() {
		let text = "x".repeat(OUTPUT_TAIL_CAP * 2);
		assert_eq!(output_tail(&text).len(), OUTPUT_TAIL_CAP);
		assert_eq!(output_tail("short"), "short");
	}

	#[tokio::test]
	async fn cancelled_before_start_raises_cancelled() {
		let out = tempfile::tempdir().unwrap();
		let worker = worker_with("echo", out.path());
		let ctx = JobContext::detached("repomix-1", PIPELINE_ID);
		ctx.cancellation_token.cancel();

		let err = worker
			.run_job_handler(&job_for(serde_json::json!({"path": "/tmp"})), &ctx)
			.await
			.unwrap_err();
		assert!(err.is_cancelled());
	}
}
