// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Command-backed collaborator implementations.
//!
//! The scanning and schema-generation logic lives outside the runtime; the
//! deployment configures commands (typically scripts) that speak JSON on
//! stdout. These adapters spawn them with a timeout and classify failures
//! the same way the repomix worker does.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use sidequest_core::{ErrorCategory, PipelineError};

use crate::duplicate_detection::{DuplicateScanner, ScanResult};
use crate::repo_config::RepositoryConfig;
use crate::schema_enhance::SchemaGenerator;

const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(300);

fn split_command(command: &str) -> Result<(String, Vec<String>), PipelineError> {
	let mut parts = command.split_whitespace().map(String::from);
	let program = parts
		.next()
		.ok_or_else(|| PipelineError::validation("collaborator command not configured"))?;
	Ok((program, parts.collect()))
}

async fn run_json_command(
	command: &str,
	extra_args: &[String],
	stdin_payload: Option<&str>,
	timeout: Duration,
) -> Result<serde_json::Value, PipelineError> {
	let (program, mut args) = split_command(command)?;
	args.extend(extra_args.iter().cloned());
	let command_line = format!("{program} {}", args.join(" "));

	let mut cmd = Command::new(&program);
	cmd.args(&args)
		.stdin(if stdin_payload.is_some() {
			Stdio::piped()
		} else {
			Stdio::null()
		})
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true);

	let run = async {
		let mut child = cmd.spawn().map_err(|e| {
			let mut out = PipelineError::new(format!("spawn {program} failed: {e}"))
				.with_category(ErrorCategory::SpawnFailure)
				.with_context("command", &command_line);
			if e.kind() == std::io::ErrorKind::NotFound {
				out = out.with_code("ENOENT");
			}
			out
		})?;

		if let Some(payload) = stdin_payload {
			if let Some(mut stdin) = child.stdin.take() {
				stdin
					.write_all(payload.as_bytes())
					.await
					.map_err(PipelineError::from)?;
			}
		}

		child.wait_with_output().await.map_err(PipelineError::from)
	};

	let output = tokio::time::timeout(timeout, run)
		.await
		.map_err(|_| {
			PipelineError::timeout(format!(
				"{program} timed out after {}s",
				timeout.as_secs()
			))
			.with_context("command", &command_line)
		})??;

	if !output.status.success() {
		let stderr = String::from_utf8_lossy(&output.stderr);
		return Err(
			PipelineError::new(format!(
				"{program} exited with status {:?}",
				output.status.code()
			))
			.with_stack(stderr.trim().to_string())
			.with_context("command", &command_line),
		);
	}

	let stdout = String::from_utf8_lossy(&output.stdout);
	debug!(command = %command_line, bytes = stdout.len(), "collaborator output captured");
	Ok(serde_json::from_str(stdout.trim())?)
}

/// Scanner that delegates to configured commands.
pub struct CommandScanner {
	intra_command: String,
	inter_command: Option<String>,
	timeout: Duration,
}

impl CommandScanner {
	pub fn new(intra_command: impl Into<String>, inter_command: Option<String>) -> Self {
		Self {
			intra_command: intra_command.into(),
			inter_command,
			timeout: DEFAULT_COLLABORATOR_TIMEOUT,
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}
}

#[async_trait]
impl DuplicateScanner for CommandScanner {
	async fn scan_intra(&self, repo: &RepositoryConfig) -> Result<ScanResult, PipelineError> {
		let args = vec![repo.path.to_string_lossy().to_string()];
		let value = run_json_command(&self.intra_command, &args, None, self.timeout).await?;
		Ok(serde_json::from_value(value)?)
	}

	async fn scan_inter(&self, repos: &[RepositoryConfig]) -> Result<ScanResult, PipelineError> {
		let command = self.inter_command.as_deref().unwrap_or(&self.intra_command);
		let args: Vec<String> = repos
			.iter()
			.map(|r| r.path.to_string_lossy().to_string())
			.collect();
		let value = run_json_command(command, &args, None, self.timeout).await?;
		Ok(serde_json::from_value(value)?)
	}
}

/// Schema generator that feeds the file content to a configured command on
/// stdin and expects the JSON-LD document on stdout.
pub struct CommandSchemaGenerator {
	command: String,
	timeout: Duration,
}

impl CommandSchemaGenerator {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			timeout: DEFAULT_COLLABORATOR_TIMEOUT,
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}
}

#[async_trait]
impl SchemaGenerator for CommandSchemaGenerator {
	async fn generate(
		&self,
		file_name: &str,
		content: &str,
	) -> Result<serde_json::Value, PipelineError> {
		let args = vec![file_name.to_string()];
		run_json_command(&self.command, &args, Some(content), self.timeout).await
	}
}
