// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use sidequest_core::{Job, PipelineError};
use sidequest_scheduler::{CommitMessage, JobContext, PipelineHandler, PrContext};

pub const PIPELINE_ID: &str = "schema-enhancement";

const SCHEMA_MARKER: &str = "application/ld+json";

/// Produces the structured-data document for a content file. The concrete
/// implementation (LLM-backed in production) lives outside the runtime.
#[async_trait]
pub trait SchemaGenerator: Send + Sync {
	async fn generate(
		&self,
		file_name: &str,
		content: &str,
	) -> Result<serde_json::Value, PipelineError>;
}

/// Injects schema.org structured data into content files.
///
/// The handler is idempotent: a file that already carries structured data
/// is skipped, so a retried job never double-injects.
pub struct SchemaEnhancementWorker {
	generator: Arc<dyn SchemaGenerator>,
	dry_run: bool,
}

impl SchemaEnhancementWorker {
	pub fn new(generator: Arc<dyn SchemaGenerator>, dry_run: bool) -> Self {
		Self { generator, dry_run }
	}

	/// Job data for enhancing `file` inside `repo_path`.
	pub fn job_data(repo_path: &std::path::Path, file: &str, description: &str) -> serde_json::Value {
		serde_json::json!({
			"repo_path": repo_path.to_string_lossy(),
			"file": file,
			"description": description,
		})
	}

	fn target_file(job: &Job) -> Result<PathBuf, PipelineError> {
		let repo = job
			.data
			.get("repo_path")
			.and_then(|v| v.as_str())
			.ok_or_else(|| PipelineError::validation("missing required field: repo_path"))?;
		let file = job
			.data
			.get("file")
			.and_then(|v| v.as_str())
			.ok_or_else(|| PipelineError::validation("missing required field: file"))?;
		Ok(PathBuf::from(repo).join(file))
	}
}

#[async_trait]
impl PipelineHandler for SchemaEnhancementWorker {
	fn pipeline_id(&self) -> &str {
		PIPELINE_ID
	}

	#[instrument(skip(self, job, ctx), fields(job_id = %job.id))]
	async fn run_job_handler(
		&self,
		job: &Job,
		ctx: &JobContext,
	) -> Result<serde_json::Value, PipelineError> {
		ctx.check_cancelled()?;

		let path = Self::target_file(job)?;
		ctx.report_progress(10, Some("reading file"));
		let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				PipelineError::not_found(format!("file not found: {}", path.display()))
			} else {
				e.into()
			}
		})?;

		// Idempotence guard: existing markup means a previous run (or a
		// human) already enhanced this file.
		if content.contains(SCHEMA_MARKER) {
			debug!(file = %path.display(), "structured data already present");
			return Ok(serde_json::json!({
				"skipped": true,
				"reason": "already-enhanced",
				"file": path.to_string_lossy(),
			}));
		}

		ctx.check_cancelled()?;
		ctx.report_progress(40, Some("generating schema"));
		let file_name = path
			.file_name()
			.map(|n| n.to_string_lossy().to_string())
			.unwrap_or_default();
		let schema = self.generator.generate(&file_name, &content).await?;

		if !schema.is_object() {
			return Err(PipelineError::validation(
				"generated schema is not a JSON object",
			));
		}
		let fields_added = schema.as_object().map(|o| o.len()).unwrap_or(0);

		ctx.report_progress(70, Some("injecting schema"));
		let block = format!(
			"<script type=\"application/ld+json\">\n{}\n</script>",
			serde_json::to_string_pretty(&schema)?
		);
		let enhanced = match content.find("</head>") {
			Some(pos) => {
				let mut out = String::with_capacity(content.len() + block.len() + 1);
				out.push_str(&content[..pos]);
				out.push_str(&block);
				out.push('\n');
				out.push_str(&content[pos..]);
				out
			}
			None => format!("{content}\n{block}\n"),
		};

		let bytes_added = enhanced.len() - content.len();

		if self.dry_run {
			info!(file = %path.display(), bytes_added, "dry-run: not writing");
		} else {
			ctx.report_progress(90, Some("writing file"));
			tokio::fs::write(&path, &enhanced).await?;
		}

		Ok(serde_json::json!({
			"skipped": false,
			"file": path.to_string_lossy(),
			"dry_run": self.dry_run,
			"impact": {
				"fields_added": fields_added,
				"bytes_added": bytes_added,
				"injected_into_head": content.contains("</head>"),
			},
		}))
	}

	fn commit_message(&self, job: &Job) -> CommitMessage {
		let file = job
			.data
			.get("file")
			.and_then(|v| v.as_str())
			.unwrap_or("content file");
		CommitMessage {
			title: format!("feat(seo): add structured data to {file}"),
			body: format!(
				"Generated schema.org markup for {file}.\n\nJob: {}",
				job.id
			),
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
			body: format!(
				"{}\n\nAutomated schema enhancement; review the generated JSON-LD before merging.",
				commit.body
			),
			labels: vec!["automated".to_string(), "seo".to_string()],
		}
	}
}
