// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sidequest_core::{GitInfo, Job, JobFailure, JobStats, JobStatus};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
	pub code: String,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
	pub success: bool,
	pub timestamp: DateTime<Utc>,
	pub error: ErrorBody,
}

impl ErrorResponse {
	pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			success: false,
			timestamp: Utc::now(),
			error: ErrorBody {
				code: code.into(),
				message: message.into(),
				details: None,
			},
		}
	}

	pub fn with_details(mut self, details: serde_json::Value) -> Self {
		self.error.details = Some(details);
		self
	}
}

/// Trimmed job representation for list endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobSummary {
	pub id: String,
	pub pipeline_id: String,
	pub status: JobStatus,
	pub created_at: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub started_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub completed_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub duration_ms: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub progress: Option<u8>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub current_operation: Option<String>,
	pub retry_count: u32,
	pub max_retries: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<JobFailure>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub git: Option<GitInfo>,
}

impl From<&Job> for JobSummary {
	fn from(job: &Job) -> Self {
		Self {
			id: job.id.clone(),
			pipeline_id: job.pipeline_id.clone(),
			status: job.status,
			created_at: job.created_at,
			started_at: job.started_at,
			completed_at: job.completed_at,
			duration_ms: job.duration_ms(),
			progress: job.progress,
			current_operation: job.current_operation.clone(),
			retry_count: job.retry_count,
			max_retries: job.max_retries,
			error: job.error.clone(),
			git: job.git.clone(),
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
	#[serde(default)]
	pub status: Option<String>,
	#[serde(default = "default_page")]
	pub page: u32,
	#[serde(default = "default_limit")]
	pub limit: u32,
}

fn default_page() -> u32 {
	1
}

fn default_limit() -> u32 {
	20
}

impl ListJobsQuery {
	pub const MAX_LIMIT: u32 = 100;

	pub fn clamped_limit(&self) -> u32 {
		self.limit.clamp(1, Self::MAX_LIMIT)
	}

	pub fn offset(&self) -> u32 {
		(self.page.max(1) - 1) * self.clamped_limit()
	}
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
	pub success: bool,
	pub timestamp: DateTime<Utc>,
	pub jobs: Vec<JobSummary>,
	pub total: u32,
	pub page: u32,
	pub limit: u32,
	pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct JobDetailResponse {
	pub success: bool,
	pub timestamp: DateTime<Utc>,
	pub job: Job,
}

#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
	pub success: bool,
	pub timestamp: DateTime<Utc>,
	pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RetryJobResponse {
	pub success: bool,
	pub timestamp: DateTime<Utc>,
	pub new_job_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkImportRequest {
	pub jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
pub struct BulkImportResponse {
	pub success: bool,
	pub timestamp: DateTime<Utc>,
	pub imported: usize,
	pub skipped: usize,
	pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PipelineJobsResponse {
	pub success: bool,
	pub timestamp: DateTime<Utc>,
	pub pipeline_id: String,
	pub jobs: Vec<JobSummary>,
	pub total: u32,
	pub has_more: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
	#[serde(default)]
	pub data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
	pub success: bool,
	pub timestamp: DateTime<Utc>,
	pub job_id: String,
	pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct PipelineStatusResponse {
	pub success: bool,
	pub timestamp: DateTime<Utc>,
	pub pipeline_id: String,
	pub status: PipelinePauseState,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePauseState {
	Paused,
	Running,
}

#[derive(Debug, Serialize)]
pub struct PipelineStatsEntry {
	pub pipeline_id: String,
	pub paused: bool,
	#[serde(flatten)]
	pub stats: JobStats,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
	pub success: bool,
	pub timestamp: DateTime<Utc>,
	pub pipelines: Vec<PipelineStatsEntry>,
	pub supported_pipelines: Vec<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn query_defaults_and_clamping() {
		let query = ListJobsQuery {
			status: None,
			page: default_page(),
			limit: default_limit(),
		};
		assert_eq!(query.clamped_limit(), 20);
		assert_eq!(query.offset(), 0);

		let query = ListJobsQuery {
			status: None,
			page: 3,
			limit: 500,
		};
		assert_eq!(query.clamped_limit(), ListJobsQuery::MAX_LIMIT);
		assert_eq!(query.offset(), 200);

		let query = ListJobsQuery {
			status: None,
			page: 0,
			limit: 0,
		};
		assert_eq!(query.clamped_limit(), 1);
		assert_eq!(query.offset(), 0);
	}

	#[test]
	fn summary_mirrors_job_fields() {
		let mut job = Job::queued(
			"repomix-1",
			"repomix",
			serde_json::json!({"path": "/tmp"}),
			3,
			Utc::now(),
		);
		job.mark_running(Utc::now());
		job.progress = Some(40);

		let summary = JobSummary::from(&job);
		assert_eq!(summary.id, "repomix-1");
		assert_eq!(summary.status, JobStatus::Running);
		assert_eq!(summary.progress, Some(40));
		assert!(summary.error.is_none());
	}

	#[test]
	fn error_response_shape() {
		let response = ErrorResponse::new("not_found", "job not found")
			.with_details(serde_json::json!({"job_id": "x"}));
		let value = serde_json::to_value(&response).unwrap();
		assert_eq!(value["success"], false);
		assert_eq!(value["error"]["code"], "not_found");
		assert_eq!(value["error"]["details"]["job_id"], "x");
		assert!(value.get("timestamp").is_some());
	}
}
