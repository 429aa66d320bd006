// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Queued,
	Running,
	Completed,
	Failed,
	Cancelled,
}

impl JobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobStatus::Queued => "queued",
			JobStatus::Running => "running",
			JobStatus::Completed => "completed",
			JobStatus::Failed => "failed",
			JobStatus::Cancelled => "cancelled",
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
		)
	}

	/// Whether a transition from `self` to `next` is legal.
	///
	/// Retries never reanimate a job: a failed job stays failed and a new
	/// job carries the successor attempt.
	pub fn can_transition_to(&self, next: JobStatus) -> bool {
		match (self, next) {
			(JobStatus::Queued, JobStatus::Running) => true,
			(JobStatus::Queued, JobStatus::Cancelled) => true,
			(JobStatus::Running, JobStatus::Completed) => true,
			(JobStatus::Running, JobStatus::Failed) => true,
			(JobStatus::Running, JobStatus::Cancelled) => true,
			_ => false,
		}
	}
}

impl std::str::FromStr for JobStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"queued" => Ok(JobStatus::Queued),
			"running" => Ok(JobStatus::Running),
			"completed" => Ok(JobStatus::Completed),
			"failed" => Ok(JobStatus::Failed),
			"cancelled" => Ok(JobStatus::Cancelled),
			_ => Err(format!("unknown job status: {s}")),
		}
	}
}

/// Failure detail attached to a job that reached `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFailure {
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub retryable: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub category: Option<ErrorCategory>,
}

impl JobFailure {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			code: None,
			stack: None,
			retryable: None,
			category: None,
		}
	}
}

/// Git workflow state recorded on a job when the wrapper workflow runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GitInfo {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub branch_name: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub commits: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub pull_request_url: Option<String>,
}

/// A single unit of work owned end-to-end by a pipeline scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
	pub id: String,
	pub pipeline_id: String,
	pub status: JobStatus,
	pub data: serde_json::Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<JobFailure>,
	pub retry_count: u32,
	pub max_retries: u32,
	pub created_at: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub started_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub completed_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub progress: Option<u8>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub current_operation: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub git: Option<GitInfo>,
	#[serde(default)]
	pub cancel_requested: bool,
}

impl Job {
	/// Construct a queued job.
	pub fn queued(
		id: impl Into<String>,
		pipeline_id: impl Into<String>,
		data: serde_json::Value,
		max_retries: u32,
		created_at: DateTime<Utc>,
	) -> Self {
		Self {
			id: id.into(),
			pipeline_id: pipeline_id.into(),
			status: JobStatus::Queued,
			data,
			result: None,
			error: None,
			retry_count: 0,
			max_retries,
			created_at,
			started_at: None,
			completed_at: None,
			progress: None,
			current_operation: None,
			git: None,
			cancel_requested: false,
		}
	}

	pub fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}

	/// Wall-clock duration of the run, once terminal.
	pub fn duration_ms(&self) -> Option<i64> {
		let end = self.completed_at?;
		let start = self.started_at.unwrap_or(self.created_at);
		Some((end - start).num_milliseconds())
	}

	pub fn mark_running(&mut self, now: DateTime<Utc>) {
		self.status = JobStatus::Running;
		self.started_at = Some(now);
	}

	pub fn mark_completed(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
		self.status = JobStatus::Completed;
		self.result = Some(result);
		self.error = None;
		self.completed_at = Some(now);
		self.progress = Some(100);
	}

	pub fn mark_failed(&mut self, failure: JobFailure, now: DateTime<Utc>) {
		self.status = JobStatus::Failed;
		self.error = Some(failure);
		self.result = None;
		self.completed_at = Some(now);
	}

	pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
		self.status = JobStatus::Cancelled;
		self.completed_at = Some(now);
	}

	/// Git state accessor, creating the record on first use.
	pub fn git_mut(&mut self) -> &mut GitInfo {
		self.git.get_or_insert_with(GitInfo::default)
	}
}

/// Partial update of the mutable job columns.
///
/// `id`, `pipeline_id`, `created_at`, and `data` are immutable and have no
/// corresponding field here.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
	pub status: Option<JobStatus>,
	pub result: Option<Option<serde_json::Value>>,
	pub error: Option<Option<JobFailure>>,
	pub retry_count: Option<u32>,
	pub started_at: Option<Option<DateTime<Utc>>>,
	pub completed_at: Option<Option<DateTime<Utc>>>,
	pub progress: Option<Option<u8>>,
	pub current_operation: Option<Option<String>>,
	pub git: Option<Option<GitInfo>>,
}

impl JobPatch {
	/// Apply the set fields onto `job`, leaving the rest untouched.
	pub fn apply(&self, job: &mut Job) {
		if let Some(status) = self.status {
			job.status = status;
		}
		if let Some(result) = &self.result {
			job.result = result.clone();
		}
		if let Some(error) = &self.error {
			job.error = error.clone();
		}
		if let Some(retry_count) = self.retry_count {
			job.retry_count = retry_count;
		}
		if let Some(started_at) = self.started_at {
			job.started_at = started_at;
		}
		if let Some(completed_at) = self.completed_at {
			job.completed_at = completed_at;
		}
		if let Some(progress) = self.progress {
			job.progress = progress;
		}
		if let Some(current_operation) = &self.current_operation {
			job.current_operation = current_operation.clone();
		}
		if let Some(git) = &self.git {
			job.git = git.clone();
		}
	}

	/// Snapshot every mutable field of `job` into a patch.
	pub fn from_job(job: &Job) -> Self {
		Self {
			status: Some(job.status),
			result: Some(job.result.clone()),
			error: Some(job.error.clone()),
			retry_count: Some(job.retry_count),
			started_at: Some(job.started_at),
			completed_at: Some(job.completed_at),
			progress: Some(job.progress),
			current_operation: Some(job.current_operation.clone()),
			git: Some(job.git.clone()),
		}
	}
}

/// Aggregate counters for one pipeline scheduler.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStats {
	pub total: usize,
	pub queued: usize,
	pub active: usize,
	pub completed: usize,
	pub failed: usize,
	pub cancelled: usize,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_job() -> Job {
		Job::queued(
			"repomix-1700000000000",
			"repomix",
			serde_json::json!({"path": "/tmp/repo"}),
			3,
			Utc::now(),
		)
	}

	#[test]
	fn new_job_is_queued_with_no_timestamps() {
		let job = sample_job();
		assert_eq!(job.status, JobStatus::Queued);
		assert!(job.started_at.is_none());
		assert!(job.completed_at.is_none());
		assert!(!job.is_terminal());
	}

	#[test]
	fn lifecycle_sets_timestamps_in_order() {
		let mut job = sample_job();
		let t1 = Utc::now();
		job.mark_running(t1);
		assert_eq!(job.status, JobStatus::Running);
		assert_eq!(job.started_at, Some(t1));

		let t2 = t1 + chrono::Duration::milliseconds(25);
		job.mark_completed(serde_json::json!({"ok": true}), t2);
		assert!(job.is_terminal());
		assert_eq!(job.completed_at, Some(t2));
		assert_eq!(job.duration_ms(), Some(25));
		assert!(job.created_at <= job.started_at.unwrap());
		assert!(job.started_at.unwrap() <= job.completed_at.unwrap());
	}

	#[test]
	fn result_and_error_are_mutually_exclusive() {
		let mut job = sample_job();
		job.mark_running(Utc::now());
		job.mark_failed(JobFailure::new("boom"), Utc::now());
		assert!(job.result.is_none());
		assert!(job.error.is_some());

		let mut job = sample_job();
		job.mark_running(Utc::now());
		job.mark_completed(serde_json::json!(1), Utc::now());
		assert!(job.error.is_none());
		assert!(job.result.is_some());
	}

	#[test]
	fn terminal_iff_completed_at_set() {
		let mut job = sample_job();
		assert!(job.completed_at.is_none());

		job.mark_running(Utc::now());
		assert!(job.completed_at.is_none());

		job.mark_cancelled(Utc::now());
		assert!(job.is_terminal());
		assert!(job.completed_at.is_some());
	}

	#[test]
	fn transition_table_forbids_requeue() {
		assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
		assert!(JobStatus::Queued.can_transition_to(JobStatus::Cancelled));
		assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
		assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
		assert!(!JobStatus::Failed.can_transition_to(JobStatus::Running));
		assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
	}

	#[test]
	fn status_round_trips_through_str() {
		for status in [
			JobStatus::Queued,
			JobStatus::Running,
			JobStatus::Completed,
			JobStatus::Failed,
			JobStatus::Cancelled,
		] {
			let parsed: JobStatus = status.as_str().parse().unwrap();
			assert_eq!(parsed, status);
		}
		assert!("resumed".parse::<JobStatus>().is_err());
	}
}
