// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

use sidequest_core::ErrorCategory;

/// Events announced on the bus.
///
/// Topic strings follow the `family:detail` convention used by the HTTP
/// streaming surface and the activity feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "topic")]
pub enum PipelineEvent {
	#[serde(rename = "job:created")]
	JobCreated {
		job_id: String,
		pipeline_id: String,
	},
	#[serde(rename = "job:started")]
	JobStarted {
		job_id: String,
		pipeline_id: String,
	},
	#[serde(rename = "job:completed")]
	JobCompleted {
		job_id: String,
		pipeline_id: String,
		duration_ms: Option<i64>,
	},
	#[serde(rename = "job:failed")]
	JobFailed {
		job_id: String,
		pipeline_id: String,
		message: String,
		category: Option<ErrorCategory>,
	},
	#[serde(rename = "job:cancelled")]
	JobCancelled {
		job_id: String,
		pipeline_id: String,
	},
	/// A running handler finished normally after a cancel request it never
	/// acknowledged.
	#[serde(rename = "cancel:ignored")]
	CancelIgnored {
		job_id: String,
		pipeline_id: String,
	},
	#[serde(rename = "retry:scheduled")]
	RetryScheduled {
		original_id: String,
		pipeline_id: String,
		successor_id: String,
		attempt: u32,
		delay_ms: u64,
	},
	#[serde(rename = "retry:warning")]
	RetryWarning {
		original_id: String,
		pipeline_id: String,
		attempt: u32,
	},
	#[serde(rename = "retry:max-attempts")]
	RetryMaxAttempts {
		original_id: String,
		pipeline_id: String,
		attempts: u32,
		reason: String,
	},
	#[serde(rename = "retry:circuit-breaker")]
	RetryCircuitBreaker {
		original_id: String,
		pipeline_id: String,
		attempts: u32,
	},
	#[serde(rename = "scan:completed")]
	ScanCompleted {
		job_id: String,
		pipeline_id: String,
		summary: serde_json::Value,
	},
	#[serde(rename = "pr:created")]
	PrCreated {
		job_id: String,
		pipeline_id: String,
		url: String,
	},
	#[serde(rename = "pr:failed")]
	PrFailed {
		job_id: String,
		pipeline_id: String,
		reason: String,
	},
	#[serde(rename = "metrics:updated")]
	MetricsUpdated {
		job_id: String,
		pipeline_id: String,
		progress: u8,
		operation: Option<String>,
	},
	#[serde(rename = "pipeline:status")]
	PipelineStatus {
		pipeline_id: String,
		paused: bool,
	},
	/// Persistence failed for a job that remains correct in memory.
	#[serde(rename = "storage:warning")]
	StorageWarning {
		job_id: Option<String>,
		pipeline_id: String,
		message: String,
	},
}

impl PipelineEvent {
	pub fn topic(&self) -> &'static str {
		match self {
			PipelineEvent::JobCreated { .. } => "job:created",
			PipelineEvent::JobStarted { .. } => "job:started",
			PipelineEvent::JobCompleted { .. } => "job:completed",
			PipelineEvent::JobFailed { .. } => "job:failed",
			PipelineEvent::JobCancelled { .. } => "job:cancelled",
			PipelineEvent::CancelIgnored { .. } => "cancel:ignored",
			PipelineEvent::RetryScheduled { .. } => "retry:scheduled",
			PipelineEvent::RetryWarning { .. } => "retry:warning",
			PipelineEvent::RetryMaxAttempts { .. } => "retry:max-attempts",
			PipelineEvent::RetryCircuitBreaker { .. } => "retry:circuit-breaker",
			PipelineEvent::ScanCompleted { .. } => "scan:completed",
			PipelineEvent::PrCreated { .. } => "pr:created",
			PipelineEvent::PrFailed { .. } => "pr:failed",
			PipelineEvent::MetricsUpdated { .. } => "metrics:updated",
			PipelineEvent::PipelineStatus { .. } => "pipeline:status",
			PipelineEvent::StorageWarning { .. } => "storage:warning",
		}
	}

	/// Job the event belongs to, when it is job-scoped. Retry events carry
	/// the original ID that keys the chain.
	pub fn job_id(&self) -> Option<&str> {
		match self {
			PipelineEvent::JobCreated { job_id, .. }
			| PipelineEvent::JobStarted { job_id, .. }
			| PipelineEvent::JobCompleted { job_id, .. }
			| PipelineEvent::JobFailed { job_id, .. }
			| PipelineEvent::JobCancelled { job_id, .. }
			| PipelineEvent::CancelIgnored { job_id, .. }
			| PipelineEvent::ScanCompleted { job_id, .. }
			| PipelineEvent::PrCreated { job_id, .. }
			| PipelineEvent::PrFailed { job_id, .. }
			| PipelineEvent::MetricsUpdated { job_id, .. } => Some(job_id),
			PipelineEvent::RetryScheduled { original_id, .. }
			| PipelineEvent::RetryWarning { original_id, .. }
			| PipelineEvent::RetryMaxAttempts { original_id, .. }
			| PipelineEvent::RetryCircuitBreaker { original_id, .. } => Some(original_id),
			PipelineEvent::StorageWarning { job_id, .. } => job_id.as_deref(),
			PipelineEvent::PipelineStatus { .. } => None,
		}
	}

	pub fn pipeline_id(&self) -> &str {
		match self {
			PipelineEvent::JobCreated { pipeline_id, .. }
			| PipelineEvent::JobStarted { pipeline_id, .. }
			| PipelineEvent::JobCompleted { pipeline_id, .. }
			| PipelineEvent::JobFailed { pipeline_id, .. }
			| PipelineEvent::JobCancelled { pipeline_id, .. }
			| PipelineEvent::CancelIgnored { pipeline_id, .. }
			| PipelineEvent::RetryScheduled { pipeline_id, .. }
			| PipelineEvent::RetryWarning { pipeline_id, .. }
			| PipelineEvent::RetryMaxAttempts { pipeline_id, .. }
			| PipelineEvent::RetryCircuitBreaker { pipeline_id, .. }
			| PipelineEvent::ScanCompleted { pipeline_id, .. }
			| PipelineEvent::PrCreated { pipeline_id, .. }
			| PipelineEvent::PrFailed { pipeline_id, .. }
			| PipelineEvent::MetricsUpdated { pipeline_id, .. }
			| PipelineEvent::PipelineStatus { pipeline_id, .. }
			| PipelineEvent::StorageWarning { pipeline_id, .. } => pipeline_id,
		}
	}
}
