// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Job-scoped HTTP handlers.

use axum::{
	extract::{Path, Query, State},
	http::HeaderMap,
	response::{IntoResponse, Response},
	Json,
};
use chrono::Utc;

use sidequest_api::{
	validate_job_id, verify_migration_key, BulkImportRequest, BulkImportResponse,
	CancelJobResponse, JobDetailResponse, JobSummary, ListJobsQuery, ListJobsResponse,
	RetryJobResponse,
};
use sidequest_core::JobStatus;
use sidequest_db::JobFilter;
use sidequest_scheduler::{CancelOutcome, SchedulerError};

use crate::api::AppState;
use crate::api_response::{bad_request, conflict, internal_error, not_found, unauthorized};

const MIGRATION_KEY_HEADER: &str = "x-migration-key";

fn parse_status(raw: Option<&str>) -> Result<Option<JobStatus>, Response> {
	match raw {
		None => Ok(None),
		Some(s) => s.parse::<JobStatus>().map(Some).map_err(|_| {
			bad_request("invalid_status", format!("unknown status filter: {s}"))
		}),
	}
}

/// GET /api/jobs - list jobs across all pipelines.
pub async fn list_jobs(
	State(state): State<AppState>,
	Query(query): Query<ListJobsQuery>,
) -> Response {
	let status = match parse_status(query.status.as_deref()) {
		Ok(status) => status,
		Err(response) => return response,
	};

	let filter = JobFilter {
		status,
		limit: query.clamped_limit(),
		offset: query.offset(),
		include_total: true,
	};

	match state.store.list_all(&filter).await {
		Ok(page) => {
			let total = page.total.unwrap_or(page.jobs.len() as u32);
			let jobs: Vec<JobSummary> = page.jobs.iter().map(JobSummary::from).collect();
			let has_more = query.offset() + (jobs.len() as u32) < total;
			Json(ListJobsResponse {
				success: true,
				timestamp: Utc::now(),
				jobs,
				total,
				page: query.page.max(1),
				limit: query.clamped_limit(),
				has_more,
			})
			.into_response()
		}
		Err(e) => internal_error(e.to_string()),
	}
}

/// GET /api/jobs/{job_id} - job detail.
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
	if !validate_job_id(&job_id) {
		return bad_request("invalid_job_id", "job IDs are [A-Za-z0-9_-], max 100 chars");
	}

	if let Some((_, job)) = state.find_live_job(&job_id) {
		return Json(JobDetailResponse {
			success: true,
			timestamp: Utc::now(),
			job,
		})
		.into_response();
	}

	match state.store.get(&job_id).await {
		Ok(Some(job)) => Json(JobDetailResponse {
			success: true,
			timestamp: Utc::now(),
			job,
		})
		.into_response(),
		Ok(None) => not_found(format!("job not found: {job_id}")),
		Err(e) => internal_error(e.to_string()),
	}
}

/// POST /api/jobs/{job_id}/cancel - cancel a queued or running job.
pub async fn cancel_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
	if !validate_job_id(&job_id) {
		return bad_request("invalid_job_id", "job IDs are [A-Za-z0-9_-], max 100 chars");
	}

	let Some((worker, _)) = state.find_live_job(&job_id) else {
		// Not owned by any live worker; terminal rows in the store are
		// no-ops, anything else is unknown.
		return match state.store.get(&job_id).await {
			Ok(Some(job)) if job.is_terminal() => Json(CancelJobResponse {
				success: true,
				timestamp: Utc::now(),
				message: "job already reached a terminal state".to_string(),
			})
			.into_response(),
			Ok(Some(_)) | Ok(None) => not_found(format!("job not found: {job_id}")),
			Err(e) => internal_error(e.to_string()),
		};
	};

	let message = match worker.cancel_job(&job_id).await {
		CancelOutcome::Cancelled => "job cancelled".to_string(),
		CancelOutcome::CancelRequested => {
			"cancel requested; the job will stop at its next checkpoint".to_string()
		}
		CancelOutcome::AlreadyTerminal => "job already reached a terminal state".to_string(),
		CancelOutcome::NotFound => return not_found(format!("job not found: {job_id}")),
	};

	Json(CancelJobResponse {
		success: true,
		timestamp: Utc::now(),
		message,
	})
	.into_response()
}

/// POST /api/jobs/{job_id}/retry - build a fresh job from a failed one.
pub async fn retry_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
	if !validate_job_id(&job_id) {
		return bad_request("invalid_job_id", "job IDs are [A-Za-z0-9_-], max 100 chars");
	}

	let job = match state.find_live_job(&job_id) {
		Some((_, job)) => job,
		None => match state.store.get(&job_id).await {
			Ok(Some(job)) => job,
			Ok(None) => return not_found(format!("job not found: {job_id}")),
			Err(e) => return internal_error(e.to_string()),
		},
	};

	if job.status != JobStatus::Failed {
		return bad_request(
			"not_retryable",
			format!("only failed jobs can be retried; {job_id} is {}", job.status.as_str()),
		);
	}

	let Some(worker) = state.registry.get_worker(&job.pipeline_id).await else {
		return not_found(format!("pipeline not supported: {}", job.pipeline_id));
	};

	match worker.create_job_auto(job.data.clone()).await {
		Ok(new_job) => Json(RetryJobResponse {
			success: true,
			timestamp: Utc::now(),
			new_job_id: new_job.id,
		})
		.into_response(),
		Err(SchedulerError::Conflict(id)) => conflict(format!("job already exists: {id}")),
		Err(e) => internal_error(e.to_string()),
	}
}

/// POST /api/jobs/bulk-import - migration import, guarded by the API key.
pub async fn bulk_import(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(request): Json<BulkImportRequest>,
) -> Response {
	let Some(expected) = &state.migration_api_key else {
		return unauthorized("bulk import is disabled: no migration key configured");
	};
	let presented = headers
		.get(MIGRATION_KEY_HEADER)
		.and_then(|v| v.to_str().ok())
		.unwrap_or_default();
	if !verify_migration_key(presented, expected) {
		return unauthorized("invalid migration key");
	}

	for job in &request.jobs {
		if !validate_job_id(&job.id) {
			return bad_request("invalid_job_id", format!("invalid job ID in batch: {}", job.id));
		}
	}

	match state.store.bulk_import(&request.jobs).await {
		Ok(report) => Json(BulkImportResponse {
			success: true,
			timestamp: Utc::now(),
			imported: report.imported,
			skipped: report.skipped,
			errors: report.errors,
		})
		.into_response(),
		Err(e) => internal_error(e.to_string()),
	}
}
