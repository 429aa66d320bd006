// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Pipeline-scoped HTTP handlers, routed through the worker registry.

use axum::{
	extract::{Path, Query, State},
	response::{IntoResponse, Response},
	Json,
};
use chrono::Utc;

use sidequest_api::{
	JobSummary, ListJobsQuery, PipelineJobsResponse, PipelinePauseState, PipelineStatusResponse,
	TriggerRequest, TriggerResponse,
};
use sidequest_db::JobFilter;
use sidequest_scheduler::SchedulerError;

use crate::api::AppState;
use crate::api_response::{bad_request, conflict, internal_error, not_found};

/// GET /api/pipelines/{pipeline_id}/jobs - pipeline-scoped listing.
pub async fn list_pipeline_jobs(
	State(state): State<AppState>,
	Path(pipeline_id): Path<String>,
	Query(query): Query<ListJobsQuery>,
) -> Response {
	if !state.registry.is_supported(&pipeline_id) {
		return not_found(format!("pipeline not supported: {pipeline_id}"));
	}

	let status = match query.status.as_deref() {
		None => None,
		Some(s) => match s.parse() {
			Ok(status) => Some(status),
			Err(_) => {
				return bad_request("invalid_status", format!("unknown status filter: {s}"));
			}
		},
	};

	// Live workers are authoritative; cold pipelines fall back to the
	// persisted snapshot.
	if let Some(worker) = state.worker_if_live(&pipeline_id) {
		let mut jobs: Vec<_> = worker
			.get_all_jobs()
			.into_iter()
			.filter(|job| status.map(|s| job.status == s).unwrap_or(true))
			.collect();
		let total = jobs.len() as u32;
		let offset = query.offset() as usize;
		let limit = query.clamped_limit() as usize;
		jobs = jobs.into_iter().skip(offset).take(limit).collect();

		return Json(PipelineJobsResponse {
			success: true,
			timestamp: Utc::now(),
			pipeline_id,
			jobs: jobs.iter().map(JobSummary::from).collect(),
			total,
			has_more: offset + jobs.len() < total as usize,
		})
		.into_response();
	}

	let filter = JobFilter {
		status,
		limit: query.clamped_limit(),
		offset: query.offset(),
		include_total: true,
	};
	match state.store.list_by_pipeline(&pipeline_id, &filter).await {
		Ok(page) => {
			let total = page.total.unwrap_or(page.jobs.len() as u32);
			let jobs: Vec<JobSummary> = page.jobs.iter().map(JobSummary::from).collect();
			let has_more = query.offset() + (jobs.len() as u32) < total;
			Json(PipelineJobsResponse {
				success: true,
				timestamp: Utc::now(),
				pipeline_id,
				jobs,
				total,
				has_more,
			})
			.into_response()
		}
		Err(e) => internal_error(e.to_string()),
	}
}

/// POST /api/pipelines/{pipeline_id}/trigger - manually create a job.
pub async fn trigger(
	State(state): State<AppState>,
	Path(pipeline_id): Path<String>,
	request: Option<Json<TriggerRequest>>,
) -> Response {
	let Some(worker) = state.registry.get_worker(&pipeline_id).await else {
		return not_found(format!("pipeline not supported: {pipeline_id}"));
	};

	let data = request
		.and_then(|Json(r)| r.data)
		.unwrap_or_else(|| serde_json::json!({}));

	match worker.create_job_auto(data).await {
		Ok(job) => Json(TriggerResponse {
			success: true,
			timestamp: Utc::now(),
			job_id: job.id,
			status: job.status,
		})
		.into_response(),
		Err(SchedulerError::Conflict(id)) => conflict(format!("job already exists: {id}")),
		Err(e) => internal_error(e.to_string()),
	}
}

/// POST /api/pipelines/{pipeline_id}/pause
pub async fn pause(State(state): State<AppState>, Path(pipeline_id): Path<String>) -> Response {
	set_paused(state, pipeline_id, true).await
}

/// POST /api/pipelines/{pipeline_id}/resume
pub async fn resume(State(state): State<AppState>, Path(pipeline_id): Path<String>) -> Response {
	set_paused(state, pipeline_id, false).await
}

async fn set_paused(state: AppState, pipeline_id: String, paused: bool) -> Response {
	let Some(worker) = state.registry.get_worker(&pipeline_id).await else {
		return not_found(format!("pipeline not supported: {pipeline_id}"));
	};
	worker.set_paused(paused);

	Json(PipelineStatusResponse {
		success: true,
		timestamp: Utc::now(),
		pipeline_id,
		status: if paused {
			PipelinePauseState::Paused
		} else {
			PipelinePauseState::Running
		},
	})
	.into_response()
}

/// GET /api/pipelines/{pipeline_id}/status
pub async fn status(State(state): State<AppState>, Path(pipeline_id): Path<String>) -> Response {
	if !state.registry.is_supported(&pipeline_id) {
		return not_found(format!("pipeline not supported: {pipeline_id}"));
	}

	// A cold pipeline has never dispatched; report it as running.
	let paused = state
		.worker_if_live(&pipeline_id)
		.map(|worker| worker.is_paused())
		.unwrap_or(false);

	Json(PipelineStatusResponse {
		success: true,
		timestamp: Utc::now(),
		pipeline_id,
		status: if paused {
			PipelinePauseState::Paused
		} else {
			PipelinePauseState::Running
		},
	})
	.into_response()
}
