// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use axum::{
	routing::{get, post},
	Router,
};

use sidequest_db::JobStore;
use sidequest_events::{ActivityFeed, EventBus};
use sidequest_scheduler::{PipelineScheduler, WorkerRegistry};

use crate::routes;

#[derive(Clone)]
pub struct AppState {
	pub registry: Arc<WorkerRegistry>,
	pub store: Arc<dyn JobStore>,
	pub feed: Arc<ActivityFeed>,
	pub bus: Arc<EventBus>,
	pub migration_api_key: Option<String>,
}

impl AppState {
	/// Worker for `pipeline_id` only if it has already been demanded;
	/// read paths never instantiate cold pipelines.
	pub fn worker_if_live(&self, pipeline_id: &str) -> Option<Arc<PipelineScheduler>> {
		self
			.registry
			.instantiated()
			.into_iter()
			.find(|worker| worker.pipeline_id() == pipeline_id)
	}

	/// Find a job in any live worker, preferring in-memory state over the
	/// store snapshot.
	pub fn find_live_job(
		&self,
		job_id: &str,
	) -> Option<(Arc<PipelineScheduler>, sidequest_core::Job)> {
		for worker in self.registry.instantiated() {
			if let Some(job) = worker.get_job(job_id) {
				return Some((worker, job));
			}
		}
		None
	}
}

pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(routes::health::health_check))
		.route("/api/jobs", get(routes::jobs::list_jobs))
		.route("/api/jobs/bulk-import", post(routes::jobs::bulk_import))
		.route("/api/jobs/{job_id}", get(routes::jobs::get_job))
		.route("/api/jobs/{job_id}/cancel", post(routes::jobs::cancel_job))
		.route("/api/jobs/{job_id}/retry", post(routes::jobs::retry_job))
		.route(
			"/api/pipelines/{pipeline_id}/jobs",
			get(routes::pipelines::list_pipeline_jobs),
		)
		.route(
			"/api/pipelines/{pipeline_id}/trigger",
			post(routes::pipelines::trigger),
		)
		.route(
			"/api/pipelines/{pipeline_id}/pause",
			post(routes::pipelines::pause),
		)
		.route(
			"/api/pipelines/{pipeline_id}/resume",
			post(routes::pipelines::resume),
		)
		.route(
			"/api/pipelines/{pipeline_id}/status",
			get(routes::pipelines::status),
		)
		.route("/api/activity", get(routes::activity::recent_activity))
		.route("/api/stats", get(routes::activity::stats))
		.with_state(state)
}
