// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Activity feed and runtime statistics handlers.

use axum::{
	extract::{Query, State},
	response::IntoResponse,
	Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sidequest_api::{PipelineStatsEntry, StatsResponse};
use sidequest_events::{ActivityEntry, ActivityStats};

use crate::api::AppState;

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
	#[serde(default = "default_activity_limit")]
	pub limit: usize,
}

fn default_activity_limit() -> usize {
	50
}

#[derive(Debug, Serialize)]
pub struct ActivityResponse {
	pub success: bool,
	pub timestamp: DateTime<Utc>,
	pub activities: Vec<ActivityEntry>,
	pub stats: ActivityStats,
}

/// GET /api/activity - recent lifecycle activity for dashboards.
pub async fn recent_activity(
	State(state): State<AppState>,
	Query(query): Query<ActivityQuery>,
) -> impl IntoResponse {
	Json(ActivityResponse {
		success: true,
		timestamp: Utc::now(),
		activities: state.feed.recent(query.limit.min(500)),
		stats: state.feed.stats(),
	})
}

/// GET /api/stats - per-pipeline scheduler counters.
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
	let pipelines = state
		.registry
		.instantiated()
		.into_iter()
		.map(|worker| PipelineStatsEntry {
			pipeline_id: worker.pipeline_id().to_string(),
			paused: worker.is_paused(),
			stats: worker.get_stats(),
		})
		.collect();

	Json(StatsResponse {
		success: true,
		timestamp: Utc::now(),
		pipelines,
		supported_pipelines: state.registry.supported_pipelines(),
	})
}
