// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Health HTTP handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use sidequest_db::JobFilter;

use crate::api::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
	Healthy,
	Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthComponents {
	pub database: HealthStatus,
	pub pipelines: usize,
	pub events_emitted: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	pub status: HealthStatus,
	pub timestamp: DateTime<Utc>,
	pub components: HealthComponents,
}

/// GET /health - liveness and component health.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
	let probe = JobFilter {
		limit: 1,
		..JobFilter::default()
	};
	let database = match state.store.list_all(&probe).await {
		Ok(_) => HealthStatus::Healthy,
		Err(e) => {
			tracing::error!(error = %e, "health check: database probe failed");
			HealthStatus::Unhealthy
		}
	};

	let status = database;
	let response = HealthResponse {
		status,
		timestamp: Utc::now(),
		components: HealthComponents {
			database,
			pipelines: state.registry.supported_pipelines().len(),
			events_emitted: state.bus.events_emitted(),
		},
	};

	let http_status = match status {
		HealthStatus::Healthy => StatusCode::OK,
		HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
	};

	(http_status, Json(response))
}
