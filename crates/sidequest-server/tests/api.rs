// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! HTTP surface tests against an in-memory application state.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;

use sidequest_config::{SidequestConfig, SidequestConfigLayer};
use sidequest_core::{Job, JobFailure};
use sidequest_server::{build_app_state, create_router, AppState};

fn test_config() -> SidequestConfig {
	SidequestConfigLayer::default().finalize()
}

async fn test_state(migration_key: Option<&str>) -> AppState {
	let pool = sqlx::SqlitePool::connect(":memory:").await.unwrap();
	sidequest_db::migrate(&pool).await.unwrap();

	let mut config = test_config();
	config.runtime.migration_api_key = migration_key.map(String::from);
	build_app_state(&config, pool)
}

async fn test_router(migration_key: Option<&str>) -> Router {
	create_router(test_state(migration_key).await)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
	let bytes = response.into_body().collect().await.unwrap().to_bytes();
	serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
	Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri(uri)
		.body(Body::empty())
		.unwrap()
}

fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri(uri)
		.header("content-type", "application/json")
		.body(Body::from(body.to_string()))
		.unwrap()
}

#[tokio::test]
async fn health_reports_healthy_components() {
	let router = test_router(None).await;
	let response = router.oneshot(get("/health")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let body = body_json(response).await;
	assert_eq!(body["status"], "healthy");
	assert_eq!(body["components"]["database"], "healthy");
	assert_eq!(body["components"]["pipelines"], 3);
}

#[tokio::test]
async fn list_jobs_is_empty_initially() {
	let router = test_router(None).await;
	let response = router.oneshot(get("/api/jobs")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let body = body_json(response).await;
	assert_eq!(body["success"], true);
	assert_eq!(body["total"], 0);
	assert_eq!(body["has_more"], false);
	assert!(body["jobs"].as_array().unwrap().is_empty());
	assert!(body.get("timestamp").is_some());
}

#[tokio::test]
async fn invalid_status_filter_is_bad_request() {
	let router = test_router(None).await;
	let response = router
		.oneshot(get("/api/jobs?status=resumed"))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);

	let body = body_json(response).await;
	assert_eq!(body["success"], false);
	assert_eq!(body["error"]["code"], "invalid_status");
}

#[tokio::test]
async fn invalid_job_id_is_bad_request() {
	let router = test_router(None).await;
	let response = router.oneshot(get("/api/jobs/bad!id")).await.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);

	let body = body_json(response).await;
	assert_eq!(body["error"]["code"], "invalid_job_id");
}

#[tokio::test]
async fn unknown_job_is_not_found() {
	let router = test_router(None).await;
	let response = router.oneshot(get("/api/jobs/ghost-123")).await.unwrap();
	assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn trigger_unknown_pipeline_is_not_found() {
	let router = test_router(None).await;
	let response = router
		.oneshot(post("/api/pipelines/ghost/trigger"))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::NOT_FOUND);

	let body = body_json(response).await;
	assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn trigger_creates_a_queued_job() {
	let router = test_router(None).await;
	let response = router
		.oneshot(post_json(
			"/api/pipelines/schema-enhancement/trigger",
			&serde_json::json!({"data": {"repo_path": "/tmp/repo", "file": "page.html"}}),
		))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let body = body_json(response).await;
	assert_eq!(body["success"], true);
	assert_eq!(body["status"], "queued");
	let job_id = body["job_id"].as_str().unwrap();
	assert!(job_id.starts_with("schema-enhancement-"));
}

#[tokio::test]
async fn pause_resume_status_round_trip() {
	let state = test_state(None).await;
	let router = create_router(state);

	let response = router
		.clone()
		.oneshot(post("/api/pipelines/repomix/pause"))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(body_json(response).await["status"], "paused");

	let response = router
		.clone()
		.oneshot(get("/api/pipelines/repomix/status"))
		.await
		.unwrap();
	assert_eq!(body_json(response).await["status"], "paused");

	let response = router
		.clone()
		.oneshot(post("/api/pipelines/repomix/resume"))
		.await
		.unwrap();
	assert_eq!(body_json(response).await["status"], "running");

	let response = router
		.oneshot(get("/api/pipelines/repomix/status"))
		.await
		.unwrap();
	assert_eq!(body_json(response).await["status"], "running");
}

#[tokio::test]
async fn pipeline_status_for_cold_pipeline_is_running() {
	let router = test_router(None).await;
	let response = router
		.oneshot(get("/api/pipelines/duplicate-detection/status"))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(body_json(response).await["status"], "running");
}

fn import_batch() -> serde_json::Value {
	let mut failed = Job::queued(
		"imported-1",
		"repomix",
		serde_json::json!({"path": "/tmp/repo"}),
		3,
		Utc::now(),
	);
	failed.mark_running(Utc::now());
	failed.mark_failed(JobFailure::new("boom"), Utc::now());

	let queued = Job::queued(
		"imported-2",
		"repomix",
		serde_json::json!({"path": "/tmp/other"}),
		3,
		Utc::now(),
	);

	serde_json::json!({ "jobs": [failed, queued] })
}

#[tokio::test]
async fn bulk_import_requires_a_configured_key() {
	let router = test_router(None).await;
	let response = router
		.oneshot(post_json("/api/jobs/bulk-import", &import_batch()))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bulk_import_rejects_a_wrong_key() {
	let router = test_router(Some("s3cret")).await;
	let mut request = post_json("/api/jobs/bulk-import", &import_batch());
	request
		.headers_mut()
		.insert("x-migration-key", "wrong".parse().unwrap());
	let response = router.oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bulk_import_is_idempotent_over_http() {
	let router = test_router(Some("s3cret")).await;

	let mut request = post_json("/api/jobs/bulk-import", &import_batch());
	request
		.headers_mut()
		.insert("x-migration-key", "s3cret".parse().unwrap());
	let response = router.clone().oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let body = body_json(response).await;
	assert_eq!(body["imported"], 2);
	assert_eq!(body["skipped"], 0);

	let mut request = post_json("/api/jobs/bulk-import", &import_batch());
	request
		.headers_mut()
		.insert("x-migration-key", "s3cret".parse().unwrap());
	let response = router.clone().oneshot(request).await.unwrap();
	let body = body_json(response).await;
	assert_eq!(body["imported"], 0);
	assert_eq!(body["skipped"], 2);

	// The imported jobs are visible through the read API.
	let response = router.oneshot(get("/api/jobs/imported-1")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let body = body_json(response).await;
	assert_eq!(body["job"]["status"], "failed");
}

#[tokio::test]
async fn retry_rebuilds_a_failed_job() {
	let router = test_router(Some("s3cret")).await;

	let mut request = post_json("/api/jobs/bulk-import", &import_batch());
	request
		.headers_mut()
		.insert("x-migration-key", "s3cret".parse().unwrap());
	router.clone().oneshot(request).await.unwrap();

	// imported-2 is still queued, not failed.
	let response = router
		.clone()
		.oneshot(post("/api/jobs/imported-2/retry"))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);

	let response = router
		.clone()
		.oneshot(post("/api/jobs/imported-1/retry"))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let body = body_json(response).await;
	let new_job_id = body["new_job_id"].as_str().unwrap();
	assert!(new_job_id.starts_with("repomix-"));
}

#[tokio::test]
async fn cancel_unknown_job_is_not_found() {
	let router = test_router(None).await;
	let response = router
		.oneshot(post("/api/jobs/ghost-1/cancel"))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn activity_and_stats_endpoints_respond() {
	let router = test_router(None).await;

	// Trigger one job so the feed has an entry.
	router
		.clone()
		.oneshot(post_json(
			"/api/pipelines/schema-enhancement/trigger",
			&serde_json::json!({"data": {"repo_path": "/tmp", "file": "x.html"}}),
		))
		.await
		.unwrap();

	let response = router.clone().oneshot(get("/api/activity")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let body = body_json(response).await;
	assert!(body["stats"]["total"].as_u64().unwrap() >= 1);

	let response = router.oneshot(get("/api/stats")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let body = body_json(response).await;
	assert_eq!(
		body["supported_pipelines"],
		serde_json::json!(["duplicate-detection", "repomix", "schema-enhancement"])
	);
}
