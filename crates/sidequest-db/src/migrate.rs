// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::SqlitePool;

use crate::error::Result;

/// Create the jobs table if it does not exist.
///
/// `data`, `result`, and `git` hold opaque JSON; `error` holds the
/// serialized failure record and `error_type` its category for filtering.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS jobs (
			id TEXT PRIMARY KEY,
			pipeline_id TEXT NOT NULL,
			status TEXT NOT NULL,
			created_at TEXT NOT NULL,
			started_at TEXT,
			completed_at TEXT,
			duration INTEGER,
			progress INTEGER,
			current_operation TEXT,
			error TEXT,
			error_type TEXT,
			retry_count INTEGER NOT NULL DEFAULT 0,
			max_retries INTEGER NOT NULL DEFAULT 0,
			data TEXT NOT NULL,
			result TEXT,
			git TEXT
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_jobs_pipeline_status ON jobs (pipeline_id, status)",
	)
	.execute(pool)
	.await?;

	Ok(())
}
