// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use sidequest_core::{Job, JobFailure, JobPatch, JobStatus};

use crate::error::{Result, StoreError};

/// Query filter shared by the listing operations.
#[derive(Debug, Clone)]
pub struct JobFilter {
	pub status: Option<JobStatus>,
	pub limit: u32,
	pub offset: u32,
	pub include_total: bool,
}

impl Default for JobFilter {
	fn default() -> Self {
		Self {
			status: None,
			limit: 50,
			offset: 0,
			include_total: false,
		}
	}
}

#[derive(Debug, Clone)]
pub struct JobPage {
	pub jobs: Vec<Job>,
	pub total: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkImportReport {
	pub imported: usize,
	pub skipped: usize,
	pub errors: Vec<String>,
}

/// Durable job store.
///
/// The scheduler is the only writer outside the import path; readers may
/// observe slightly-stale snapshots.
#[async_trait]
pub trait JobStore: Send + Sync {
	async fn insert(&self, job: &Job) -> Result<()>;
	async fn update(&self, id: &str, patch: JobPatch) -> Result<()>;
	async fn get(&self, id: &str) -> Result<Option<Job>>;
	async fn list_by_pipeline(&self, pipeline_id: &str, filter: &JobFilter) -> Result<JobPage>;
	async fn list_all(&self, filter: &JobFilter) -> Result<JobPage>;
	async fn bulk_import(&self, jobs: &[Job]) -> Result<BulkImportReport>;
	/// Marks rows stuck at `running` as failed with error `abandoned`.
	/// Run once at startup before any pipeline dispatches.
	async fn sweep_abandoned(&self) -> Result<u64>;
	async fn delete_old_jobs(&self, retention_days: u32) -> Result<u64>;
}

#[derive(Clone)]
pub struct SqliteJobStore {
	pool: SqlitePool,
}

type JobRow = (
	String,                   // id
	String,                   // pipeline_id
	String,                   // status
	DateTime<Utc>,            // created_at
	Option<DateTime<Utc>>,    // started_at
	Option<DateTime<Utc>>,    // completed_at
	Option<i64>,              // duration
	Option<i64>,              // progress
	Option<String>,           // current_operation
	Option<String>,           // error
	Option<String>,           // error_type
	i64,                      // retry_count
	i64,                      // max_retries
	String,                   // data
	Option<String>,           // result
	Option<String>,           // git
);

const JOB_COLUMNS: &str = "id, pipeline_id, status, created_at, started_at, completed_at, \
                           duration, progress, current_operation, error, error_type, \
                           retry_count, max_retries, data, result, git";

impl SqliteJobStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	fn decode(row: JobRow) -> Result<Job> {
		let (
			id,
			pipeline_id,
			status,
			created_at,
			started_at,
			completed_at,
			_duration,
			progress,
			current_operation,
			error,
			_error_type,
			retry_count,
			max_retries,
			data,
			result,
			git,
		) = row;

		Ok(Job {
			id,
			pipeline_id,
			status: status.parse().map_err(StoreError::Internal)?,
			data: serde_json::from_str(&data)?,
			result: result.as_deref().map(serde_json::from_str).transpose()?,
			error: error
				.as_deref()
				.map(serde_json::from_str::<JobFailure>)
				.transpose()?,
			retry_count: retry_count as u32,
			max_retries: max_retries as u32,
			created_at,
			started_at,
			completed_at,
			progress: progress.map(|p| p.clamp(0, 100) as u8),
			current_operation,
			git: git.as_deref().map(serde_json::from_str).transpose()?,
			cancel_requested: false,
		})
	}

	async fn write_mutable_columns(&self, job: &Job) -> Result<u64> {
		let error = job.error.as_ref().map(serde_json::to_string).transpose()?;
		let error_type = job
			.error
			.as_ref()
			.and_then(|e| e.category)
			.map(|c| c.as_str().to_string());
		let result = job.result.as_ref().map(serde_json::to_string).transpose()?;
		let git = job.git.as_ref().map(serde_json::to_string).transpose()?;

		let done = sqlx::query(
			r#"
			UPDATE jobs
			SET status = ?,
			    started_at = ?,
			    completed_at = ?,
			    duration = ?,
			    progress = ?,
			    current_operation = ?,
			    error = ?,
			    error_type = ?,
			    retry_count = ?,
			    result = ?,
			    git = ?
			WHERE id = ?
			"#,
		)
		.bind(job.status.as_str())
		.bind(job.started_at)
		.bind(job.completed_at)
		.bind(job.duration_ms())
		.bind(job.progress.map(|p| p as i64))
		.bind(&job.current_operation)
		.bind(error)
		.bind(error_type)
		.bind(job.retry_count as i64)
		.bind(result)
		.bind(git)
		.bind(&job.id)
		.execute(&self.pool)
		.await?;

		Ok(done.rows_affected())
	}

	async fn list(
		&self,
		pipeline_id: Option<&str>,
		filter: &JobFilter,
	) -> Result<JobPage> {
		let status = filter.status.map(|s| s.as_str());

		// Newest first by dispatch time, falling back to creation time for
		// jobs that never started.
		let rows = sqlx::query_as::<_, JobRow>(&format!(
			r#"
			SELECT {JOB_COLUMNS}
			FROM jobs
			WHERE (? IS NULL OR pipeline_id = ?)
			  AND (? IS NULL OR status = ?)
			ORDER BY COALESCE(started_at, created_at) DESC
			LIMIT ? OFFSET ?
			"#
		))
		.bind(pipeline_id)
		.bind(pipeline_id)
		.bind(status)
		.bind(status)
		.bind(filter.limit as i64)
		.bind(filter.offset as i64)
		.fetch_all(&self.pool)
		.await?;

		let jobs = rows
			.into_iter()
			.map(Self::decode)
			.collect::<Result<Vec<_>>>()?;

		let total = if filter.include_total {
			let (count,): (i64,) = sqlx::query_as(
				r#"
				SELECT COUNT(*)
				FROM jobs
				WHERE (? IS NULL OR pipeline_id = ?)
				  AND (? IS NULL OR status = ?)
				"#,
			)
			.bind(pipeline_id)
			.bind(pipeline_id)
			.bind(status)
			.bind(status)
			.fetch_one(&self.pool)
			.await?;
			Some(count as u32)
		} else {
			None
		};

		Ok(JobPage { jobs, total })
	}
}

#[async_trait]
impl JobStore for SqliteJobStore {
	#[tracing::instrument(skip(self, job), fields(job_id = %job.id, pipeline_id = %job.pipeline_id))]
	async fn insert(&self, job: &Job) -> Result<()> {
		let data = serde_json::to_string(&job.data)?;
		let error = job.error.as_ref().map(serde_json::to_string).transpose()?;
		let error_type = job
			.error
			.as_ref()
			.and_then(|e| e.category)
			.map(|c| c.as_str().to_string());
		let result = job.result.as_ref().map(serde_json::to_string).transpose()?;
		let git = job.git.as_ref().map(serde_json::to_string).transpose()?;

		let done = sqlx::query(
			r#"
			INSERT OR IGNORE INTO jobs (
				id, pipeline_id, status, created_at, started_at, completed_at,
				duration, progress, current_operation, error, error_type,
				retry_count, max_retries, data, result, git
			)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&job.id)
		.bind(&job.pipeline_id)
		.bind(job.status.as_str())
		.bind(job.created_at)
		.bind(job.started_at)
		.bind(job.completed_at)
		.bind(job.duration_ms())
		.bind(job.progress.map(|p| p as i64))
		.bind(&job.current_operation)
		.bind(error)
		.bind(error_type)
		.bind(job.retry_count as i64)
		.bind(job.max_retries as i64)
		.bind(data)
		.bind(result)
		.bind(git)
		.execute(&self.pool)
		.await?;

		if done.rows_affected() == 0 {
			return Err(StoreError::Conflict(job.id.clone()));
		}

		Ok(())
	}

	#[tracing::instrument(skip(self, patch))]
	async fn update(&self, id: &str, patch: JobPatch) -> Result<()> {
		let Some(mut job) = self.get(id).await? else {
			return Err(StoreError::NotFound(id.to_string()));
		};

		patch.apply(&mut job);

		if self.write_mutable_columns(&job).await? == 0 {
			return Err(StoreError::NotFound(id.to_string()));
		}

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	async fn get(&self, id: &str) -> Result<Option<Job>> {
		let row = sqlx::query_as::<_, JobRow>(&format!(
			"SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"
		))
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(Self::decode).transpose()
	}

	#[tracing::instrument(skip(self, filter))]
	async fn list_by_pipeline(&self, pipeline_id: &str, filter: &JobFilter) -> Result<JobPage> {
		self.list(Some(pipeline_id), filter).await
	}

	#[tracing::instrument(skip(self, filter))]
	async fn list_all(&self, filter: &JobFilter) -> Result<JobPage> {
		self.list(None, filter).await
	}

	#[tracing::instrument(skip(self, jobs), fields(batch = jobs.len()))]
	async fn bulk_import(&self, jobs: &[Job]) -> Result<BulkImportReport> {
		let mut report = BulkImportReport::default();

		for job in jobs {
			match self.insert(job).await {
				Ok(()) => report.imported += 1,
				Err(StoreError::Conflict(_)) => report.skipped += 1,
				Err(e) => report.errors.push(format!("{}: {e}", job.id)),
			}
		}

		tracing::info!(
			imported = report.imported,
			skipped = report.skipped,
			errors = report.errors.len(),
			"bulk import finished"
		);

		Ok(report)
	}

	#[tracing::instrument(skip(self))]
	async fn sweep_abandoned(&self) -> Result<u64> {
		let failure = JobFailure::new("abandoned");
		let error = serde_json::to_string(&failure)?;

		let done = sqlx::query(
			r#"
			UPDATE jobs
			SET status = 'failed',
			    completed_at = ?,
			    error = ?,
			    error_type = 'unknown'
			WHERE status = 'running'
			"#,
		)
		.bind(Utc::now())
		.bind(error)
		.execute(&self.pool)
		.await?;

		let swept = done.rows_affected();
		if swept > 0 {
			tracing::warn!(swept, "marked abandoned jobs as failed");
		}

		Ok(swept)
	}

	#[tracing::instrument(skip(self))]
	async fn delete_old_jobs(&self, retention_days: u32) -> Result<u64> {
		let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
		let done = sqlx::query("DELETE FROM jobs WHERE completed_at < ?")
			.bind(cutoff)
			.execute(&self.pool)
			.await?;

		Ok(done.rows_affected())
	}
}
