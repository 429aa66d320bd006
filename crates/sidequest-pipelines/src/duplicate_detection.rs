// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use sidequest_core::{Job, PipelineError};
use sidequest_events::{EventBus, PipelineEvent};
use sidequest_scheduler::{JobContext, PipelineHandler, PipelineScheduler};

use crate::repo_config::{RepositoryConfig, RepositoryConfigStore, ScanRecord};

pub const PIPELINE_ID: &str = "duplicate-detection";

/// Impact score (0-100) at or above which a duplicate group is flagged.
pub const DEFAULT_HIGH_IMPACT_THRESHOLD: u8 = 75;

/// How many scan records a repository keeps.
const SCAN_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
	/// Cross-repository scan over a group of repos.
	Inter,
	/// Per-repository scan.
	Intra,
}

/// Input for one scan job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJobData {
	pub scan_type: ScanType,
	pub repositories: Vec<RepositoryConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub group_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
	pub impact_score: u8,
	pub files: Vec<String>,
	#[serde(default)]
	pub detail: serde_json::Value,
}

/// What a scanner collaborator returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResult {
	#[serde(default)]
	pub metrics: serde_json::Value,
	#[serde(default)]
	pub duplicate_groups: Vec<DuplicateGroup>,
	#[serde(default)]
	pub suggestions: Vec<serde_json::Value>,
}

/// External scanning collaborators; concrete analysis lives outside the
/// runtime.
#[async_trait]
pub trait DuplicateScanner: Send + Sync {
	async fn scan_intra(&self, repo: &RepositoryConfig) -> Result<ScanResult, PipelineError>;
	async fn scan_inter(&self, repos: &[RepositoryConfig]) -> Result<ScanResult, PipelineError>;
}

/// Opens consolidation pull requests for high-impact findings.
#[async_trait]
pub trait ConsolidationPrDelegate: Send + Sync {
	async fn open_consolidation_pr(
		&self,
		group: &DuplicateGroup,
	) -> Result<String, PipelineError>;
}

/// Scans the repository fleet for duplicated code, inter- and
/// intra-project.
pub struct DuplicateDetectionWorker {
	repo_store: Arc<dyn RepositoryConfigStore>,
	scanner: Arc<dyn DuplicateScanner>,
	auto_pr: Option<Arc<dyn ConsolidationPrDelegate>>,
	bus: Arc<EventBus>,
	high_impact_threshold: u8,
}

impl DuplicateDetectionWorker {
	pub fn new(
		repo_store: Arc<dyn RepositoryConfigStore>,
		scanner: Arc<dyn DuplicateScanner>,
		auto_pr: Option<Arc<dyn ConsolidationPrDelegate>>,
		bus: Arc<EventBus>,
	) -> Self {
		Self {
			repo_store,
			scanner,
			auto_pr,
			bus,
			high_impact_threshold: DEFAULT_HIGH_IMPACT_THRESHOLD,
		}
	}

	pub fn with_high_impact_threshold(mut self, threshold: u8) -> Self {
		self.high_impact_threshold = threshold;
		self
	}

	/// Repositories due for their next scan.
	pub async fn repos_due_tonight(&self) -> Result<Vec<RepositoryConfig>, PipelineError> {
		let now = Utc::now();
		Ok(self
			.repo_store
			.list()
			.await?
			.into_iter()
			.filter(|repo| repo.is_due(now))
			.collect())
	}

	async fn record_scan(
		&self,
		repositories: &[RepositoryConfig],
		scan_type: ScanType,
		duplicates_found: usize,
	) {
		let now = Utc::now();
		for repo in repositories {
			if repo.is_test_repo() {
				continue;
			}
			let mut updated = repo.clone();
			updated.last_scanned_at = Some(now);
			updated.scan_history.push(ScanRecord {
				scanned_at: now,
				scan_type,
				duplicates_found,
			});
			if updated.scan_history.len() > SCAN_HISTORY_LIMIT {
				let excess = updated.scan_history.len() - SCAN_HISTORY_LIMIT;
				updated.scan_history.drain(..excess);
			}
			if let Err(e) = self.repo_store.upsert(&updated).await {
				warn!(repo = %repo.name, error = %e, "failed to record scan history");
			}
		}
	}

	async fn open_consolidation_prs(&self, high_impact: &[&DuplicateGroup]) -> Vec<String> {
		let Some(delegate) = &self.auto_pr else {
			return Vec::new();
		};
		let mut urls = Vec::new();
		for group in high_impact {
			match delegate.open_consolidation_pr(group).await {
				Ok(url) => urls.push(url),
				Err(e) => {
					warn!(error = %e, "consolidation PR failed");
				}
			}
		}
		urls
	}
}

#[async_trait]
impl PipelineHandler for DuplicateDetectionWorker {
	fn pipeline_id(&self) -> &str {
		PIPELINE_ID
	}

	#[instrument(skip(self, job, ctx), fields(job_id = %job.id))]
	async fn run_job_handler(
		&self,
		job: &Job,
		ctx: &JobContext,
	) -> Result<serde_json::Value, PipelineError> {
		ctx.check_cancelled()?;

		let data: ScanJobData = serde_json::from_value(job.data.clone())?;
		if data.repositories.is_empty() {
			return Err(PipelineError::validation(
				"missing required field: repositories",
			));
		}

		ctx.report_progress(10, Some("scanning"));
		let result = match data.scan_type {
			ScanType::Inter => self.scanner.scan_inter(&data.repositories).await?,
			ScanType::Intra => {
				// Per-repository orchestration: scan each repo and fold the
				// findings.
				let mut merged = ScanResult::default();
				let total = data.repositories.len();
				for (index, repo) in data.repositories.iter().enumerate() {
					ctx.check_cancelled()?;
					let one = self.scanner.scan_intra(repo).await?;
					merged.duplicate_groups.extend(one.duplicate_groups);
					merged.suggestions.extend(one.suggestions);
					let progress = 10 + (70 * (index + 1) / total) as u8;
					let label = format!("scanned {}", repo.name);
					ctx.report_progress(progress, Some(&label));
				}
				merged
			}
		};

		ctx.report_progress(85, Some("recording results"));
		self
			.record_scan(
				&data.repositories,
				data.scan_type,
				result.duplicate_groups.len(),
			)
			.await;

		let high_impact: Vec<&DuplicateGroup> = result
			.duplicate_groups
			.iter()
			.filter(|group| group.impact_score >= self.high_impact_threshold)
			.collect();

		if !high_impact.is_empty() {
			info!(
				job_id = %job.id,
				high_impact = high_impact.len(),
				threshold = self.high_impact_threshold,
				"high-impact duplicates found"
			);
		}
		let pr_urls = self.open_consolidation_prs(&high_impact).await;

		let summary = serde_json::json!({
			"scan_type": data.scan_type,
			"group_name": data.group_name,
			"repositories": data.repositories.len(),
			"duplicate_groups": result.duplicate_groups.len(),
			"high_impact": high_impact.len(),
			"suggestions": result.suggestions.len(),
		});
		self.bus.emit(PipelineEvent::ScanCompleted {
			job_id: job.id.clone(),
			pipeline_id: PIPELINE_ID.to_string(),
			summary: summary.clone(),
		});

		Ok(serde_json::json!({
			"summary": summary,
			"metrics": result.metrics,
			"duplicate_groups": result.duplicate_groups,
			"suggestions": result.suggestions,
			"consolidation_prs": pr_urls,
		}))
	}
}

/// Queue an intra-project scan job for every repository that is due.
pub async fn schedule_due_scans(
	worker: &DuplicateDetectionWorker,
	scheduler: &PipelineScheduler,
) -> Result<Vec<Job>, PipelineError> {
	let due = worker.repos_due_tonight().await?;
	let mut jobs = Vec::new();
	for repo in due {
		let data = serde_json::to_value(ScanJobData {
			scan_type: ScanType::Intra,
			repositories: vec![repo.clone()],
			group_name: None,
		})?;
		match scheduler.create_job_auto(data).await {
			Ok(job) => jobs.push(job),
			Err(e) => warn!(repo = %repo.name, error = %e, "failed to queue scan"),
		}
	}
	Ok(jobs)
}
