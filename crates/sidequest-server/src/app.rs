// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Composition root: wires the runtime crates into an [`AppState`] from
//! resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::info;

use sidequest_config::SidequestConfig;
use sidequest_core::{Clock, PipelineConfig};
use sidequest_db::{JobStore, SqliteJobStore};
use sidequest_events::{ActivityFeed, Broadcaster, EventBus};
use sidequest_git::{
	CommandGitClient, GitWorkflow, GitWorkflowConfig, HttpPullRequestClient, PullRequestClient,
};
use sidequest_pipelines::{
	CommandScanner, CommandSchemaGenerator, DuplicateDetectionWorker, JsonFileRepoStore,
	RepomixConfig, RepomixWorker, SchemaEnhancementWorker,
};
use sidequest_retry::RetryController;
use sidequest_scheduler::{PipelineScheduler, SchedulerDeps, WorkerRegistry};

use crate::api::AppState;

fn build_git_workflow(config: &SidequestConfig) -> Arc<GitWorkflow> {
	let pr_client: Option<Arc<dyn PullRequestClient>> = config
		.git
		.forge_token
		.as_ref()
		.and_then(|token| {
			HttpPullRequestClient::new(config.git.forge_api_url.clone(), token.clone()).ok()
		})
		.map(|client| Arc::new(client) as Arc<dyn PullRequestClient>);

	Arc::new(GitWorkflow::new(
		Arc::new(CommandGitClient::new()),
		pr_client,
		GitWorkflowConfig {
			branch_prefix: config.git.branch_prefix.clone(),
			base_branch: config.git.base_branch.clone(),
			dry_run: config.git.dry_run,
			enable_pr_creation: config.git.enable_pr_creation,
			pr_dry_run: config.git.pr_dry_run,
		},
	))
}

/// Build the full application state: event bus, activity feed, store,
/// retry controller, git workflow, and the worker registry with the three
/// shipped pipelines.
pub fn build_app_state(config: &SidequestConfig, pool: SqlitePool) -> AppState {
	let bus = Arc::new(EventBus::with_defaults());

	let feed = Arc::new(ActivityFeed::new(config.runtime.max_activities));
	bus.subscribe(feed.clone());

	let broadcaster = Arc::new(Broadcaster::with_defaults());
	bus.subscribe(broadcaster);

	let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(pool));
	let retry = Arc::new(RetryController::new(
		Arc::clone(&bus),
		config.runtime.max_absolute_attempts,
	));

	let deps = SchedulerDeps {
		bus: Arc::clone(&bus),
		store: Some(Arc::clone(&store)),
		retry,
		git: Some(build_git_workflow(config)),
		clock: Arc::new(Clock::new()),
	};

	let mut registry = WorkerRegistry::new();

	{
		let deps = deps.clone();
		let section = config.repomix.clone();
		registry.register(
			"repomix",
			Box::new(move || {
				let worker = RepomixWorker::new(RepomixConfig {
					binary: section.binary.clone(),
					output_dir: PathBuf::from(&section.output_dir),
					timeout: Duration::from_secs(section.timeout_secs),
					preflight_timeout: Duration::from_secs(15),
					additional_ignores: Vec::new(),
				});
				PipelineScheduler::new(
					PipelineConfig {
						max_concurrent: section.max_concurrent,
						retry_attempts: section.retry_attempts,
						retry_delay_ms: section.retry_delay_ms,
						persistence_enabled: true,
						enable_git_workflow: false,
					},
					Arc::new(worker),
					deps.clone(),
				)
			}),
		);
	}

	{
		let deps = deps.clone();
		let section = config.duplicate_detection.clone();
		registry.register(
			"duplicate-detection",
			Box::new(move || {
				let worker = DuplicateDetectionWorker::new(
					Arc::new(JsonFileRepoStore::new(&section.repos_file)),
					Arc::new(CommandScanner::new(
						section.scan_command.clone(),
						section.inter_scan_command.clone(),
					)),
					None,
					Arc::clone(&deps.bus),
				)
				.with_high_impact_threshold(section.high_impact_threshold);
				PipelineScheduler::new(
					PipelineConfig {
						max_concurrent: section.max_concurrent,
						retry_attempts: section.retry_attempts,
						retry_delay_ms: section.retry_delay_ms,
						persistence_enabled: true,
						enable_git_workflow: false,
					},
					Arc::new(worker),
					deps.clone(),
				)
			}),
		);
	}

	{
		let deps = deps.clone();
		let section = config.schema_enhancement.clone();
		let git_enabled = config.git.enable_git_workflow;
		registry.register(
			"schema-enhancement",
			Box::new(move || {
				let worker = SchemaEnhancementWorker::new(
					Arc::new(CommandSchemaGenerator::new(section.generate_command.clone())),
					section.dry_run,
				);
				PipelineScheduler::new(
					PipelineConfig {
						max_concurrent: section.max_concurrent,
						retry_attempts: section.retry_attempts,
						retry_delay_ms: section.retry_delay_ms,
						persistence_enabled: true,
						enable_git_workflow: git_enabled,
					},
					Arc::new(worker),
					deps.clone(),
				)
			}),
		);
	}

	info!(
		pipelines = registry.supported_pipelines().len(),
		"application state built"
	);

	AppState {
		registry: Arc::new(registry),
		store,
		feed,
		bus,
		migration_api_key: config.runtime.migration_api_key.clone(),
	}
}
