// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Notify, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use sidequest_core::{
	Clock, Job, JobFailure, JobPatch, JobStats, JobStatus, PipelineConfig, PipelineError,
};
use sidequest_db::JobStore;
use sidequest_events::{EventBus, PipelineEvent};
use sidequest_git::{
	BranchRequest, CommitOutcome, CommitRequest, GitError, GitWorkflow, PrRequest,
};
use sidequest_retry::{classify, Classification, RetryController, ScheduledRetry};

use crate::context::{CancellationToken, JobContext};
use crate::error::{Result, SchedulerError};
use crate::handler::PipelineHandler;

/// Shared collaborators injected into every scheduler.
#[derive(Clone)]
pub struct SchedulerDeps {
	pub bus: Arc<EventBus>,
	pub store: Option<Arc<dyn JobStore>>,
	pub retry: Arc<RetryController>,
	pub git: Option<Arc<GitWorkflow>>,
	pub clock: Arc<Clock>,
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
	/// The job was still queued and is now cancelled.
	Cancelled,
	/// The job is running; the cooperative flag has been set.
	CancelRequested,
	/// The job had already reached a terminal state.
	AlreadyTerminal,
	NotFound,
}

struct JobEntry {
	job: Job,
	token: CancellationToken,
}

struct DelayedJob {
	fire_at: Instant,
	retry: ScheduledRetry,
}

impl PartialEq for DelayedJob {
	fn eq(&self, other: &Self) -> bool {
		self.fire_at == other.fire_at
	}
}

impl Eq for DelayedJob {}

impl PartialOrd for DelayedJob {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for DelayedJob {
	// Reversed so the BinaryHeap pops the earliest fire time first.
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		other.fire_at.cmp(&self.fire_at)
	}
}

struct SchedulerState {
	/// FIFO dispatch order. Pipelines needing priority dispatch would
	/// insert at a computed position here; none of the shipped pipelines
	/// do.
	queue: VecDeque<String>,
	active: HashSet<String>,
	jobs: HashMap<String, JobEntry>,
	delayed: BinaryHeap<DelayedJob>,
	paused: bool,
	shutting_down: bool,
}

/// Queue + active set for one pipeline.
///
/// All dispatch-state transitions are serialized behind one mutex; handlers
/// run on spawned tasks and reach back only through the job context. The
/// lock is never held across an await point.
pub struct PipelineScheduler {
	config: PipelineConfig,
	handler: Arc<dyn PipelineHandler>,
	deps: SchedulerDeps,
	state: Mutex<SchedulerState>,
	wake: Notify,
	initialized: OnceCell<()>,
	dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineScheduler {
	pub fn new(
		config: PipelineConfig,
		handler: Arc<dyn PipelineHandler>,
		deps: SchedulerDeps,
	) -> Arc<Self> {
		Arc::new(Self {
			config,
			handler,
			deps,
			state: Mutex::new(SchedulerState {
				queue: VecDeque::new(),
				active: HashSet::new(),
				jobs: HashMap::new(),
				delayed: BinaryHeap::new(),
				paused: false,
				shutting_down: false,
			}),
			wake: Notify::new(),
			initialized: OnceCell::new(),
			dispatch_task: Mutex::new(None),
		})
	}

	pub fn pipeline_id(&self) -> &str {
		self.handler.pipeline_id()
	}

	pub fn config(&self) -> &PipelineConfig {
		&self.config
	}

	pub fn clock(&self) -> &Clock {
		&self.deps.clock
	}

	/// Spawn the dispatch loop. Called once after construction.
	pub fn start(self: &Arc<Self>) {
		let mut task = self.dispatch_task.lock().expect("dispatch task poisoned");
		if task.is_some() {
			return;
		}
		let scheduler = Arc::clone(self);
		*task = Some(tokio::spawn(async move {
			scheduler.dispatch_loop().await;
		}));
	}

	/// Pipeline warm-up; idempotent.
	pub async fn initialize(&self) -> Result<()> {
		self
			.initialized
			.get_or_try_init(|| async {
				self
					.handler
					.initialize()
					.await
					.map_err(|e| SchedulerError::Initialize(e.to_string()))
			})
			.await?;
		Ok(())
	}

	#[instrument(skip(self, data), fields(pipeline_id = %self.pipeline_id()))]
	pub async fn create_job(&self, id: &str, data: serde_json::Value) -> Result<Job> {
		self
			.admit_job(id.to_string(), data, self.config.retry_attempts, 0)
			.await
	}

	/// Create a job with a generated `{pipeline}-{wall_ms}` ID.
	pub async fn create_job_auto(&self, data: serde_json::Value) -> Result<Job> {
		let id = self.deps.clock.next_id(self.pipeline_id());
		self.create_job(&id, data).await
	}

	async fn admit_job(
		&self,
		id: String,
		data: serde_json::Value,
		max_retries: u32,
		retry_count: u32,
	) -> Result<Job> {
		let mut job = Job::queued(
			id.clone(),
			self.pipeline_id(),
			data,
			max_retries,
			self.deps.clock.now(),
		);
		job.retry_count = retry_count;

		{
			let mut state = self.state.lock().expect("scheduler state poisoned");
			if state.shutting_down {
				return Err(SchedulerError::ShuttingDown);
			}
			if state.jobs.contains_key(&id) {
				return Err(SchedulerError::Conflict(id));
			}
			state.jobs.insert(
				id.clone(),
				JobEntry {
					job: job.clone(),
					token: CancellationToken::new(),
				},
			);
		}

		// Persist before the job becomes dispatchable. A storage failure is
		// non-fatal for in-memory correctness; the run is simply forgotten
		// across a restart.
		self.persist_insert(&job).await;

		self.deps.bus.emit(PipelineEvent::JobCreated {
			job_id: id.clone(),
			pipeline_id: self.pipeline_id().to_string(),
		});

		{
			let mut state = self.state.lock().expect("scheduler state poisoned");
			state.queue.push_back(id);
		}
		self.wake.notify_one();

		Ok(job)
	}

	#[instrument(skip(self), fields(pipeline_id = %self.pipeline_id()))]
	pub async fn cancel_job(&self, id: &str) -> CancelOutcome {
		let outcome = {
			let mut state = self.state.lock().expect("scheduler state poisoned");
			let Some(entry) = state.jobs.get_mut(id) else {
				return CancelOutcome::NotFound;
			};

			match entry.job.status {
				JobStatus::Queued => {
					entry.job.mark_cancelled(self.deps.clock.now());
					let snapshot = entry.job.clone();
					state.queue.retain(|queued| queued != id);
					(CancelOutcome::Cancelled, Some(snapshot))
				}
				JobStatus::Running => {
					entry.job.cancel_requested = true;
					entry.token.cancel();
					(CancelOutcome::CancelRequested, None)
				}
				_ => (CancelOutcome::AlreadyTerminal, None),
			}
		};

		let (outcome, snapshot) = outcome;
		if let Some(snapshot) = snapshot {
			self.persist_update(&snapshot).await;
			self.deps.bus.emit(PipelineEvent::JobCancelled {
				job_id: snapshot.id.clone(),
				pipeline_id: self.pipeline_id().to_string(),
			});
			info!(job_id = %snapshot.id, "queued job cancelled");
		}

		outcome
	}

	pub fn get_job(&self, id: &str) -> Option<Job> {
		let state = self.state.lock().expect("scheduler state poisoned");
		state.jobs.get(id).map(|entry| entry.job.clone())
	}

	/// All jobs, newest first by dispatch time.
	pub fn get_all_jobs(&self) -> Vec<Job> {
		let state = self.state.lock().expect("scheduler state poisoned");
		let mut jobs: Vec<Job> = state.jobs.values().map(|entry| entry.job.clone()).collect();
		jobs.sort_by_key(|job| std::cmp::Reverse(job.started_at.unwrap_or(job.created_at)));
		jobs
	}

	pub fn get_stats(&self) -> JobStats {
		let state = self.state.lock().expect("scheduler state poisoned");
		let mut stats = JobStats {
			total: state.jobs.len(),
			queued: state.queue.len(),
			active: state.active.len(),
			..JobStats::default()
		};
		for entry in state.jobs.values() {
			match entry.job.status {
				JobStatus::Completed => stats.completed += 1,
				JobStatus::Failed => stats.failed += 1,
				JobStatus::Cancelled => stats.cancelled += 1,
				_ => {}
			}
		}
		stats
	}

	pub fn is_paused(&self) -> bool {
		self.state.lock().expect("scheduler state poisoned").paused
	}

	pub fn pause(&self) {
		self.set_paused(true);
	}

	pub fn resume(&self) {
		self.set_paused(false);
	}

	/// Suspend or resume dispatch without draining active jobs.
	pub fn set_paused(&self, paused: bool) {
		let changed = {
			let mut state = self.state.lock().expect("scheduler state poisoned");
			let changed = state.paused != paused;
			state.paused = paused;
			changed
		};
		if changed {
			info!(pipeline_id = %self.pipeline_id(), paused, "pipeline pause state changed");
			self.deps.bus.emit(PipelineEvent::PipelineStatus {
				pipeline_id: self.pipeline_id().to_string(),
				paused,
			});
			self.wake.notify_one();
		}
	}

	/// Stop admitting and dispatching jobs. Active handlers drain on their
	/// own; in-flight work lost to a crash surfaces as abandoned at the next
	/// startup sweep.
	pub fn shutdown(&self) {
		{
			let mut state = self.state.lock().expect("scheduler state poisoned");
			state.shutting_down = true;
		}
		self.wake.notify_one();
	}

	async fn dispatch_loop(self: Arc<Self>) {
		debug!(pipeline_id = %self.pipeline_id(), "dispatch loop started");
		loop {
			let (due, next_fire, shutting_down) = {
				let mut state = self.state.lock().expect("scheduler state poisoned");
				let now = Instant::now();
				let mut due = Vec::new();
				while state
					.delayed
					.peek()
					.map(|d| d.fire_at <= now)
					.unwrap_or(false)
				{
					due.push(state.delayed.pop().expect("peeked entry vanished").retry);
				}
				let next_fire = state.delayed.peek().map(|d| d.fire_at);
				(due, next_fire, state.shutting_down)
			};

			if shutting_down {
				debug!(pipeline_id = %self.pipeline_id(), "dispatch loop stopping");
				break;
			}

			// Due retry successors become ordinary queued jobs.
			for retry in due {
				let admitted = self
					.admit_job(
						retry.successor_id.clone(),
						retry.data.clone(),
						retry.max_retries,
						retry.attempt,
					)
					.await;
				if let Err(e) = admitted {
					warn!(
						successor_id = %retry.successor_id,
						error = %e,
						"failed to admit retry successor"
					);
				}
			}

			self.dispatch_ready().await;

			tokio::select! {
				_ = self.wake.notified() => {}
				_ = async {
					match next_fire {
						Some(at) => tokio::time::sleep_until(at).await,
						None => std::future::pending::<()>().await,
					}
				} => {}
			}
		}
	}

	/// Move queued jobs into the active set while capacity remains.
	async fn dispatch_ready(self: &Arc<Self>) {
		let started = {
			let mut state = self.state.lock().expect("scheduler state poisoned");
			let mut started = Vec::new();
			while !state.paused
				&& state.active.len() < self.config.max_concurrent
				&& !state.queue.is_empty()
			{
				let id = state.queue.pop_front().expect("checked non-empty");
				let Some(entry) = state.jobs.get_mut(&id) else {
					continue;
				};
				if entry.job.status != JobStatus::Queued {
					continue;
				}
				entry.job.mark_running(self.deps.clock.now());
				started.push((entry.job.clone(), entry.token.clone()));
				state.active.insert(id.clone());
			}
			started
		};

		for (job, token) in started {
			self.persist_update(&job).await;
			self.deps.bus.emit(PipelineEvent::JobStarted {
				job_id: job.id.clone(),
				pipeline_id: self.pipeline_id().to_string(),
			});

			let scheduler = Arc::clone(self);
			tokio::spawn(async move {
				scheduler.run_one(job, token).await;
			});
		}
	}

	async fn run_one(self: Arc<Self>, job: Job, token: CancellationToken) {
		let ctx = self.job_context(&job.id, token.clone());

		let git = self
			.config
			.enable_git_workflow
			.then(|| self.deps.git.clone())
			.flatten();
		let repo_path = git
			.as_ref()
			.and_then(|_| self.handler.repo_path(&job));

		// One job per repository: hold the named lock for the entire git
		// section, handler included.
		let _repo_guard = match (&git, &repo_path) {
			(Some(git), Some(path)) => Some(git.locks().lock(path).await),
			_ => None,
		};

		let mut branch = None;
		if let (Some(git), Some(path)) = (&git, &repo_path) {
			let request = BranchRequest {
				job_id: job.id.clone(),
				job_type: self.pipeline_id().to_string(),
				description: job
					.data
					.get("description")
					.and_then(|v| v.as_str())
					.unwrap_or_default()
					.to_string(),
			};
			match git.create_job_branch(path, &request).await {
				Ok(name) => {
					self.record_git(&job.id, |info| info.branch_name = Some(name.clone()));
					branch = Some(name);
				}
				Err(e) => {
					self.finalize_failure(&job.id, pipeline_error_from_git(e)).await;
					return;
				}
			}
		}

		match self.handler.run_job_handler(&job, &ctx).await {
			Ok(result) => {
				if token.is_cancelled() {
					// Best-effort cancellation: the handler ignored the flag
					// and ran to completion.
					self.deps.bus.emit(PipelineEvent::CancelIgnored {
						job_id: job.id.clone(),
						pipeline_id: self.pipeline_id().to_string(),
					});
				}
				self.finalize_success(&job.id, result).await;

				if let (Some(git), Some(path), Some(branch)) = (&git, &repo_path, branch) {
					self.run_git_post_steps(git, path, &job.id, &branch).await;
				}
			}
			Err(err) if err.is_cancelled() && token.is_cancelled() => {
				self.finalize_cancelled(&job.id).await;
			}
			Err(err) => {
				self.finalize_failure(&job.id, err).await;
			}
		}
	}

	fn job_context(self: &Arc<Self>, job_id: &str, token: CancellationToken) -> JobContext {
		let weak: Weak<PipelineScheduler> = Arc::downgrade(self);
		let progress_job = job_id.to_string();
		JobContext::new(
			job_id,
			self.pipeline_id(),
			token,
			Arc::new(move |progress, operation| {
				if let Some(scheduler) = weak.upgrade() {
					scheduler.apply_progress(&progress_job, progress, operation);
				}
			}),
		)
	}

	fn apply_progress(&self, job_id: &str, progress: u8, operation: Option<String>) {
		{
			let mut state = self.state.lock().expect("scheduler state poisoned");
			let Some(entry) = state.jobs.get_mut(job_id) else {
				return;
			};
			if entry.job.status != JobStatus::Running {
				return;
			}
			entry.job.progress = Some(progress);
			entry.job.current_operation = operation.clone();
		}
		self.deps.bus.emit(PipelineEvent::MetricsUpdated {
			job_id: job_id.to_string(),
			pipeline_id: self.pipeline_id().to_string(),
			progress,
			operation,
		});
	}

	fn record_git(&self, job_id: &str, mutate: impl FnOnce(&mut sidequest_core::GitInfo)) {
		let mut state = self.state.lock().expect("scheduler state poisoned");
		if let Some(entry) = state.jobs.get_mut(job_id) {
			mutate(entry.job.git_mut());
		}
	}

	async fn finalize_success(&self, job_id: &str, result: serde_json::Value) {
		let snapshot = {
			let mut state = self.state.lock().expect("scheduler state poisoned");
			state.active.remove(job_id);
			let Some(entry) = state.jobs.get_mut(job_id) else {
				return;
			};
			entry.job.mark_completed(result, self.deps.clock.now());
			entry.job.clone()
		};

		info!(job_id, duration_ms = snapshot.duration_ms(), "job completed");
		self.deps.bus.emit(PipelineEvent::JobCompleted {
			job_id: job_id.to_string(),
			pipeline_id: self.pipeline_id().to_string(),
			duration_ms: snapshot.duration_ms(),
		});

		self.deps.retry.on_success(job_id);
		self.persist_update(&snapshot).await;
		self.wake.notify_one();
	}

	async fn finalize_cancelled(&self, job_id: &str) {
		let snapshot = {
			let mut state = self.state.lock().expect("scheduler state poisoned");
			state.active.remove(job_id);
			let Some(entry) = state.jobs.get_mut(job_id) else {
				return;
			};
			entry.job.mark_cancelled(self.deps.clock.now());
			entry.job.clone()
		};

		info!(job_id, "running job cancelled cooperatively");
		self.deps.bus.emit(PipelineEvent::JobCancelled {
			job_id: job_id.to_string(),
			pipeline_id: self.pipeline_id().to_string(),
		});

		self.persist_update(&snapshot).await;
		self.wake.notify_one();
	}

	async fn finalize_failure(&self, job_id: &str, err: PipelineError) {
		let mut classification = classify(&err);
		if classification.retryable && !self.handler.retry_policy().permits(classification.category)
		{
			// The pipeline declared itself unsafe to retry under this
			// classification.
			classification = Classification {
				retryable: false,
				suggested_delay: std::time::Duration::ZERO,
				reason: format!("{} (pipeline retry policy)", classification.reason),
				..classification
			};
		}

		let failure = JobFailure {
			message: classification.message.clone(),
			code: classification.code.clone(),
			stack: err.stack.clone(),
			retryable: Some(classification.retryable),
			category: Some(classification.category),
		};

		let snapshot = {
			let mut state = self.state.lock().expect("scheduler state poisoned");
			state.active.remove(job_id);
			let Some(entry) = state.jobs.get_mut(job_id) else {
				return;
			};
			entry.job.mark_failed(failure, self.deps.clock.now());
			entry.job.clone()
		};

		warn!(
			job_id,
			category = classification.category.as_str(),
			retryable = classification.retryable,
			error = %classification.message,
			"job failed"
		);
		self.deps.bus.emit(PipelineEvent::JobFailed {
			job_id: job_id.to_string(),
			pipeline_id: self.pipeline_id().to_string(),
			message: classification.message.clone(),
			category: Some(classification.category),
		});

		if let Some(retry) = self
			.deps
			.retry
			.on_failure(&snapshot, &classification, &self.config)
		{
			let fire_at = Instant::now() + retry.delay;
			let mut state = self.state.lock().expect("scheduler state poisoned");
			state.delayed.push(DelayedJob { fire_at, retry });
		}

		self.persist_update(&snapshot).await;
		self.wake.notify_one();
	}

	async fn run_git_post_steps(
		&self,
		git: &Arc<GitWorkflow>,
		repo_path: &std::path::Path,
		job_id: &str,
		branch: &str,
	) {
		let Some(snapshot) = self.get_job(job_id) else {
			return;
		};

		let commit = self.handler.commit_message(&snapshot);
		let outcome = git
			.commit_changes(
				repo_path,
				&CommitRequest {
					message: commit.title.clone(),
					description: (!commit.body.is_empty()).then(|| commit.body.clone()),
					job_id: job_id.to_string(),
				},
			)
			.await;

		match outcome {
			Ok(CommitOutcome::Committed { sha }) => {
				self.record_git(job_id, |info| info.commits.push(sha.clone()));

				if let Err(e) = git.push_branch(repo_path, branch).await {
					warn!(job_id, error = %e, "push failed after commit");
					self
						.deps
						.bus
						.error_sink()
						.report("git-workflow", &format!("push failed for {job_id}: {e}"));
				} else if git.config().enable_pr_creation
					|| git.config().dry_run
					|| git.config().pr_dry_run
				{
					let mut pr = self.handler.pr_context(&snapshot, &commit);
					if pr.branch_name.is_empty() {
						pr.branch_name = branch.to_string();
					}
					let request = PrRequest {
						branch_name: pr.branch_name,
						title: pr.title,
						body: pr.body,
						labels: pr.labels,
					};
					match git.create_pull_request(repo_path, &request).await {
						Ok(url) => {
							self.record_git(job_id, |info| info.pull_request_url = Some(url.clone()));
							self.deps.bus.emit(PipelineEvent::PrCreated {
								job_id: job_id.to_string(),
								pipeline_id: self.pipeline_id().to_string(),
								url,
							});
						}
						Err(e) => {
							self.deps.bus.emit(PipelineEvent::PrFailed {
								job_id: job_id.to_string(),
								pipeline_id: self.pipeline_id().to_string(),
								reason: e.to_string(),
							});
						}
					}
				}
			}
			Ok(CommitOutcome::NothingToCommit) => {
				debug!(job_id, "git workflow: nothing to commit");
			}
			Err(e) => {
				// The job's own outcome stands; git failure is informational.
				warn!(job_id, error = %e, "commit failed after successful handler");
				self
					.deps
					.bus
					.error_sink()
					.report("git-workflow", &format!("commit failed for {job_id}: {e}"));
			}
		}

		if let Some(updated) = self.get_job(job_id) {
			self.persist_update(&updated).await;
		}
	}

	async fn persist_insert(&self, job: &Job) {
		if !self.config.persistence_enabled {
			return;
		}
		let Some(store) = &self.deps.store else {
			return;
		};
		if let Err(e) = store.insert(job).await {
			warn!(job_id = %job.id, error = %e, "failed to persist job; continuing in memory");
			self.deps.bus.emit(PipelineEvent::StorageWarning {
				job_id: Some(job.id.clone()),
				pipeline_id: self.pipeline_id().to_string(),
				message: format!("insert failed: {e}"),
			});
		}
	}

	async fn persist_update(&self, job: &Job) {
		if !self.config.persistence_enabled {
			return;
		}
		let Some(store) = &self.deps.store else {
			return;
		};
		if let Err(e) = store.update(&job.id, JobPatch::from_job(job)).await {
			warn!(job_id = %job.id, error = %e, "failed to persist job update");
			self.deps.bus.emit(PipelineEvent::StorageWarning {
				job_id: Some(job.id.clone()),
				pipeline_id: self.pipeline_id().to_string(),
				message: format!("update failed: {e}"),
			});
		}
	}
}

fn pipeline_error_from_git(err: GitError) -> PipelineError {
	match &err {
		GitError::DirtyWorkingTree(path) => {
			PipelineError::validation(format!("working tree is dirty: {path}"))
		}
		GitError::NotARepository(path) => {
			PipelineError::not_found(format!("not a git repository: {path}"))
		}
		_ => PipelineError::new(err.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use sidequest_core::ErrorCategory;
	use sidequest_events::EventSubscriber;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;
	use tokio::time::timeout;

	struct TopicRecorder {
		seen: Mutex<Vec<(String, Option<String>)>>,
	}

	impl TopicRecorder {
		fn new() -> Arc<Self> {
			Arc::new(Self {
				seen: Mutex::new(Vec::new()),
			})
		}

		fn topics(&self) -> Vec<String> {
			self
				.seen
				.lock()
				.unwrap()
				.iter()
				.map(|(topic, _)| topic.clone())
				.collect()
		}

		fn topics_for(&self, job_id: &str) -> Vec<String> {
			self
				.seen
				.lock()
				.unwrap()
				.iter()
				.filter(|(_, id)| id.as_deref() == Some(job_id))
				.map(|(topic, _)| topic.clone())
				.collect()
		}
	}

	impl EventSubscriber for TopicRecorder {
		fn name(&self) -> &str {
			"topic-recorder"
		}

		fn on_event(
			&self,
			event: &PipelineEvent,
		) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
			self
				.seen
				.lock()
				.unwrap()
				.push((event.topic().to_string(), event.job_id().map(String::from)));
			Ok(())
		}
	}

	type HandlerFn = dyn Fn(Job, JobContext) -> futures::future::BoxFuture<'static, std::result::Result<serde_json::Value, PipelineError>>
		+ Send
		+ Sync;

	struct FnHandler {
		id: String,
		run: Arc<HandlerFn>,
		init_calls: AtomicUsize,
		policy: crate::handler::RetryPolicy,
	}

	impl FnHandler {
		fn new<F, Fut>(id: &str, f: F) -> Arc<Self>
		where
			F: Fn(Job, JobContext) -> Fut + Send + Sync + 'static,
			Fut: std::future::Future<Output = std::result::Result<serde_json::Value, PipelineError>>
				+ Send
				+ 'static,
		{
			Arc::new(Self {
				id: id.to_string(),
				run: Arc::new(move |job, ctx| Box::pin(f(job, ctx))),
				init_calls: AtomicUsize::new(0),
				policy: crate::handler::RetryPolicy::FollowClassifier,
			})
		}

		fn with_policy(id: &str, policy: crate::handler::RetryPolicy) -> Arc<Self> {
			Arc::new(Self {
				id: id.to_string(),
				run: Arc::new(|_, _| {
					Box::pin(async { Err(PipelineError::timeout("always times out")) })
				}),
				init_calls: AtomicUsize::new(0),
				policy,
			})
		}
	}

	#[async_trait]
	impl PipelineHandler for FnHandler {
		fn pipeline_id(&self) -> &str {
			&self.id
		}

		async fn initialize(&self) -> std::result::Result<(), PipelineError> {
			self.init_calls.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}

		async fn run_job_handler(
			&self,
			job: &Job,
			ctx: &JobContext,
		) -> std::result::Result<serde_json::Value, PipelineError> {
			(self.run)(job.clone(), ctx.clone()).await
		}

		fn retry_policy(&self) -> crate::handler::RetryPolicy {
			self.policy.clone()
		}
	}

	fn deps(bus: Arc<EventBus>) -> SchedulerDeps {
		SchedulerDeps {
			retry: Arc::new(RetryController::with_defaults(Arc::clone(&bus))),
			bus,
			store: None,
			git: None,
			clock: Arc::new(Clock::new()),
		}
	}

	fn scheduler_with(
		config: PipelineConfig,
		handler: Arc<dyn PipelineHandler>,
	) -> (Arc<PipelineScheduler>, Arc<TopicRecorder>) {
		let bus = Arc::new(EventBus::with_defaults());
		let recorder = TopicRecorder::new();
		bus.subscribe(recorder.clone());
		let scheduler = PipelineScheduler::new(config, handler, deps(bus));
		scheduler.start();
		(scheduler, recorder)
	}

	async fn wait_until(mut check: impl FnMut() -> bool) {
		timeout(Duration::from_secs(5), async {
			while !check() {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("condition not reached in time");
	}

	async fn wait_terminal(scheduler: &Arc<PipelineScheduler>, job_id: &str) -> Job {
		let scheduler = Arc::clone(scheduler);
		let id = job_id.to_string();
		timeout(Duration::from_secs(5), async move {
			loop {
				if let Some(job) = scheduler.get_job(&id) {
					if job.is_terminal() {
						return job;
					}
				}
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("job did not reach a terminal state")
	}

	#[tokio::test(start_paused = true)]
	async fn concurrency_cap_is_never_exceeded() {
		let gate = Arc::new(tokio::sync::Semaphore::new(0));
		let running = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));

		let handler = {
			let gate = Arc::clone(&gate);
			let running = Arc::clone(&running);
			let peak = Arc::clone(&peak);
			FnHandler::new("test", move |_, _| {
				let gate = Arc::clone(&gate);
				let running = Arc::clone(&running);
				let peak = Arc::clone(&peak);
				async move {
					let now = running.fetch_add(1, Ordering::SeqCst) + 1;
					peak.fetch_max(now, Ordering::SeqCst);
					let permit = gate.acquire().await.unwrap();
					permit.forget();
					running.fetch_sub(1, Ordering::SeqCst);
					Ok(serde_json::json!({"ok": true}))
				}
			})
		};

		let config = PipelineConfig {
			max_concurrent: 2,
			..PipelineConfig::default()
		};
		let (scheduler, recorder) = scheduler_with(config, handler);

		scheduler
			.create_job("a", serde_json::json!({}))
			.await
			.unwrap();
		scheduler
			.create_job("b", serde_json::json!({}))
			.await
			.unwrap();
		scheduler
			.create_job("c", serde_json::json!({}))
			.await
			.unwrap();

		// a and b start; c stays queued until one of them finishes.
		wait_until(|| scheduler.get_stats().active == 2).await;
		assert_eq!(scheduler.get_stats().queued, 1);
		assert!(scheduler.get_job("c").unwrap().status == JobStatus::Queued);

		gate.add_permits(1);
		wait_until(|| scheduler.get_job("c").map(|j| j.status) == Some(JobStatus::Running)).await;
		assert!(peak.load(Ordering::SeqCst) <= 2);

		gate.add_permits(2);
		wait_until(|| scheduler.get_stats().completed == 3).await;
		assert!(peak.load(Ordering::SeqCst) <= 2);

		// Per-job event order held throughout.
		for id in ["a", "b", "c"] {
			assert_eq!(
				recorder.topics_for(id),
				vec!["job:created", "job:started", "job:completed"]
			);
		}
	}

	#[tokio::test(start_paused = true)]
	async fn max_concurrent_one_is_strict_fifo() {
		let order = Arc::new(Mutex::new(Vec::new()));
		let handler = {
			let order = Arc::clone(&order);
			FnHandler::new("test", move |job, _| {
				let order = Arc::clone(&order);
				async move {
					order.lock().unwrap().push(job.id.clone());
					Ok(serde_json::json!({}))
				}
			})
		};

		let config = PipelineConfig {
			max_concurrent: 1,
			..PipelineConfig::default()
		};
		let (scheduler, _recorder) = scheduler_with(config, handler);

		for id in ["first", "second", "third", "fourth"] {
			scheduler
				.create_job(id, serde_json::json!({}))
				.await
				.unwrap();
		}

		wait_until(|| scheduler.get_stats().completed == 4).await;
		assert_eq!(
			order.lock().unwrap().clone(),
			vec!["first", "second", "third", "fourth"]
		);
	}

	#[tokio::test]
	async fn duplicate_job_id_is_a_deterministic_conflict() {
		let handler = FnHandler::new("test", |_, _| async {
			tokio::time::sleep(Duration::from_millis(50)).await;
			Ok(serde_json::json!({}))
		});
		let (scheduler, _recorder) = scheduler_with(PipelineConfig::default(), handler);

		scheduler
			.create_job("dup", serde_json::json!({}))
			.await
			.unwrap();
		let err = scheduler
			.create_job("dup", serde_json::json!({}))
			.await
			.unwrap_err();
		assert!(matches!(err, SchedulerError::Conflict(id) if id == "dup"));
	}

	#[tokio::test]
	async fn create_during_shutdown_is_rejected() {
		let handler = FnHandler::new("test", |_, _| async { Ok(serde_json::json!({})) });
		let (scheduler, _recorder) = scheduler_with(PipelineConfig::default(), handler);

		scheduler.shutdown();
		let err = scheduler
			.create_job("late", serde_json::json!({}))
			.await
			.unwrap_err();
		assert!(matches!(err, SchedulerError::ShuttingDown));
	}

	#[tokio::test(start_paused = true)]
	async fn retry_chain_runs_to_exhaustion() {
		let attempts = Arc::new(AtomicUsize::new(0));
		let handler = {
			let attempts = Arc::clone(&attempts);
			FnHandler::new("test", move |_, _| {
				let attempts = Arc::clone(&attempts);
				async move {
					attempts.fetch_add(1, Ordering::SeqCst);
					Err(
						PipelineError::timeout("timed out")
							.with_suggested_delay(Duration::from_millis(1_000)),
					)
				}
			})
		};

		let config = PipelineConfig {
			retry_attempts: 3,
			retry_delay_ms: 500,
			..PipelineConfig::default()
		};
		let (scheduler, recorder) = scheduler_with(config, handler);

		scheduler
			.create_job("flaky", serde_json::json!({}))
			.await
			.unwrap();

		// Original + three retries, then the chain ends.
		wait_until(|| {
			recorder
				.topics()
				.iter()
				.any(|t| t == "retry:max-attempts")
		})
		.await;
		wait_until(|| scheduler.get_stats().failed == 4).await;
		assert_eq!(attempts.load(Ordering::SeqCst), 4);

		let jobs = scheduler.get_all_jobs();
		let mut ids: Vec<_> = jobs.iter().map(|j| j.id.clone()).collect();
		ids.sort();
		assert_eq!(
			ids,
			vec!["flaky", "flaky-retry1", "flaky-retry2", "flaky-retry3"]
		);

		let scheduled = recorder
			.topics()
			.iter()
			.filter(|t| *t == "retry:scheduled")
			.count();
		assert_eq!(scheduled, 3);
	}

	#[tokio::test(start_paused = true)]
	async fn completed_original_never_retries() {
		let attempts = Arc::new(AtomicUsize::new(0));
		let handler = {
			let attempts = Arc::clone(&attempts);
			FnHandler::new("test", move |_, _| {
				let attempts = Arc::clone(&attempts);
				async move {
					// Fail once, then succeed.
					if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
						Err(PipelineError::timeout("first attempt times out"))
					} else {
						Ok(serde_json::json!({"ok": true}))
					}
				}
			})
		};

		let (scheduler, recorder) = scheduler_with(PipelineConfig::default(), handler);
		scheduler
			.create_job("recovers", serde_json::json!({}))
			.await
			.unwrap();

		wait_until(|| scheduler.get_stats().completed == 1).await;
		// Give the runtime a beat: no further retries may appear.
		tokio::time::sleep(Duration::from_secs(60)).await;
		assert_eq!(attempts.load(Ordering::SeqCst), 2);
		assert_eq!(
			recorder
				.topics()
				.iter()
				.filter(|t| *t == "retry:scheduled")
				.count(),
			1
		);
	}

	#[tokio::test]
	async fn non_retryable_failure_is_terminal() {
		let handler = FnHandler::new("test", |_, _| async {
			Err(PipelineError::validation("missing required field: path"))
		});
		let (scheduler, recorder) = scheduler_with(PipelineConfig::default(), handler);

		scheduler
			.create_job("bad-input", serde_json::json!({}))
			.await
			.unwrap();

		let job = wait_terminal(&scheduler, "bad-input").await;
		assert_eq!(job.status, JobStatus::Failed);
		let failure = job.error.unwrap();
		assert_eq!(failure.retryable, Some(false));
		assert_eq!(failure.category, Some(ErrorCategory::Validation));

		wait_until(|| {
			recorder
				.topics()
				.iter()
				.any(|t| t == "retry:max-attempts")
		})
		.await;
		assert_eq!(scheduler.get_all_jobs().len(), 1);
	}

	#[tokio::test]
	async fn pipeline_retry_policy_downgrades_classifier() {
		let handler = FnHandler::with_policy("test", crate::handler::RetryPolicy::Never);
		let (scheduler, _recorder) = scheduler_with(PipelineConfig::default(), handler);

		scheduler
			.create_job("no-retry", serde_json::json!({}))
			.await
			.unwrap();

		let job = wait_terminal(&scheduler, "no-retry").await;
		assert_eq!(job.error.unwrap().retryable, Some(false));
		assert_eq!(scheduler.get_all_jobs().len(), 1);
	}

	#[tokio::test]
	async fn cancel_queued_job_never_runs_the_handler() {
		let invocations = Arc::new(AtomicUsize::new(0));
		let handler = {
			let invocations = Arc::clone(&invocations);
			FnHandler::new("test", move |_, _| {
				let invocations = Arc::clone(&invocations);
				async move {
					invocations.fetch_add(1, Ordering::SeqCst);
					Ok(serde_json::json!({}))
				}
			})
		};
		let (scheduler, recorder) = scheduler_with(PipelineConfig::default(), handler);

		scheduler.pause();
		scheduler
			.create_job("x", serde_json::json!({}))
			.await
			.unwrap();
		let outcome = scheduler.cancel_job("x").await;
		assert_eq!(outcome, CancelOutcome::Cancelled);

		scheduler.resume();
		tokio::time::sleep(Duration::from_millis(50)).await;

		let job = scheduler.get_job("x").unwrap();
		assert_eq!(job.status, JobStatus::Cancelled);
		assert!(job.completed_at.is_some());
		assert_eq!(invocations.load(Ordering::SeqCst), 0);
		assert_eq!(recorder.topics_for("x"), vec!["job:created", "job:cancelled"]);
	}

	#[tokio::test]
	async fn cancel_running_job_cooperatively() {
		let handler = FnHandler::new("test", |_, ctx| async move {
			for _ in 0..200 {
				ctx.check_cancelled()?;
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
			Ok(serde_json::json!({}))
		});
		let (scheduler, recorder) = scheduler_with(PipelineConfig::default(), handler);

		scheduler
			.create_job("slow", serde_json::json!({}))
			.await
			.unwrap();
		wait_until(|| scheduler.get_job("slow").map(|j| j.status) == Some(JobStatus::Running))
			.await;

		let outcome = scheduler.cancel_job("slow").await;
		assert_eq!(outcome, CancelOutcome::CancelRequested);

		let job = wait_terminal(&scheduler, "slow").await;
		assert_eq!(job.status, JobStatus::Cancelled);
		assert_eq!(
			recorder.topics_for("slow"),
			vec!["job:created", "job:started", "job:cancelled"]
		);
	}

	#[tokio::test]
	async fn cancel_ignoring_handler_completes_with_informational_event() {
		let handler = FnHandler::new("test", |_, _| async move {
			// Deliberately never checks the token.
			tokio::time::sleep(Duration::from_millis(50)).await;
			Ok(serde_json::json!({"ok": true}))
		});
		let (scheduler, recorder) = scheduler_with(PipelineConfig::default(), handler);

		scheduler
			.create_job("stubborn", serde_json::json!({}))
			.await
			.unwrap();
		wait_until(|| {
			scheduler.get_job("stubborn").map(|j| j.status) == Some(JobStatus::Running)
		})
		.await;
		scheduler.cancel_job("stubborn").await;

		let job = wait_terminal(&scheduler, "stubborn").await;
		assert_eq!(job.status, JobStatus::Completed);
		let topics = recorder.topics_for("stubborn");
		assert!(topics.contains(&"cancel:ignored".to_string()));
		assert!(topics.contains(&"job:completed".to_string()));
	}

	#[tokio::test]
	async fn cancel_terminal_job_is_a_noop() {
		let handler = FnHandler::new("test", |_, _| async { Ok(serde_json::json!({})) });
		let (scheduler, _recorder) = scheduler_with(PipelineConfig::default(), handler);

		scheduler
			.create_job("done", serde_json::json!({}))
			.await
			.unwrap();
		wait_terminal(&scheduler, "done").await;

		assert_eq!(
			scheduler.cancel_job("done").await,
			CancelOutcome::AlreadyTerminal
		);
		assert_eq!(
			scheduler.cancel_job("ghost").await,
			CancelOutcome::NotFound
		);
	}

	#[tokio::test]
	async fn pause_suspends_dispatch_without_draining() {
		let gate = Arc::new(tokio::sync::Semaphore::new(0));
		let handler = {
			let gate = Arc::clone(&gate);
			FnHandler::new("test", move |_, _| {
				let gate = Arc::clone(&gate);
				async move {
					let permit = gate.acquire().await.unwrap();
					permit.forget();
					Ok(serde_json::json!({}))
				}
			})
		};
		let (scheduler, _recorder) = scheduler_with(PipelineConfig::default(), handler);

		scheduler
			.create_job("before-pause", serde_json::json!({}))
			.await
			.unwrap();
		wait_until(|| scheduler.get_stats().active == 1).await;

		scheduler.pause();
		scheduler
			.create_job("while-paused", serde_json::json!({}))
			.await
			.unwrap();
		tokio::time::sleep(Duration::from_millis(30)).await;
		// The active job is untouched; the new one is not dispatched.
		assert_eq!(scheduler.get_stats().active, 1);
		assert_eq!(
			scheduler.get_job("while-paused").unwrap().status,
			JobStatus::Queued
		);

		scheduler.resume();
		gate.add_permits(2);
		wait_until(|| scheduler.get_stats().completed == 2).await;
	}

	#[tokio::test]
	async fn progress_reports_update_job_and_emit_metrics() {
		let handler = FnHandler::new("test", |_, ctx| async move {
			ctx.report_progress(25, Some("reading"));
			ctx.report_progress(80, Some("writing"));
			Ok(serde_json::json!({}))
		});
		let (scheduler, recorder) = scheduler_with(PipelineConfig::default(), handler);

		scheduler
			.create_job("progressive", serde_json::json!({}))
			.await
			.unwrap();
		let job = wait_terminal(&scheduler, "progressive").await;

		// Terminal completion pins progress to 100.
		assert_eq!(job.progress, Some(100));
		let metrics = recorder
			.topics_for("progressive")
			.iter()
			.filter(|t| *t == "metrics:updated")
			.count();
		assert_eq!(metrics, 2);
	}

	#[tokio::test]
	async fn initialize_is_idempotent() {
		let handler = FnHandler::new("test", |_, _| async { Ok(serde_json::json!({})) });
		let counter_view = Arc::clone(&handler);
		let (scheduler, _recorder) = scheduler_with(PipelineConfig::default(), handler);

		scheduler.initialize().await.unwrap();
		scheduler.initialize().await.unwrap();
		assert_eq!(counter_view.init_calls.load(Ordering::SeqCst), 1);
	}

	struct FailingStore;

	#[async_trait]
	impl JobStore for FailingStore {
		async fn insert(&self, _job: &Job) -> sidequest_db::Result<()> {
			Err(sidequest_db::StoreError::Internal("disk on fire".to_string()))
		}
		async fn update(
			&self,
			id: &str,
			_patch: JobPatch,
		) -> sidequest_db::Result<()> {
			Err(sidequest_db::StoreError::NotFound(id.to_string()))
		}
		async fn get(&self, _id: &str) -> sidequest_db::Result<Option<Job>> {
			Ok(None)
		}
		async fn list_by_pipeline(
			&self,
			_pipeline_id: &str,
			_filter: &sidequest_db::JobFilter,
		) -> sidequest_db::Result<sidequest_db::JobPage> {
			Ok(sidequest_db::JobPage {
				jobs: vec![],
				total: None,
			})
		}
		async fn list_all(
			&self,
			_filter: &sidequest_db::JobFilter,
		) -> sidequest_db::Result<sidequest_db::JobPage> {
			Ok(sidequest_db::JobPage {
				jobs: vec![],
				total: None,
			})
		}
		async fn bulk_import(
			&self,
			_jobs: &[Job],
		) -> sidequest_db::Result<sidequest_db::BulkImportReport> {
			Ok(sidequest_db::BulkImportReport::default())
		}
		async fn sweep_abandoned(&self) -> sidequest_db::Result<u64> {
			Ok(0)
		}
		async fn delete_old_jobs(&self, _retention_days: u32) -> sidequest_db::Result<u64> {
			Ok(0)
		}
	}

	#[tokio::test]
	async fn persistence_failure_is_nonfatal() {
		let bus = Arc::new(EventBus::with_defaults());
		let recorder = TopicRecorder::new();
		bus.subscribe(recorder.clone());
		let mut d = deps(Arc::clone(&bus));
		d.store = Some(Arc::new(FailingStore));

		let handler = FnHandler::new("test", |_, _| async { Ok(serde_json::json!({"ok": true})) });
		let scheduler = PipelineScheduler::new(PipelineConfig::default(), handler, d);
		scheduler.start();

		scheduler
			.create_job("survivor", serde_json::json!({}))
			.await
			.unwrap();
		let job = wait_terminal(&scheduler, "survivor").await;

		// The job still ran to completion in memory.
		assert_eq!(job.status, JobStatus::Completed);
		assert!(recorder
			.topics()
			.iter()
			.any(|t| t == "storage:warning"));
	}

	#[tokio::test]
	async fn git_dry_run_synthesizes_branch_and_pr() {
		use sidequest_git::{CommandGitClient, GitWorkflowConfig};

		let bus = Arc::new(EventBus::with_defaults());
		let recorder = TopicRecorder::new();
		bus.subscribe(recorder.clone());
		let mut d = deps(Arc::clone(&bus));
		d.git = Some(Arc::new(GitWorkflow::new(
			Arc::new(CommandGitClient::new()),
			None,
			GitWorkflowConfig {
				dry_run: true,
				..GitWorkflowConfig::default()
			},
		)));

		let handler = FnHandler::new("test", |_, _| async { Ok(serde_json::json!({"ok": true})) });
		let config = PipelineConfig {
			enable_git_workflow: true,
			..PipelineConfig::default()
		};
		let scheduler = PipelineScheduler::new(config, handler, d);
		scheduler.start();

		let repo = tempfile::tempdir().unwrap();
		scheduler
			.create_job(
				"with-git",
				serde_json::json!({
					"repo_path": repo.path().to_str().unwrap(),
					"description": "Enhance schema",
				}),
			)
			.await
			.unwrap();

		wait_terminal(&scheduler, "with-git").await;
		wait_until(|| {
			scheduler
				.get_job("with-git")
				.and_then(|j| j.git)
				.map(|g| g.pull_request_url.is_some())
				.unwrap_or(false)
		})
		.await;

		let job = scheduler.get_job("with-git").unwrap();
		assert_eq!(job.status, JobStatus::Completed);
		let git = job.git.unwrap();
		assert!(git.branch_name.unwrap().starts_with("sidequest/test/"));
		assert_eq!(git.commits.len(), 1);
		assert!(git
			.pull_request_url
			.unwrap()
			.starts_with("https://example.com/dry-run/"));

		// No on-disk repository was touched.
		assert!(!repo.path().join(".git").exists());
		assert!(recorder.topics().iter().any(|t| t == "pr:created"));
	}
}
