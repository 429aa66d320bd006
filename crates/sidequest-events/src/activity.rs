// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bus::EventSubscriber;
use crate::event::PipelineEvent;

pub const DEFAULT_MAX_ACTIVITIES: usize = 50;

/// One dashboard-facing line derived from a lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEntry {
	pub id: u64,
	pub timestamp: DateTime<Utc>,
	pub kind: String,
	pub job_id: String,
	pub pipeline_id: String,
	pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityStats {
	/// Entries within the last hour, bounded by the retained window.
	pub last_hour: usize,
	/// Entries within the last day, bounded by the retained window.
	pub last_day: usize,
	/// Entries recorded since startup, including evicted ones.
	pub total: u64,
	pub by_kind: BTreeMap<String, u64>,
}

struct FeedState {
	entries: VecDeque<ActivityEntry>,
	by_kind: BTreeMap<String, u64>,
	total: u64,
}

/// Bounded newest-first ring of recent lifecycle activity.
pub struct ActivityFeed {
	state: Mutex<FeedState>,
	next_id: AtomicU64,
	max_activities: usize,
}

impl ActivityFeed {
	pub fn new(max_activities: usize) -> Self {
		Self {
			state: Mutex::new(FeedState {
				entries: VecDeque::with_capacity(max_activities.min(256)),
				by_kind: BTreeMap::new(),
				total: 0,
			}),
			next_id: AtomicU64::new(1),
			max_activities: max_activities.max(1),
		}
	}

	pub fn with_defaults() -> Self {
		Self::new(DEFAULT_MAX_ACTIVITIES)
	}

	pub fn record(&self, kind: &str, job_id: &str, pipeline_id: &str, detail: String) {
		let entry = ActivityEntry {
			id: self.next_id.fetch_add(1, Ordering::Relaxed),
			timestamp: Utc::now(),
			kind: kind.to_string(),
			job_id: job_id.to_string(),
			pipeline_id: pipeline_id.to_string(),
			detail,
		};

		let mut state = self.state.lock().expect("activity feed poisoned");
		state.total += 1;
		*state.by_kind.entry(entry.kind.clone()).or_insert(0) += 1;
		state.entries.push_front(entry);
		while state.entries.len() > self.max_activities {
			state.entries.pop_back();
		}
	}

	/// Most recent entries, newest first.
	pub fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
		let state = self.state.lock().expect("activity feed poisoned");
		state.entries.iter().take(limit).cloned().collect()
	}

	pub fn stats(&self) -> ActivityStats {
		let state = self.state.lock().expect("activity feed poisoned");
		let now = Utc::now();
		let hour_ago = now - chrono::Duration::hours(1);
		let day_ago = now - chrono::Duration::days(1);

		ActivityStats {
			last_hour: state
				.entries
				.iter()
				.filter(|e| e.timestamp >= hour_ago)
				.count(),
			last_day: state
				.entries
				.iter()
				.filter(|e| e.timestamp >= day_ago)
				.count(),
			total: state.total,
			by_kind: state.by_kind.clone(),
		}
	}

	fn detail_for(event: &PipelineEvent) -> String {
		match event {
			PipelineEvent::JobCreated { .. } => "job queued".to_string(),
			PipelineEvent::JobStarted { .. } => "job started".to_string(),
			PipelineEvent::JobCompleted { duration_ms, .. } => match duration_ms {
				Some(ms) => format!("job completed in {ms} ms"),
				None => "job completed".to_string(),
			},
			PipelineEvent::JobFailed { message, .. } => format!("job failed: {message}"),
			PipelineEvent::JobCancelled { .. } => "job cancelled".to_string(),
			PipelineEvent::CancelIgnored { .. } => {
				"cancel request ignored by handler".to_string()
			}
			PipelineEvent::RetryScheduled {
				attempt, delay_ms, ..
			} => format!("retry {attempt} scheduled in {delay_ms} ms"),
			PipelineEvent::RetryWarning { attempt, .. } => {
				format!("retry warning at attempt {attempt}")
			}
			PipelineEvent::RetryMaxAttempts {
				attempts, reason, ..
			} => format!("retries exhausted after {attempts} attempts ({reason})"),
			PipelineEvent::RetryCircuitBreaker { attempts, .. } => {
				format!("circuit breaker tripped at attempt {attempts}")
			}
			PipelineEvent::ScanCompleted { summary, .. } => {
				format!("scan completed: {summary}")
			}
			PipelineEvent::PrCreated { url, .. } => format!("pull request created: {url}"),
			PipelineEvent::PrFailed { reason, .. } => {
				format!("pull request failed: {reason}")
			}
			PipelineEvent::MetricsUpdated {
				progress,
				operation,
				..
			} => match operation {
				Some(op) => format!("{progress}% - {op}"),
				None => format!("{progress}%"),
			},
			PipelineEvent::PipelineStatus { paused, .. } => {
				if *paused {
					"pipeline paused".to_string()
				} else {
					"pipeline resumed".to_string()
				}
			}
			PipelineEvent::StorageWarning { message, .. } => {
				format!("storage warning: {message}")
			}
		}
	}
}

impl EventSubscriber for ActivityFeed {
	fn name(&self) -> &str {
		"activity-feed"
	}

	fn on_event(
		&self,
		event: &PipelineEvent,
	) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
		// Events without a job scope still produce an entry; unknown is the
		// documented placeholder, not an error.
		let job_id = event.job_id().unwrap_or_else(|| {
			if !matches!(event, PipelineEvent::PipelineStatus { .. }) {
				warn!(topic = event.topic(), "event without job id in activity feed");
			}
			"unknown"
		});

		self.record(
			event.topic(),
			job_id,
			event.pipeline_id(),
			Self::detail_for(event),
		);
		Ok(())
	}
}
