// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use sidequest_core::{original_job_id, retry_job_id, Job, PipelineConfig};
use sidequest_events::{EventBus, PipelineEvent};

use crate::classify::Classification;

pub const DEFAULT_MAX_ABSOLUTE_ATTEMPTS: u32 = 5;

/// Attempts at which a warning event is emitted.
const WARNING_THRESHOLD: u32 = 3;

#[derive(Debug, Clone)]
struct RetryChain {
	attempts: u32,
	max_attempts: u32,
	last_attempt_at: DateTime<Utc>,
	base_delay: Duration,
}

/// Read-only view of a chain for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSnapshot {
	pub attempts: u32,
	pub max_attempts: u32,
	pub last_attempt_at: DateTime<Utc>,
}

/// A successor job to be enqueued once `delay` elapses.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRetry {
	pub original_id: String,
	pub successor_id: String,
	pub attempt: u32,
	pub delay: Duration,
	pub data: serde_json::Value,
	pub max_retries: u32,
}

/// Per-original-job retry bookkeeping with exponential backoff and a hard
/// circuit breaker.
///
/// The controller is the sole owner of the chain map. It never mutates
/// failed jobs; it only decides whether a fresh successor job should be
/// scheduled, and announces that decision on the bus.
pub struct RetryController {
	chains: Mutex<HashMap<String, RetryChain>>,
	max_absolute_attempts: u32,
	bus: Arc<EventBus>,
}

impl RetryController {
	pub fn new(bus: Arc<EventBus>, max_absolute_attempts: u32) -> Self {
		Self {
			chains: Mutex::new(HashMap::new()),
			max_absolute_attempts: max_absolute_attempts.max(1),
			bus,
		}
	}

	pub fn with_defaults(bus: Arc<EventBus>) -> Self {
		Self::new(bus, DEFAULT_MAX_ABSOLUTE_ATTEMPTS)
	}

	/// Decide the fate of a failed job.
	///
	/// Returns the successor to schedule, or `None` when the chain is
	/// exhausted (non-retryable error, pipeline budget, or the absolute
	/// ceiling). The chain entry is deleted on every terminal outcome.
	pub fn on_failure(
		&self,
		job: &Job,
		classification: &Classification,
		config: &PipelineConfig,
	) -> Option<ScheduledRetry> {
		let original_id = original_job_id(&job.id).to_string();
		let mut chains = self.chains.lock().expect("retry chains poisoned");

		if !classification.retryable {
			let attempts = chains
				.remove(&original_id)
				.map(|c| c.attempts)
				.unwrap_or(0);
			drop(chains);
			info!(
				original_id = %original_id,
				category = classification.category.as_str(),
				"failure is not retryable"
			);
			self.bus.emit(PipelineEvent::RetryMaxAttempts {
				original_id,
				pipeline_id: job.pipeline_id.clone(),
				attempts,
				reason: "non-retryable".to_string(),
			});
			return None;
		}

		let chain = chains.entry(original_id.clone()).or_insert_with(|| RetryChain {
			attempts: 0,
			max_attempts: config.retry_attempts,
			last_attempt_at: Utc::now(),
			base_delay: config.retry_delay(),
		});

		let next_attempt = chain.attempts + 1;

		if next_attempt > self.max_absolute_attempts {
			let attempts = chain.attempts;
			chains.remove(&original_id);
			drop(chains);
			warn!(
				original_id = %original_id,
				attempts,
				"retry circuit breaker tripped"
			);
			self.bus.error_sink().report(
				"retry-controller",
				&format!("circuit breaker tripped for {original_id} after {attempts} attempts"),
			);
			self.bus.emit(PipelineEvent::RetryCircuitBreaker {
				original_id,
				pipeline_id: job.pipeline_id.clone(),
				attempts,
			});
			return None;
		}

		if next_attempt > chain.max_attempts {
			let attempts = chain.attempts;
			chains.remove(&original_id);
			drop(chains);
			info!(
				original_id = %original_id,
				attempts,
				"retry budget exhausted"
			);
			self.bus.emit(PipelineEvent::RetryMaxAttempts {
				original_id,
				pipeline_id: job.pipeline_id.clone(),
				attempts,
				reason: "max-attempts".to_string(),
			});
			return None;
		}

		chain.attempts = next_attempt;
		chain.last_attempt_at = Utc::now();
		let base_delay = chain.base_delay;
		drop(chains);

		if next_attempt >= WARNING_THRESHOLD {
			self.bus.emit(PipelineEvent::RetryWarning {
				original_id: original_id.clone(),
				pipeline_id: job.pipeline_id.clone(),
				attempt: next_attempt,
			});
		}

		let delay = backoff_delay(classification.suggested_delay, base_delay, next_attempt);
		let successor_id = retry_job_id(&original_id, next_attempt);

		info!(
			original_id = %original_id,
			successor_id = %successor_id,
			attempt = next_attempt,
			delay_ms = delay.as_millis() as u64,
			"retry scheduled"
		);
		self.bus.emit(PipelineEvent::RetryScheduled {
			original_id: original_id.clone(),
			pipeline_id: job.pipeline_id.clone(),
			successor_id: successor_id.clone(),
			attempt: next_attempt,
			delay_ms: delay.as_millis() as u64,
		});

		Some(ScheduledRetry {
			original_id,
			successor_id,
			attempt: next_attempt,
			delay,
			data: job.data.clone(),
			max_retries: job.max_retries,
		})
	}

	/// A job in the chain succeeded; the chain is finished.
	pub fn on_success(&self, job_id: &str) {
		let original_id = original_job_id(job_id);
		let removed = self
			.chains
			.lock()
			.expect("retry chains poisoned")
			.remove(original_id)
			.is_some();
		if removed {
			info!(original_id, "retry chain closed after success");
		}
	}

	pub fn chain(&self, job_id: &str) -> Option<ChainSnapshot> {
		let original_id = original_job_id(job_id);
		self
			.chains
			.lock()
			.expect("retry chains poisoned")
			.get(original_id)
			.map(|c| ChainSnapshot {
				attempts: c.attempts,
				max_attempts: c.max_attempts,
				last_attempt_at: c.last_attempt_at,
			})
	}

	pub fn active_chains(&self) -> usize {
		self.chains.lock().expect("retry chains poisoned").len()
	}
}

/// `max(suggested, base) × 2^(attempt-1)`, saturating.
fn backoff_delay(suggested: Duration, base: Duration, attempt: u32) -> Duration {
	let floor_ms = suggested.max(base).as_millis() as u64;
	let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
	Duration::from_millis(floor_ms.saturating_mul(factor))
}
