// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Wall-clock and job-ID source.
///
/// Job IDs follow the `{prefix}-{wall_ms}` convention. The millisecond
/// component is bumped forward when two calls land in the same millisecond,
/// so IDs are unique within the process without external coordination.
#[derive(Debug, Default)]
pub struct Clock {
	last_ms: AtomicI64,
}

impl Clock {
	pub fn new() -> Self {
		Self {
			last_ms: AtomicI64::new(0),
		}
	}

	pub fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}

	/// Next unique millisecond value, monotonic within the process.
	fn next_ms(&self) -> i64 {
		let wall = Utc::now().timestamp_millis();
		let mut prev = self.last_ms.load(Ordering::Relaxed);
		loop {
			let candidate = wall.max(prev + 1);
			match self.last_ms.compare_exchange_weak(
				prev,
				candidate,
				Ordering::AcqRel,
				Ordering::Relaxed,
			) {
				Ok(_) => return candidate,
				Err(observed) => prev = observed,
			}
		}
	}

	pub fn next_id(&self, prefix: &str) -> String {
		format!("{prefix}-{}", self.next_ms())
	}
}

/// Strips all `-retry{N}` suffixes from a job ID, yielding the original ID
/// that keys the retry chain.
pub fn original_job_id(id: &str) -> &str {
	let mut current = id;
	loop {
		let Some(pos) = current.rfind("-retry") else {
			return current;
		};
		let suffix = &current[pos + "-retry".len()..];
		if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
			current = &current[..pos];
		} else {
			return current;
		}
	}
}

/// Successor job ID for attempt `attempt` of `original_id`.
pub fn retry_job_id(original_id: &str, attempt: u32) -> String {
	format!("{original_id}-retry{attempt}")
}
