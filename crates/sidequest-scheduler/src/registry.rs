// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::scheduler::PipelineScheduler;

pub type WorkerFactory = Box<dyn Fn() -> Arc<PipelineScheduler> + Send + Sync>;

struct PipelineRecord {
	factory: WorkerFactory,
	instance: OnceCell<Arc<PipelineScheduler>>,
}

/// Process-wide map of pipeline ID to lazily-instantiated scheduler.
///
/// Registration happens once at startup; `get_worker` builds the scheduler
/// on first demand behind a single-flight cell, so concurrent callers share
/// one instantiation. The API layer routes trigger/cancel/pause through
/// here without hard-wiring pipelines.
pub struct WorkerRegistry {
	records: HashMap<String, PipelineRecord>,
}

impl WorkerRegistry {
	pub fn new() -> Self {
		Self {
			records: HashMap::new(),
		}
	}

	pub fn register(&mut self, pipeline_id: impl Into<String>, factory: WorkerFactory) {
		let pipeline_id = pipeline_id.into();
		info!(pipeline_id = %pipeline_id, "pipeline registered");
		self.records.insert(
			pipeline_id,
			PipelineRecord {
				factory,
				instance: OnceCell::new(),
			},
		);
	}

	pub fn is_supported(&self, pipeline_id: &str) -> bool {
		self.records.contains_key(pipeline_id)
	}

	pub fn supported_pipelines(&self) -> Vec<String> {
		let mut ids: Vec<String> = self.records.keys().cloned().collect();
		ids.sort();
		ids
	}

	/// Scheduler for `pipeline_id`, instantiating and warming it up on
	/// first use.
	pub async fn get_worker(&self, pipeline_id: &str) -> Option<Arc<PipelineScheduler>> {
		let record = self.records.get(pipeline_id)?;
		let scheduler = record
			.instance
			.get_or_init(|| async {
				let scheduler = (record.factory)();
				scheduler.start();
				if let Err(e) = scheduler.initialize().await {
					// Warm-up failures are surfaced per-job later; the
					// worker itself stays available.
					warn!(pipeline_id, error = %e, "pipeline initialization failed");
				}
				scheduler
			})
			.await;
		Some(Arc::clone(scheduler))
	}

	/// Instantiated workers only; pipelines never demanded stay cold.
	pub fn instantiated(&self) -> Vec<Arc<PipelineScheduler>> {
		self
			.records
			.values()
			.filter_map(|record| record.instance.get().cloned())
			.collect()
	}

	pub async fn shutdown_all(&self) {
		for scheduler in self.instantiated() {
			scheduler.shutdown();
		}
		info!("worker registry shut down");
	}
}

impl Default for WorkerRegistry {
	fn default() -> Self {
		Self::new()
	}
}
