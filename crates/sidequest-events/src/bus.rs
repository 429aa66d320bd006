// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::event::PipelineEvent;

/// Best-effort sink for failures that must not disrupt the runtime:
/// subscriber errors, circuit-breaker trips, persistence warnings.
///
/// Implementations must be non-blocking; the production deployment forwards
/// to an external error-reporting service.
pub trait ErrorSink: Send + Sync {
	fn report(&self, source: &str, message: &str);
}

/// Default sink that records reports on the tracing output.
#[derive(Debug, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
	fn report(&self, source: &str, message: &str) {
		tracing::error!(source, message, "error report");
	}
}

/// A bus subscriber. `on_event` runs on the emitting task and must not
/// block; subscribers needing async work hand off to their own task.
pub trait EventSubscriber: Send + Sync {
	fn name(&self) -> &str;

	/// Topics this subscriber registered for; `None` means every topic.
	fn topics(&self) -> Option<&[&'static str]> {
		None
	}

	fn on_event(
		&self,
		event: &PipelineEvent,
	) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Synchronous, ordered in-process event broker.
///
/// Emission happens on the caller's task, so events for one job are
/// delivered in exactly the order the scheduler produced them. Subscriber
/// failures are isolated: logged, reported to the error sink, and delivery
/// continues with the next subscriber.
pub struct EventBus {
	subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
	error_sink: Arc<dyn ErrorSink>,
	events_emitted: AtomicU64,
}

impl EventBus {
	pub fn new(error_sink: Arc<dyn ErrorSink>) -> Self {
		Self {
			subscribers: RwLock::new(Vec::new()),
			error_sink,
			events_emitted: AtomicU64::new(0),
		}
	}

	pub fn with_defaults() -> Self {
		Self::new(Arc::new(TracingErrorSink))
	}

	pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
		let mut subscribers = self.subscribers.write().expect("subscriber list poisoned");
		debug!(subscriber = subscriber.name(), "subscriber registered");
		subscribers.push(subscriber);
	}

	pub fn error_sink(&self) -> Arc<dyn ErrorSink> {
		Arc::clone(&self.error_sink)
	}

	pub fn emit(&self, event: PipelineEvent) {
		let subscribers = self.subscribers.read().expect("subscriber list poisoned");
		self.events_emitted.fetch_add(1, Ordering::Relaxed);

		debug!(
			topic = event.topic(),
			job_id = event.job_id().unwrap_or("-"),
			pipeline_id = event.pipeline_id(),
			"emitting event"
		);

		for subscriber in subscribers.iter() {
			if let Some(topics) = subscriber.topics() {
				if !topics.contains(&event.topic()) {
					continue;
				}
			}
			if let Err(e) = subscriber.on_event(&event) {
				warn!(
					subscriber = subscriber.name(),
					topic = event.topic(),
					error = %e,
					"subscriber failed; continuing delivery"
				);
				self.error_sink.report(
					subscriber.name(),
					&format!("subscriber failed on {}: {e}", event.topic()),
				);
			}
		}
	}

	pub fn events_emitted(&self) -> u64 {
		self.events_emitted.load(Ordering::Relaxed)
	}
}

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Bridges the synchronous bus into a `tokio::sync::broadcast` channel so
/// streaming observers (SSE, dashboards) can consume events at their own
/// pace. Lagging receivers drop their backlog, not the bus.
pub struct Broadcaster {
	sender: broadcast::Sender<PipelineEvent>,
	events_forwarded: AtomicU64,
}

impl Broadcaster {
	pub fn new(capacity: usize) -> Self {
		let (sender, _receiver) = broadcast::channel(capacity);
		Self {
			sender,
			events_forwarded: AtomicU64::new(0),
		}
	}

	pub fn with_defaults() -> Self {
		Self::new(DEFAULT_CHANNEL_CAPACITY)
	}

	pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
		self.sender.subscribe()
	}

	pub fn receiver_count(&self) -> usize {
		self.sender.receiver_count()
	}

	pub fn events_forwarded(&self) -> u64 {
		self.events_forwarded.load(Ordering::Relaxed)
	}
}

impl EventSubscriber for Broadcaster {
	fn name(&self) -> &str {
		"broadcaster"
	}

	fn on_event(
		&self,
		event: &PipelineEvent,
	) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
		// send only fails when no receiver is connected; that is not an
		// error for a fan-out tap.
		if self.sender.send(event.clone()).is_ok() {
			self.events_forwarded.fetch_add(1, Ordering::Relaxed);
		}
		Ok(())
	}
}
