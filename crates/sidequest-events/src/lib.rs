// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Lifecycle events, the in-process event bus, and the activity feed.
//!
//! Every state transition in the runtime is announced on the [`EventBus`].
//! Delivery is synchronous and ordered: all events for one job reach every
//! subscriber in state-machine order, even while other jobs run
//! concurrently. Subscribers are isolated: a failing subscriber is reported
//! to the [`ErrorSink`] and never blocks delivery to the rest, nor fails the
//! operation that emitted the event.

pub mod activity;
pub mod bus;
pub mod event;

pub use activity::{ActivityEntry, ActivityFeed, ActivityStats};
pub use bus::{Broadcaster, ErrorSink, EventBus, EventSubscriber, TracingErrorSink};
pub use event::PipelineEvent;
