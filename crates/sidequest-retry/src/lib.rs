// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error classification and retry control.
//!
//! [`classify`] maps a raw handler error to a category with a retry policy;
//! the [`RetryController`] keeps per-original-job bookkeeping and decides
//! whether a failed job earns a delayed successor.

pub mod classify;
pub mod controller;

pub use classify::{classify, Classification};
pub use controller::{ChainSnapshot, RetryController, ScheduledRetry, DEFAULT_MAX_ABSOLUTE_ATTEMPTS};
