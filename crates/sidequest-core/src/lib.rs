// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core job model for the Sidequest pipeline runtime.
//!
//! This crate defines the types shared by every pipeline: the [`Job`] record
//! and its lifecycle state machine, the [`PipelineError`] raised by handlers,
//! the per-pipeline [`PipelineConfig`], and the [`Clock`] that issues
//! process-unique job identifiers.

pub mod config;
pub mod error;
pub mod id;
pub mod job;

pub use config::PipelineConfig;
pub use error::{ErrorCategory, PipelineError};
pub use id::{original_job_id, retry_job_id, Clock};
pub use job::{GitInfo, Job, JobFailure, JobPatch, JobStats, JobStatus};
