// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Concrete pipeline workers.
//!
//! Three pipelines ship with the runtime, each exercising a different
//! corner of the scheduler contract:
//!
//! - [`RepomixWorker`] packs a repository with the external `repomix` tool
//!   (process spawning, preflight, capped output capture, spawn-error
//!   classification).
//! - [`DuplicateDetectionWorker`] orchestrates inter-/intra-project scans
//!   over a repository fleet (config store, scan history, high-impact
//!   notification, auto-PR delegation).
//! - [`SchemaEnhancementWorker`] injects structured data into content files
//!   (idempotence guard, impact metrics, wrapper git workflow hooks).

pub mod duplicate_detection;
pub mod external;
pub mod repo_config;
pub mod repomix;
pub mod schema_enhance;

pub use duplicate_detection::{
	schedule_due_scans, ConsolidationPrDelegate, DuplicateDetectionWorker, DuplicateGroup,
	DuplicateScanner, ScanJobData, ScanResult, ScanType, DEFAULT_HIGH_IMPACT_THRESHOLD,
};
pub use external::{CommandScanner, CommandSchemaGenerator};
pub use repo_config::{
	JsonFileRepoStore, RepoPriority, RepositoryConfig, RepositoryConfigStore, ScanFrequency,
	ScanRecord,
};
pub use repomix::{RepomixConfig, RepomixWorker};
pub use schema_enhance::{SchemaEnhancementWorker, SchemaGenerator};
