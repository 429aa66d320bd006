// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
	#[error("job already exists: {0}")]
	Conflict(String),

	#[error("scheduler is shutting down")]
	ShuttingDown,

	#[error("job not found: {0}")]
	NotFound(String),

	#[error("initialization failed: {0}")]
	Initialize(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
