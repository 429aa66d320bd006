// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use sidequest_core::{ErrorCategory, PipelineError};

const TIMEOUT_DELAY: Duration = Duration::from_secs(10);
const RATE_LIMIT_DELAY: Duration = Duration::from_secs(30);
const TRANSIENT_IO_DELAY: Duration = Duration::from_secs(5);
const SPAWN_DELAY: Duration = Duration::from_secs(5);
const UNKNOWN_DELAY: Duration = Duration::from_secs(5);

/// Outcome of classifying a handler error.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
	pub category: ErrorCategory,
	pub code: Option<String>,
	pub message: String,
	pub retryable: bool,
	pub suggested_delay: Duration,
	pub reason: String,
}

/// Classify a handler error.
///
/// Examines, in order: an explicit category set by the pipeline, the error
/// code, message substrings, and finally the wrapped cause chain. A handler
/// that supplies its own `suggested_delay` overrides the category default.
pub fn classify(err: &PipelineError) -> Classification {
	let (category, reason) = resolve_category(err);
	let (retryable, default_delay) = policy_for(category, err);

	let suggested_delay = if retryable {
		err.suggested_delay.unwrap_or(default_delay)
	} else {
		Duration::ZERO
	};

	Classification {
		category,
		code: err.code.clone(),
		message: err.message.clone(),
		retryable,
		suggested_delay,
		reason,
	}
}

fn resolve_category(err: &PipelineError) -> (ErrorCategory, String) {
	if let Some(category) = err.category {
		return (category, "explicit category".to_string());
	}

	if let Some(code) = err.code.as_deref() {
		if let Some(category) = category_for_code(code) {
			return (category, format!("code {code}"));
		}
	}

	if let Some(category) = category_for_message(&err.message) {
		return (category, format!("message: {}", err.message));
	}

	if let Some(cause) = err.root_cause_message() {
		if let Some(category) = category_for_message(&cause) {
			return (category, format!("cause: {cause}"));
		}
	}

	(ErrorCategory::Unknown, "unclassified".to_string())
}

fn category_for_code(code: &str) -> Option<ErrorCategory> {
	match code {
		"ENOENT" => Some(ErrorCategory::NotFound),
		"EACCES" | "EPERM" => Some(ErrorCategory::Permission),
		"ETIMEDOUT" => Some(ErrorCategory::Timeout),
		"ECONNRESET" | "ECONNREFUSED" | "EPIPE" | "EAI_AGAIN" => {
			Some(ErrorCategory::TransientIo)
		}
		"429" => Some(ErrorCategory::RateLimit),
		_ => None,
	}
}

fn category_for_message(message: &str) -> Option<ErrorCategory> {
	let lower = message.to_lowercase();

	// Spawn errors first: they often also mention ENOENT and must keep the
	// spawn sub-classification.
	if lower.contains("uv_cwd") || lower.contains("spawn") {
		return Some(ErrorCategory::SpawnFailure);
	}
	if lower.contains("rate limit") || lower.contains("quota") || lower.contains("429") {
		return Some(ErrorCategory::RateLimit);
	}
	if lower.contains("timed out") || lower.contains("timeout") {
		return Some(ErrorCategory::Timeout);
	}
	if lower.contains("econnreset")
		|| lower.contains("connection reset")
		|| lower.contains("network reset")
		|| lower.contains("socket hang up")
	{
		return Some(ErrorCategory::TransientIo);
	}
	if lower.contains("permission denied")
		|| lower.contains("unauthorized")
		|| lower.contains("eacces")
	{
		return Some(ErrorCategory::Permission);
	}
	if lower.contains("no such file") || lower.contains("not found") {
		return Some(ErrorCategory::NotFound);
	}
	if lower.contains("missing required") || lower.contains("invalid ") {
		return Some(ErrorCategory::Validation);
	}

	None
}

fn policy_for(category: ErrorCategory, err: &PipelineError) -> (bool, Duration) {
	match category {
		ErrorCategory::Validation
		| ErrorCategory::NotFound
		| ErrorCategory::Permission
		| ErrorCategory::Cancelled => (false, Duration::ZERO),
		ErrorCategory::Timeout => (true, TIMEOUT_DELAY),
		ErrorCategory::RateLimit => (true, RATE_LIMIT_DELAY),
		ErrorCategory::TransientIo => (true, TRANSIENT_IO_DELAY),
		ErrorCategory::SpawnFailure => {
			if spawn_cwd_vanished(err) {
				// The working directory was deleted under the process;
				// retrying spawns into the same missing path.
				(false, Duration::ZERO)
			} else {
				(true, SPAWN_DELAY)
			}
		}
		ErrorCategory::Unknown => (true, UNKNOWN_DELAY),
	}
}

fn spawn_cwd_vanished(err: &PipelineError) -> bool {
	let lower = err.message.to_lowercase();
	if lower.contains("uv_cwd") {
		return true;
	}
	if err.code.as_deref() == Some("ENOENT") {
		return true;
	}
	err
		.root_cause_message()
		.map(|cause| cause.to_lowercase().contains("uv_cwd"))
		.unwrap_or(false)
}
