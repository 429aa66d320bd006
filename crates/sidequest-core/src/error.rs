// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Failure categories recognised by the retry machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
	Validation,
	NotFound,
	Permission,
	Timeout,
	RateLimit,
	TransientIo,
	SpawnFailure,
	Cancelled,
	Unknown,
}

impl ErrorCategory {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorCategory::Validation => "validation",
			ErrorCategory::NotFound => "not-found",
			ErrorCategory::Permission => "permission",
			ErrorCategory::Timeout => "timeout",
			ErrorCategory::RateLimit => "rate-limit",
			ErrorCategory::TransientIo => "transient-io",
			ErrorCategory::SpawnFailure => "spawn-failure",
			ErrorCategory::Cancelled => "cancelled",
			ErrorCategory::Unknown => "unknown",
		}
	}
}

impl std::str::FromStr for ErrorCategory {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"validation" => Ok(ErrorCategory::Validation),
			"not-found" => Ok(ErrorCategory::NotFound),
			"permission" => Ok(ErrorCategory::Permission),
			"timeout" => Ok(ErrorCategory::Timeout),
			"rate-limit" => Ok(ErrorCategory::RateLimit),
			"transient-io" => Ok(ErrorCategory::TransientIo),
			"spawn-failure" => Ok(ErrorCategory::SpawnFailure),
			"cancelled" => Ok(ErrorCategory::Cancelled),
			"unknown" => Ok(ErrorCategory::Unknown),
			_ => Err(format!("unknown error category: {s}")),
		}
	}
}

/// Error raised by a pipeline handler.
///
/// One record carries everything the classifier and the stored job failure
/// need: an optional machine code (`ENOENT`, `ETIMEDOUT`, HTTP status),
/// the human message, an optional captured stack/output tail, an optional
/// wrapped cause, and free-form context (command line, repo path).
/// Pipelines that already know the category set it explicitly; otherwise
/// classification derives it.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct PipelineError {
	pub message: String,
	pub code: Option<String>,
	pub stack: Option<String>,
	pub category: Option<ErrorCategory>,
	pub suggested_delay: Option<Duration>,
	#[source]
	pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
	pub context: BTreeMap<String, String>,
}

impl PipelineError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			code: None,
			stack: None,
			category: None,
			suggested_delay: None,
			cause: None,
			context: BTreeMap::new(),
		}
	}

	pub fn validation(message: impl Into<String>) -> Self {
		Self::new(message).with_category(ErrorCategory::Validation)
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		Self::new(message).with_category(ErrorCategory::NotFound)
	}

	pub fn permission(message: impl Into<String>) -> Self {
		Self::new(message).with_category(ErrorCategory::Permission)
	}

	pub fn timeout(message: impl Into<String>) -> Self {
		Self::new(message).with_category(ErrorCategory::Timeout)
	}

	pub fn cancelled() -> Self {
		Self::new("job cancelled").with_category(ErrorCategory::Cancelled)
	}

	pub fn with_code(mut self, code: impl Into<String>) -> Self {
		self.code = Some(code.into());
		self
	}

	pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
		self.stack = Some(stack.into());
		self
	}

	pub fn with_category(mut self, category: ErrorCategory) -> Self {
		self.category = Some(category);
		self
	}

	pub fn with_suggested_delay(mut self, delay: Duration) -> Self {
		self.suggested_delay = Some(delay);
		self
	}

	pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
		self.cause = Some(Box::new(cause));
		self
	}

	pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.context.insert(key.into(), value.into());
		self
	}

	pub fn is_cancelled(&self) -> bool {
		self.category == Some(ErrorCategory::Cancelled)
	}

	/// Message of the innermost wrapped cause, if any.
	pub fn root_cause_message(&self) -> Option<String> {
		let mut current: &(dyn std::error::Error) = self.cause.as_deref()?;
		while let Some(next) = current.source() {
			current = next;
		}
		Some(current.to_string())
	}
}

impl From<std::io::Error> for PipelineError {
	fn from(err: std::io::Error) -> Self {
		let code = match err.kind() {
			std::io::ErrorKind::NotFound => Some("ENOENT"),
			std::io::ErrorKind::PermissionDenied => Some("EACCES"),
			std::io::ErrorKind::ConnectionReset => Some("ECONNRESET"),
			std::io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
			_ => None,
		};
		let mut out = Self::new(err.to_string()).with_cause(err);
		if let Some(code) = code {
			out = out.with_code(code);
		}
		out
	}
}

impl From<serde_json::Error> for PipelineError {
	fn from(err: serde_json::Error) -> Self {
		Self::new(format!("JSON error: {err}"))
			.with_category(ErrorCategory::Validation)
			.with_cause(err)
	}
}
