// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: TOML files and `SIDEQUEST_*` environment
//! variables.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::ConfigError;
use crate::sections::{
	DatabaseConfigLayer, DuplicateDetectionSectionLayer, GitConfigLayer, HttpConfigLayer,
	RepomixSectionLayer, RuntimeConfigLayer, SchemaEnhancementSectionLayer,
};
use crate::SidequestConfig;

/// All section layers together; the shape of the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SidequestConfigLayer {
	#[serde(default)]
	pub http: HttpConfigLayer,
	#[serde(default)]
	pub database: DatabaseConfigLayer,
	#[serde(default)]
	pub runtime: RuntimeConfigLayer,
	#[serde(default)]
	pub git: GitConfigLayer,
	#[serde(default)]
	pub repomix: RepomixSectionLayer,
	#[serde(default)]
	pub duplicate_detection: DuplicateDetectionSectionLayer,
	#[serde(default)]
	pub schema_enhancement: SchemaEnhancementSectionLayer,
}

impl SidequestConfigLayer {
	pub fn merge(&mut self, other: Self) {
		self.http.merge(other.http);
		self.database.merge(other.database);
		self.runtime.merge(other.runtime);
		self.git.merge(other.git);
		self.repomix.merge(other.repomix);
		self.duplicate_detection.merge(other.duplicate_detection);
		self.schema_enhancement.merge(other.schema_enhancement);
	}

	pub fn finalize(self) -> SidequestConfig {
		SidequestConfig {
			http: self.http.finalize(),
			database: self.database.finalize(),
			runtime: self.runtime.finalize(),
			git: self.git.finalize(),
			repomix: self.repomix.finalize(),
			duplicate_detection: self.duplicate_detection.finalize(),
			schema_enhancement: self.schema_enhancement.finalize(),
		}
	}
}

/// Layer from a TOML file. A missing file is an empty layer, not an error.
pub fn toml_layer(path: &Path) -> Result<SidequestConfigLayer, ConfigError> {
	let contents = match std::fs::read_to_string(path) {
		Ok(contents) => contents,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
			trace!(path = %path.display(), "no config file");
			return Ok(SidequestConfigLayer::default());
		}
		Err(e) => {
			return Err(ConfigError::Read {
				path: path.display().to_string(),
				source: e,
			});
		}
	};

	toml::from_str(&contents).map_err(|e| ConfigError::Parse {
		path: path.display().to_string(),
		source: e,
	})
}

/// Layer from `SIDEQUEST_*` environment variables, read through `get` so
/// tests can inject their own environment.
pub fn env_layer(get: impl Fn(&str) -> Option<String>) -> SidequestConfigLayer {
	fn parse<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
		value.and_then(|v| v.parse().ok())
	}

	fn parse_bool(value: Option<String>) -> Option<bool> {
		value.map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
	}

	SidequestConfigLayer {
		http: HttpConfigLayer {
			host: get("SIDEQUEST_HTTP_HOST"),
			port: parse(get("SIDEQUEST_HTTP_PORT")),
		},
		database: DatabaseConfigLayer {
			url: get("SIDEQUEST_DATABASE_URL"),
		},
		runtime: RuntimeConfigLayer {
			max_activities: parse(get("SIDEQUEST_MAX_ACTIVITIES")),
			max_absolute_attempts: parse(get("SIDEQUEST_MAX_ABSOLUTE_ATTEMPTS")),
			job_retention_days: parse(get("SIDEQUEST_JOB_RETENTION_DAYS")),
			migration_api_key: get("SIDEQUEST_MIGRATION_API_KEY"),
		},
		git: GitConfigLayer {
			enable_git_workflow: parse_bool(get("SIDEQUEST_GIT_WORKFLOW")),
			branch_prefix: get("SIDEQUEST_GIT_BRANCH_PREFIX"),
			base_branch: get("SIDEQUEST_GIT_BASE_BRANCH"),
			dry_run: parse_bool(get("SIDEQUEST_GIT_DRY_RUN")),
			enable_pr_creation: parse_bool(get("SIDEQUEST_PR_CREATION")),
			pr_dry_run: parse_bool(get("SIDEQUEST_PR_DRY_RUN")),
			forge_api_url: get("SIDEQUEST_FORGE_API_URL"),
			forge_token: get("SIDEQUEST_FORGE_TOKEN"),
		},
		repomix: RepomixSectionLayer {
			max_concurrent: parse(get("SIDEQUEST_REPOMIX_MAX_CONCURRENT")),
			retry_attempts: parse(get("SIDEQUEST_REPOMIX_RETRY_ATTEMPTS")),
			retry_delay_ms: parse(get("SIDEQUEST_REPOMIX_RETRY_DELAY_MS")),
			binary: get("SIDEQUEST_REPOMIX_BINARY"),
			output_dir: get("SIDEQUEST_REPOMIX_OUTPUT_DIR"),
			timeout_secs: parse(get("SIDEQUEST_REPOMIX_TIMEOUT_SECS")),
		},
		duplicate_detection: DuplicateDetectionSectionLayer {
			max_concurrent: parse(get("SIDEQUEST_DUPDETECT_MAX_CONCURRENT")),
			retry_attempts: parse(get("SIDEQUEST_DUPDETECT_RETRY_ATTEMPTS")),
			retry_delay_ms: parse(get("SIDEQUEST_DUPDETECT_RETRY_DELAY_MS")),
			repos_file: get("SIDEQUEST_REPOS_FILE"),
			high_impact_threshold: parse(get("SIDEQUEST_HIGH_IMPACT_THRESHOLD")),
			scan_command: get("SIDEQUEST_SCAN_COMMAND"),
			inter_scan_command: get("SIDEQUEST_INTER_SCAN_COMMAND"),
		},
		schema_enhancement: SchemaEnhancementSectionLayer {
			max_concurrent: parse(get("SIDEQUEST_SCHEMA_MAX_CONCURRENT")),
			retry_attempts: parse(get("SIDEQUEST_SCHEMA_RETRY_ATTEMPTS")),
			retry_delay_ms: parse(get("SIDEQUEST_SCHEMA_RETRY_DELAY_MS")),
			dry_run: parse_bool(get("SIDEQUEST_SCHEMA_DRY_RUN")),
			generate_command: get("SIDEQUEST_SCHEMA_GENERATE_COMMAND"),
		},
	}
}
