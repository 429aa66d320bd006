// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections and their mergeable layers.
//!
//! Each section comes in two forms: an `*ConfigLayer` of optional fields
//! that sources produce and `merge` folds together, and the finalized
//! struct with defaults applied.

use serde::{Deserialize, Serialize};

macro_rules! merge_fields {
	($self:ident, $other:ident, $($field:ident),+ $(,)?) => {
		$(
			if $other.$field.is_some() {
				$self.$field = $other.$field;
			}
		)+
	};
}

// ---------------------------------------------------------------------------
// HTTP

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpConfigLayer {
	pub host: Option<String>,
	pub port: Option<u16>,
}

impl HttpConfigLayer {
	pub fn merge(&mut self, other: Self) {
		merge_fields!(self, other, host, port);
	}

	pub fn finalize(self) -> HttpConfig {
		HttpConfig {
			host: self.host.unwrap_or_else(|| "127.0.0.1".to_string()),
			port: self.port.unwrap_or(8720),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
	pub host: String,
	pub port: u16,
}

impl Default for HttpConfig {
	fn default() -> Self {
		HttpConfigLayer::default().finalize()
	}
}

// ---------------------------------------------------------------------------
// Database

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfigLayer {
	pub url: Option<String>,
}

impl DatabaseConfigLayer {
	pub fn merge(&mut self, other: Self) {
		merge_fields!(self, other, url);
	}

	pub fn finalize(self) -> DatabaseConfig {
		DatabaseConfig {
			url: self.url.unwrap_or_else(|| "sqlite:./sidequest.db".to_string()),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
	pub url: String,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		DatabaseConfigLayer::default().finalize()
	}
}

// ---------------------------------------------------------------------------
// Runtime

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfigLayer {
	pub max_activities: Option<usize>,
	pub max_absolute_attempts: Option<u32>,
	pub job_retention_days: Option<u32>,
	pub migration_api_key: Option<String>,
}

impl RuntimeConfigLayer {
	pub fn merge(&mut self, other: Self) {
		merge_fields!(
			self,
			other,
			max_activities,
			max_absolute_attempts,
			job_retention_days,
			migration_api_key,
		);
	}

	pub fn finalize(self) -> RuntimeConfig {
		RuntimeConfig {
			max_activities: self.max_activities.unwrap_or(50),
			max_absolute_attempts: self.max_absolute_attempts.unwrap_or(5),
			job_retention_days: self.job_retention_days.unwrap_or(90),
			migration_api_key: self.migration_api_key,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
	pub max_activities: usize,
	pub max_absolute_attempts: u32,
	pub job_retention_days: u32,
	pub migration_api_key: Option<String>,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		RuntimeConfigLayer::default().finalize()
	}
}

// ---------------------------------------------------------------------------
// Git workflow

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GitConfigLayer {
	pub enable_git_workflow: Option<bool>,
	pub branch_prefix: Option<String>,
	pub base_branch: Option<String>,
	pub dry_run: Option<bool>,
	pub enable_pr_creation: Option<bool>,
	pub pr_dry_run: Option<bool>,
	pub forge_api_url: Option<String>,
	pub forge_token: Option<String>,
}

impl GitConfigLayer {
	pub fn merge(&mut self, other: Self) {
		merge_fields!(
			self,
			other,
			enable_git_workflow,
			branch_prefix,
			base_branch,
			dry_run,
			enable_pr_creation,
			pr_dry_run,
			forge_api_url,
			forge_token,
		);
	}

	pub fn finalize(self) -> GitConfig {
		GitConfig {
			enable_git_workflow: self.enable_git_workflow.unwrap_or(false),
			branch_prefix: self.branch_prefix.unwrap_or_else(|| "sidequest".to_string()),
			base_branch: self.base_branch.unwrap_or_else(|| "main".to_string()),
			dry_run: self.dry_run.unwrap_or(false),
			enable_pr_creation: self.enable_pr_creation.unwrap_or(false),
			pr_dry_run: self.pr_dry_run.unwrap_or(false),
			forge_api_url: self
				.forge_api_url
				.unwrap_or_else(|| "https://api.github.com".to_string()),
			forge_token: self.forge_token,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitConfig {
	pub enable_git_workflow: bool,
	pub branch_prefix: String,
	pub base_branch: String,
	pub dry_run: bool,
	pub enable_pr_creation: bool,
	pub pr_dry_run: bool,
	pub forge_api_url: String,
	pub forge_token: Option<String>,
}

impl Default for GitConfig {
	fn default() -> Self {
		GitConfigLayer::default().finalize()
	}
}

// ---------------------------------------------------------------------------
// Pipelines

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RepomixSectionLayer {
	pub max_concurrent: Option<usize>,
	pub retry_attempts: Option<u32>,
	pub retry_delay_ms: Option<u64>,
	pub binary: Option<String>,
	pub output_dir: Option<String>,
	pub timeout_secs: Option<u64>,
}

impl RepomixSectionLayer {
	pub fn merge(&mut self, other: Self) {
		merge_fields!(
			self,
			other,
			max_concurrent,
			retry_attempts,
			retry_delay_ms,
			binary,
			output_dir,
			timeout_secs,
		);
	}

	pub fn finalize(self) -> RepomixSection {
		RepomixSection {
			max_concurrent: self.max_concurrent.unwrap_or(3),
			retry_attempts: self.retry_attempts.unwrap_or(3),
			retry_delay_ms: self.retry_delay_ms.unwrap_or(1_000),
			binary: self.binary.unwrap_or_else(|| "repomix".to_string()),
			output_dir: self
				.output_dir
				.unwrap_or_else(|| "./repomix-output".to_string()),
			timeout_secs: self.timeout_secs.unwrap_or(600),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepomixSection {
	pub max_concurrent: usize,
	pub retry_attempts: u32,
	pub retry_delay_ms: u64,
	pub binary: String,
	pub output_dir: String,
	pub timeout_secs: u64,
}

impl Default for RepomixSection {
	fn default() -> Self {
		RepomixSectionLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DuplicateDetectionSectionLayer {
	pub max_concurrent: Option<usize>,
	pub retry_attempts: Option<u32>,
	pub retry_delay_ms: Option<u64>,
	pub repos_file: Option<String>,
	pub high_impact_threshold: Option<u8>,
	pub scan_command: Option<String>,
	pub inter_scan_command: Option<String>,
}

impl DuplicateDetectionSectionLayer {
	pub fn merge(&mut self, other: Self) {
		merge_fields!(
			self,
			other,
			max_concurrent,
			retry_attempts,
			retry_delay_ms,
			repos_file,
			high_impact_threshold,
			scan_command,
			inter_scan_command,
		);
	}

	pub fn finalize(self) -> DuplicateDetectionSection {
		DuplicateDetectionSection {
			max_concurrent: self.max_concurrent.unwrap_or(2),
			retry_attempts: self.retry_attempts.unwrap_or(3),
			retry_delay_ms: self.retry_delay_ms.unwrap_or(1_000),
			repos_file: self.repos_file.unwrap_or_else(|| "./repos.json".to_string()),
			high_impact_threshold: self.high_impact_threshold.unwrap_or(75),
			scan_command: self.scan_command.unwrap_or_default(),
			inter_scan_command: self.inter_scan_command,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateDetectionSection {
	pub max_concurrent: usize,
	pub retry_attempts: u32,
	pub retry_delay_ms: u64,
	pub repos_file: String,
	pub high_impact_threshold: u8,
	pub scan_command: String,
	pub inter_scan_command: Option<String>,
}

impl Default for DuplicateDetectionSection {
	fn default() -> Self {
		DuplicateDetectionSectionLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchemaEnhancementSectionLayer {
	pub max_concurrent: Option<usize>,
	pub retry_attempts: Option<u32>,
	pub retry_delay_ms: Option<u64>,
	pub dry_run: Option<bool>,
	pub generate_command: Option<String>,
}

impl SchemaEnhancementSectionLayer {
	pub fn merge(&mut self, other: Self) {
		merge_fields!(
			self,
			other,
			max_concurrent,
			retry_attempts,
			retry_delay_ms,
			dry_run,
			generate_command,
		);
	}

	pub fn finalize(self) -> SchemaEnhancementSection {
		SchemaEnhancementSection {
			max_concurrent: self.max_concurrent.unwrap_or(1),
			retry_attempts: self.retry_attempts.unwrap_or(2),
			retry_delay_ms: self.retry_delay_ms.unwrap_or(2_000),
			dry_run: self.dry_run.unwrap_or(false),
			generate_command: self.generate_command.unwrap_or_default(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaEnhancementSection {
	pub max_concurrent: usize,
	pub retry_attempts: u32,
	pub retry_delay_ms: u64,
	pub dry_run: bool,
	pub generate_command: String,
}

impl Default for SchemaEnhancementSection {
	fn default() -> Self {
		SchemaEnhancementSectionLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_documented_values() {
		let http = HttpConfig::default();
		assert_eq!(http.host, "127.0.0.1");
		assert_eq!(http.port, 8720);

		let runtime = RuntimeConfig::default();
		assert_eq!(runtime.max_activities, 50);
		assert_eq!(runtime.max_absolute_attempts, 5);
		assert_eq!(runtime.job_retention_days, 90);
		assert!(runtime.migration_api_key.is_none());

		let git = GitConfig::default();
		assert!(!git.enable_git_workflow);
		assert_eq!(git.branch_prefix, "sidequest");
		assert_eq!(git.base_branch, "main");
		assert!(!git.enable_pr_creation);
	}

	#[test]
	fn merge_prefers_the_newer_layer() {
		let mut base = GitConfigLayer {
			branch_prefix: Some("old".to_string()),
			base_branch: Some("main".to_string()),
			..GitConfigLayer::default()
		};
		base.merge(GitConfigLayer {
			branch_prefix: Some("new".to_string()),
			..GitConfigLayer::default()
		});

		let config = base.finalize();
		assert_eq!(config.branch_prefix, "new");
		assert_eq!(config.base_branch, "main");
	}
}
