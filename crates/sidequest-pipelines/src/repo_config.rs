// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use sidequest_core::PipelineError;

use crate::duplicate_detection::ScanType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepoPriority {
	Critical,
	High,
	#[default]
	Normal,
	Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanFrequency {
	#[default]
	Daily,
	Weekly,
	Monthly,
}

impl ScanFrequency {
	pub fn interval(&self) -> Duration {
		match self {
			ScanFrequency::Daily => Duration::days(1),
			ScanFrequency::Weekly => Duration::days(7),
			ScanFrequency::Monthly => Duration::days(30),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanRecord {
	pub scanned_at: DateTime<Utc>,
	pub scan_type: ScanType,
	pub duplicates_found: usize,
}

/// One repository in the scanned fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepositoryConfig {
	pub name: String,
	pub path: PathBuf,
	#[serde(default)]
	pub priority: RepoPriority,
	#[serde(default)]
	pub scan_frequency: ScanFrequency,
	#[serde(default = "default_enabled")]
	pub enabled: bool,
	#[serde(default)]
	pub last_scanned_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub scan_history: Vec<ScanRecord>,
	#[serde(default)]
	pub tags: BTreeSet<String>,
}

fn default_enabled() -> bool {
	true
}

impl RepositoryConfig {
	pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
		Self {
			name: name.into(),
			path: path.into(),
			priority: RepoPriority::default(),
			scan_frequency: ScanFrequency::default(),
			enabled: true,
			last_scanned_at: None,
			scan_history: Vec::new(),
			tags: BTreeSet::new(),
		}
	}

	/// Whether the repo is due for its next scan.
	pub fn is_due(&self, now: DateTime<Utc>) -> bool {
		if !self.enabled {
			return false;
		}
		match self.last_scanned_at {
			None => true,
			Some(last) => now - last >= self.scan_frequency.interval(),
		}
	}

	/// Fixture repositories are scanned but never recorded as fleet state.
	pub fn is_test_repo(&self) -> bool {
		self.tags.contains("test") || self.name.starts_with("test-")
	}
}

/// Persistence for the repository fleet, external to the runtime.
#[async_trait]
pub trait RepositoryConfigStore: Send + Sync {
	async fn list(&self) -> Result<Vec<RepositoryConfig>, PipelineError>;
	async fn get(&self, name: &str) -> Result<Option<RepositoryConfig>, PipelineError>;
	async fn upsert(&self, repo: &RepositoryConfig) -> Result<(), PipelineError>;
}

/// JSON-file-backed store; the whole fleet lives in one document.
pub struct JsonFileRepoStore {
	path: PathBuf,
	write_lock: Mutex<()>,
}

impl JsonFileRepoStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			write_lock: Mutex::new(()),
		}
	}

	async fn read_all(&self) -> Result<Vec<RepositoryConfig>, PipelineError> {
		match tokio::fs::read_to_string(&self.path).await {
			Ok(contents) => Ok(serde_json::from_str(&contents)?),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
			Err(e) => Err(e.into()),
		}
	}

	async fn write_all(&self, repos: &[RepositoryConfig]) -> Result<(), PipelineError> {
		let contents = serde_json::to_string_pretty(repos)?;
		tokio::fs::write(&self.path, contents).await?;
		Ok(())
	}
}

#[async_trait]
impl RepositoryConfigStore for JsonFileRepoStore {
	async fn list(&self) -> Result<Vec<RepositoryConfig>, PipelineError> {
		self.read_all().await
	}

	async fn get(&self, name: &str) -> Result<Option<RepositoryConfig>, PipelineError> {
		Ok(self.read_all().await?.into_iter().find(|r| r.name == name))
	}

	async fn upsert(&self, repo: &RepositoryConfig) -> Result<(), PipelineError> {
		let _guard = self.write_lock.lock().await;
		let mut repos = self.read_all().await?;
		match repos.iter_mut().find(|r| r.name == repo.name) {
			Some(existing) => *existing = repo.clone(),
			None => repos.push(repo.clone()),
		}
		self.write_all(&repos).await
	}
}
