// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration management for the Sidequest server.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`SIDEQUEST_*`)
//!
//! # Usage
//!
//! ```ignore
//! use sidequest_config::load_config;
//!
//! let config = load_config()?;
//! println!("Server listening on {}:{}", config.http.host, config.http.port);
//! ```

pub mod error;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use sections::*;
pub use sources::{env_layer, toml_layer, SidequestConfigLayer};

use tracing::debug;

/// Fully resolved server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SidequestConfig {
	pub http: HttpConfig,
	pub database: DatabaseConfig,
	pub runtime: RuntimeConfig,
	pub git: GitConfig,
	pub repomix: RepomixSection,
	pub duplicate_detection: DuplicateDetectionSection,
	pub schema_enhancement: SchemaEnhancementSection,
}

impl SidequestConfig {
	/// Socket address string for binding.
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.http.host, self.http.port)
	}
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`SIDEQUEST_*`)
/// 2. Config file (`./sidequest.toml`, or `SIDEQUEST_CONFIG`)
/// 3. Built-in defaults
pub fn load_config() -> Result<SidequestConfig, ConfigError> {
	let config_path = std::env::var("SIDEQUEST_CONFIG")
		.unwrap_or_else(|_| "./sidequest.toml".to_string());

	let mut merged = SidequestConfigLayer::default();

	debug!(path = %config_path, "loading configuration file layer");
	merged.merge(toml_layer(std::path::Path::new(&config_path))?);

	debug!("loading environment layer");
	merged.merge(env_layer(|name| std::env::var(name).ok()));

	Ok(merged.finalize())
}

/// Load configuration from environment only (for tests and simple
/// deployments).
pub fn load_config_from_env() -> SidequestConfig {
	let mut merged = SidequestConfigLayer::default();
	merged.merge(env_layer(|name| std::env::var(name).ok()));
	merged.finalize()
}
