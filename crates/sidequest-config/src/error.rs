// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("cannot read config file {path}: {source}")]
	Read {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("cannot parse config file {path}: {source}")]
	Parse {
		path: String,
		#[source]
		source: toml::de::Error,
	},
}
