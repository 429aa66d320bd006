// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Named mutexes keyed on canonical repository paths.
///
/// At most one job may operate on a repository at a time; pipelines acquire
/// the lock for the duration of any git mutation.
#[derive(Default)]
pub struct RepoLocks {
	locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl RepoLocks {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
		let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

		let entry = {
			let mut locks = self.locks.lock().await;
			Arc::clone(locks.entry(key.clone()).or_default())
		};

		debug!(path = %key.display(), "acquiring repo lock");
		entry.lock_owned().await
	}
}
