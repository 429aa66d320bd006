// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqlitePool;

use crate::migrate::migrate;
use crate::store::SqliteJobStore;

pub async fn create_test_pool() -> SqlitePool {
	let pool = SqlitePool::connect(":memory:").await.unwrap();
	migrate(&pool).await.unwrap();
	pool
}

pub async fn create_test_store() -> SqliteJobStore {
	SqliteJobStore::new(create_test_pool().await)
}
