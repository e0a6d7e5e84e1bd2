// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory fixtures for tests in this crate and its dependents.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::directory::Directory;
use crate::schema::run_migrations;

/// A migrated in-memory database.
///
/// Every `:memory:` connection is its own database, so the pool is pinned to
/// a single connection that is never reaped.
pub async fn create_test_pool() -> SqlitePool {
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.idle_timeout(None)
		.max_lifetime(None)
		.connect("sqlite::memory:")
		.await
		.unwrap();
	run_migrations(&pool).await.unwrap();
	pool
}

pub async fn create_test_directory() -> Directory {
	Directory::new(create_test_pool().await)
}
