// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Table definitions.
//!
//! `principal_ancestors` is derived data: one row per (principal, ancestor)
//! with the minimum hop distance, the principal itself at 0. Only the
//! membership code writes it, in the same transaction as the edge change
//! that made it stale. There are no triggers.

use sqlx::sqlite::SqlitePool;

use crate::error::DbError;

const MIGRATIONS: &[(&str, &str)] = &[
	(
		"001_create_principals",
		include_str!("../migrations/001_create_principals.sql"),
	),
	(
		"002_create_flags",
		include_str!("../migrations/002_create_flags.sql"),
	),
	(
		"003_create_memberships",
		include_str!("../migrations/003_create_memberships.sql"),
	),
];

/// Split a migration file into statements, dropping `--` comment lines.
fn statements(sql: &str) -> impl Iterator<Item = String> + '_ {
	sql.split(';').filter_map(|chunk| {
		let stmt: Vec<&str> = chunk
			.lines()
			.filter(|line| !line.trim_start().starts_with("--"))
			.collect();
		let stmt = stmt.join("\n");
		(!stmt.trim().is_empty()).then_some(stmt)
	})
}

/// Create all tables and indexes. Safe to run on every start.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	let mut tx = pool.begin().await?;
	for (name, sql) in MIGRATIONS {
		for stmt in statements(sql) {
			sqlx::query(&stmt).execute(&mut *tx).await?;
		}
		tracing::trace!(migration = *name, "migration applied");
	}
	tx.commit().await?;

	tracing::debug!(migrations = MIGRATIONS.len(), "schema up to date");
	Ok(())
}
