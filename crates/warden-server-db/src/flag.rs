// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag storage.
//!
//! A flag row is (principal, name, value). No row means the flag is absent,
//! which is not the same as a stored `false`. Names must be registered in
//! `flag_definitions` before use unless the caller opts into registering
//! them on write. Writes hit storage immediately; the only buffered edits
//! are the ones a caller stages on an in-memory [`Principal`] record.
//!
//! [`Principal`]: warden_authz_core::Principal

use chrono::Utc;
use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use std::collections::BTreeMap;
use warden_authz_core::{AuthzError, FlagDefinition, FlagName, PrincipalId, PrincipalRef, Tristate};

use crate::error::DbError;
use crate::principal;
use crate::row::{parse_flag_name, parse_timestamp};

/// How a flag write treats a name that is not registered yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagWrite {
	/// Fail with `UnknownFlag`.
	#[default]
	RequireRegistered,
	/// Register the name, then write.
	CreateIfMissing,
}

pub(crate) async fn is_registered<'e, E>(executor: E, name: &FlagName) -> Result<bool, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let row = sqlx::query("SELECT 1 FROM flag_definitions WHERE name = ?")
		.bind(name.as_str())
		.fetch_optional(executor)
		.await?;
	Ok(row.is_some())
}

/// Register a flag name. Returns false if it was already registered.
#[tracing::instrument(skip(executor, description), fields(flag = %name))]
pub(crate) async fn register<'e, E>(
	executor: E,
	name: &FlagName,
	description: Option<&str>,
) -> Result<bool, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let result = sqlx::query(
		r#"
		INSERT INTO flag_definitions (name, description, created_at)
		VALUES (?, ?, ?)
		ON CONFLICT(name) DO NOTHING
		"#,
	)
	.bind(name.as_str())
	.bind(description)
	.bind(Utc::now().to_rfc3339())
	.execute(executor)
	.await?;

	let created = result.rows_affected() > 0;
	if created {
		tracing::debug!(flag = %name, "flag registered");
	}
	Ok(created)
}

pub(crate) async fn list_definitions<'e, E>(executor: E) -> Result<Vec<FlagDefinition>, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let rows = sqlx::query(
		r#"
		SELECT name, description, created_at
		FROM flag_definitions
		ORDER BY name
		"#,
	)
	.fetch_all(executor)
	.await?;

	rows
		.iter()
		.map(|row| {
			let created_at: String = row.get("created_at");
			Ok(FlagDefinition {
				name: parse_flag_name(row.get("name"))?,
				description: row.get("description"),
				created_at: parse_timestamp(&created_at, "created_at")?,
			})
		})
		.collect()
}

/// The stored value of one flag on one principal.
///
/// Unknown principals and unregistered names read as `Absent`.
pub(crate) async fn get<'e, E>(
	executor: E,
	principal_id: &PrincipalId,
	name: &FlagName,
) -> Result<Tristate, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let value: Option<i64> = sqlx::query_scalar(
		"SELECT value FROM principal_flags WHERE principal_id = ? AND name = ?",
	)
	.bind(principal_id.to_string())
	.bind(name.as_str())
	.fetch_optional(executor)
	.await?;

	Ok(value.map(|v| v != 0).into())
}

#[tracing::instrument(skip(conn), fields(principal_id = %principal_id, flag = %name))]
pub(crate) async fn set(
	conn: &mut SqliteConnection,
	principal_id: &PrincipalId,
	name: &FlagName,
	value: bool,
	mode: FlagWrite,
) -> Result<(), DbError> {
	if !principal::exists(&mut *conn, principal_id).await? {
		return Err(AuthzError::NotFound(PrincipalRef::Id(*principal_id).to_string()).into());
	}

	if !is_registered(&mut *conn, name).await? {
		match mode {
			FlagWrite::CreateIfMissing => {
				register(&mut *conn, name, None).await?;
			}
			FlagWrite::RequireRegistered => {
				tracing::warn!(flag = %name, "write to unregistered flag rejected");
				return Err(AuthzError::UnknownFlag(name.to_string()).into());
			}
		}
	}

	upsert(&mut *conn, principal_id, name, value).await
}

pub(crate) async fn upsert<'e, E>(
	executor: E,
	principal_id: &PrincipalId,
	name: &FlagName,
	value: bool,
) -> Result<(), DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	sqlx::query(
		r#"
		INSERT INTO principal_flags (principal_id, name, value, updated_at)
		VALUES (?, ?, ?, ?)
		ON CONFLICT(principal_id, name) DO UPDATE SET
			value = excluded.value,
			updated_at = excluded.updated_at
		"#,
	)
	.bind(principal_id.to_string())
	.bind(name.as_str())
	.bind(value as i32)
	.bind(Utc::now().to_rfc3339())
	.execute(executor)
	.await?;

	tracing::debug!(principal_id = %principal_id, flag = %name, value, "flag set");
	Ok(())
}

/// Remove a flag row. Returns false if there was nothing to remove.
pub(crate) async fn clear<'e, E>(
	executor: E,
	principal_id: &PrincipalId,
	name: &FlagName,
) -> Result<bool, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let result = sqlx::query("DELETE FROM principal_flags WHERE principal_id = ? AND name = ?")
		.bind(principal_id.to_string())
		.bind(name.as_str())
		.execute(executor)
		.await?;

	let removed = result.rows_affected() > 0;
	if removed {
		tracing::debug!(principal_id = %principal_id, flag = %name, "flag cleared");
	}
	Ok(removed)
}

/// Flags set directly on a principal.
pub(crate) async fn flags_of<'e, E>(
	executor: E,
	principal_id: &PrincipalId,
) -> Result<BTreeMap<FlagName, bool>, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let rows = sqlx::query("SELECT name, value FROM principal_flags WHERE principal_id = ?")
		.bind(principal_id.to_string())
		.fetch_all(executor)
		.await?;

	rows
		.iter()
		.map(|row| {
			let value: i64 = row.get("value");
			Ok((parse_flag_name(row.get("name"))?, value != 0))
		})
		.collect()
}
