// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Principal storage.
//!
//! Create, load, save and delete users and groups. Deleting a principal
//! cascades: its edges in both directions, its flags and its closure rows go
//! with it, and every former descendant gets its closure rebuilt in the same
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite, SqliteConnection};
use warden_authz_core::{AuthzError, Closure, FlagName, Principal, PrincipalId, PrincipalRef};

use crate::error::{is_unique_violation, DbError};
use crate::row::{parse_id, parse_timestamp};
use crate::{flag, membership};

/// Read side of the principal store, as consumed by session binding.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
	async fn load_principal(&self, key: &PrincipalRef) -> Result<Principal, DbError>;
	async fn touch_principal(&self, id: &PrincipalId) -> Result<DateTime<Utc>, DbError>;
	async fn list_principals(&self, is_group: Option<bool>) -> Result<Vec<Principal>, DbError>;
}

pub(crate) async fn fetch<'e, E>(
	executor: E,
	key: &PrincipalRef,
) -> Result<Option<Principal>, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let row = match key {
		PrincipalRef::Id(id) => {
			sqlx::query(
				r#"
				SELECT id, name, is_group, created_at, updated_at, last_used_at
				FROM principals
				WHERE id = ?
				"#,
			)
			.bind(id.to_string())
			.fetch_optional(executor)
			.await?
		}
		PrincipalRef::Name(name) => {
			sqlx::query(
				r#"
				SELECT id, name, is_group, created_at, updated_at, last_used_at
				FROM principals
				WHERE name = ?
				"#,
			)
			.bind(name)
			.fetch_optional(executor)
			.await?
		}
	};

	row.as_ref().map(row_to_principal).transpose()
}

pub(crate) async fn load<'e, E>(executor: E, key: &PrincipalRef) -> Result<Principal, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	fetch(executor, key)
		.await?
		.ok_or_else(|| AuthzError::NotFound(key.to_string()).into())
}

pub(crate) async fn exists<'e, E>(executor: E, id: &PrincipalId) -> Result<bool, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let row = sqlx::query("SELECT 1 FROM principals WHERE id = ?")
		.bind(id.to_string())
		.fetch_optional(executor)
		.await?;
	Ok(row.is_some())
}

#[tracing::instrument(skip(conn, initial_flags))]
pub(crate) async fn create(
	conn: &mut SqliteConnection,
	name: &str,
	is_group: bool,
	initial_flags: &[(FlagName, bool)],
) -> Result<Principal, DbError> {
	Principal::validate_name(name)?;

	if fetch(&mut *conn, &PrincipalRef::from(name)).await?.is_some() {
		return Err(AuthzError::DuplicateName(name.to_string()).into());
	}
	for (flag_name, _) in initial_flags {
		if !flag::is_registered(&mut *conn, flag_name).await? {
			return Err(AuthzError::UnknownFlag(flag_name.to_string()).into());
		}
	}

	let principal = Principal::new(name, is_group);
	sqlx::query(
		r#"
		INSERT INTO principals (id, name, is_group, created_at, updated_at, last_used_at)
		VALUES (?, ?, ?, ?, ?, NULL)
		"#,
	)
	.bind(principal.id.to_string())
	.bind(&principal.name)
	.bind(principal.is_group as i32)
	.bind(principal.created_at.to_rfc3339())
	.bind(principal.updated_at.to_rfc3339())
	.execute(&mut *conn)
	.await
	.map_err(|e| duplicate_or_storage(e, name))?;

	let own = Closure::from_distances(principal.id, std::iter::empty());
	membership::write_closure(&mut *conn, &own).await?;

	for (flag_name, value) in initial_flags {
		flag::upsert(&mut *conn, &principal.id, flag_name, *value).await?;
	}

	tracing::debug!(principal_id = %principal.id, "principal created");
	Ok(principal)
}

/// Persist name and `last_used_at`, then apply staged flag edits.
///
/// The stage is cleared once every edit has been written.
#[tracing::instrument(skip(conn, principal), fields(principal_id = %principal.id))]
pub(crate) async fn save(
	conn: &mut SqliteConnection,
	principal: &mut Principal,
) -> Result<(), DbError> {
	Principal::validate_name(&principal.name)?;

	let stored = load(&mut *conn, &PrincipalRef::Id(principal.id)).await?;
	if stored.is_group != principal.is_group {
		tracing::warn!(principal_id = %principal.id, "rejected change of is_group");
		return Err(AuthzError::ImmutableAttribute("is_group").into());
	}
	if stored.name != principal.name {
		let key = PrincipalRef::from(principal.name.as_str());
		if let Some(other) = fetch(&mut *conn, &key).await? {
			if other.id != principal.id {
				return Err(AuthzError::DuplicateName(principal.name.clone()).into());
			}
		}
	}

	let now = Utc::now();
	sqlx::query(
		r#"
		UPDATE principals
		SET name = ?, last_used_at = ?, updated_at = ?
		WHERE id = ?
		"#,
	)
	.bind(&principal.name)
	.bind(principal.last_used_at.map(|d| d.to_rfc3339()))
	.bind(now.to_rfc3339())
	.bind(principal.id.to_string())
	.execute(&mut *conn)
	.await
	.map_err(|e| duplicate_or_storage(e, &principal.name))?;

	for (flag_name, value) in principal.staged_flags() {
		match value.as_option() {
			Some(value) => {
				flag::set(
					&mut *conn,
					&principal.id,
					flag_name,
					value,
					flag::FlagWrite::RequireRegistered,
				)
				.await?
			}
			None => {
				flag::clear(&mut *conn, &principal.id, flag_name).await?;
			}
		}
	}

	let staged = principal.staged_flags().len();
	principal.clear_staged_flags();
	principal.updated_at = now;

	tracing::debug!(principal_id = %principal.id, staged, "principal saved");
	Ok(())
}

#[tracing::instrument(skip(conn), fields(principal_id = %id))]
pub(crate) async fn delete(conn: &mut SqliteConnection, id: &PrincipalId) -> Result<(), DbError> {
	if !exists(&mut *conn, id).await? {
		return Err(AuthzError::NotFound(PrincipalRef::Id(*id).to_string()).into());
	}

	let descendants = membership::descendant_ids(&mut *conn, id).await?;

	sqlx::query("DELETE FROM memberships WHERE member_id = ? OR group_id = ?")
		.bind(id.to_string())
		.bind(id.to_string())
		.execute(&mut *conn)
		.await?;
	sqlx::query("DELETE FROM principal_ancestors WHERE principal_id = ? OR ancestor_id = ?")
		.bind(id.to_string())
		.bind(id.to_string())
		.execute(&mut *conn)
		.await?;
	sqlx::query("DELETE FROM principal_flags WHERE principal_id = ?")
		.bind(id.to_string())
		.execute(&mut *conn)
		.await?;
	sqlx::query("DELETE FROM principals WHERE id = ?")
		.bind(id.to_string())
		.execute(&mut *conn)
		.await?;

	let rebuilt = membership::recompute(&mut *conn, &descendants).await?;

	tracing::debug!(principal_id = %id, rebuilt, "principal deleted");
	Ok(())
}

pub(crate) async fn list<'e, E>(
	executor: E,
	is_group: Option<bool>,
) -> Result<Vec<Principal>, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let kind = is_group.map(|g| g as i32);
	let rows = sqlx::query(
		r#"
		SELECT id, name, is_group, created_at, updated_at, last_used_at
		FROM principals
		WHERE (? IS NULL OR is_group = ?)
		ORDER BY name
		"#,
	)
	.bind(kind)
	.bind(kind)
	.fetch_all(executor)
	.await?;

	rows.iter().map(row_to_principal).collect()
}

/// Set `last_used_at` to now.
pub(crate) async fn touch<'e, E>(executor: E, id: &PrincipalId) -> Result<DateTime<Utc>, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let now = Utc::now();
	let result = sqlx::query("UPDATE principals SET last_used_at = ? WHERE id = ?")
		.bind(now.to_rfc3339())
		.bind(id.to_string())
		.execute(executor)
		.await?;

	if result.rows_affected() == 0 {
		return Err(AuthzError::NotFound(PrincipalRef::Id(*id).to_string()).into());
	}
	Ok(now)
}

fn duplicate_or_storage(err: sqlx::Error, name: &str) -> DbError {
	if is_unique_violation(&err) {
		AuthzError::DuplicateName(name.to_string()).into()
	} else {
		err.into()
	}
}

fn row_to_principal(row: &SqliteRow) -> Result<Principal, DbError> {
	let id: String = row.get("id");
	let is_group: i32 = row.get("is_group");
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	let last_used_at: Option<String> = row.get("last_used_at");

	Ok(Principal::from_parts(
		parse_id(&id, "principal id")?,
		row.get::<String, _>("name"),
		is_group != 0,
		parse_timestamp(&created_at, "created_at")?,
		parse_timestamp(&updated_at, "updated_at")?,
		last_used_at
			.map(|raw| parse_timestamp(&raw, "last_used_at"))
			.transpose()?,
	))
}
