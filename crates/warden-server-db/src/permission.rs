// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission resolution against stored closures.
//!
//! A permission is never stored. Each read joins the principal's closure rows
//! with the flag rows of its ancestors in one statement and hands the
//! resulting `(distance, value)` pairs to [`warden_authz_core::resolve`].

use async_trait::async_trait;
use sqlx::{Executor, Row, Sqlite};
use std::collections::BTreeMap;
use warden_authz_core::{
	AuthzError, Closure, Contribution, FlagName, PrincipalId, PrincipalRef, Resolution, Tristate,
};

use crate::error::DbError;
use crate::row::{parse_distance, parse_flag_name, parse_id};

/// Read side used by anything that needs to ask "may this principal do X?".
#[async_trait]
pub trait PermissionResolver: Send + Sync {
	async fn resolve(
		&self,
		principal_id: &PrincipalId,
		flag: &FlagName,
	) -> Result<Tristate, DbError>;
	async fn resolve_all(
		&self,
		principal_id: &PrincipalId,
	) -> Result<BTreeMap<FlagName, Tristate>, DbError>;
	async fn closure_of(&self, principal_id: &PrincipalId) -> Result<Closure, DbError>;
}

/// Every ancestor (self included) that has `flag` set, with its distance.
pub(crate) async fn contributions<'e, E>(
	executor: E,
	principal_id: &PrincipalId,
	flag: &FlagName,
) -> Result<Vec<Contribution>, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let rows = sqlx::query(
		r#"
		SELECT a.ancestor_id, a.distance, f.value
		FROM principal_ancestors a
		LEFT JOIN principal_flags f
			ON f.principal_id = a.ancestor_id AND f.name = ?
		WHERE a.principal_id = ?
		"#,
	)
	.bind(flag.as_str())
	.bind(principal_id.to_string())
	.fetch_all(executor)
	.await?;

	if rows.is_empty() {
		return Err(AuthzError::NotFound(PrincipalRef::Id(*principal_id).to_string()).into());
	}

	let mut found = Vec::new();
	for row in &rows {
		let Some(value) = row.get::<Option<i64>, _>("value") else {
			continue;
		};
		let ancestor: String = row.get("ancestor_id");
		found.push(Contribution {
			ancestor_id: parse_id(&ancestor, "ancestor_id")?,
			distance: parse_distance(row.get("distance"))?,
			value: value != 0,
		});
	}
	Ok(found)
}

#[tracing::instrument(skip(executor), fields(principal_id = %principal_id, flag = %flag))]
pub(crate) async fn resolve<'e, E>(
	executor: E,
	principal_id: &PrincipalId,
	flag: &FlagName,
) -> Result<Tristate, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let found = contributions(executor, principal_id, flag).await?;
	let value = warden_authz_core::resolve(found.iter().map(|c| (c.distance, c.value)));
	tracing::debug!(contributions = found.len(), %value, "permission resolved");
	Ok(value)
}

pub(crate) async fn explain<'e, E>(
	executor: E,
	principal_id: &PrincipalId,
	flag: &FlagName,
) -> Result<Resolution, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let found = contributions(executor, principal_id, flag).await?;
	Ok(warden_authz_core::explain(found))
}

/// Resolve every flag set anywhere in the principal's closure.
///
/// Flags that no ancestor sets are left out rather than reported as absent.
#[tracing::instrument(skip(executor), fields(principal_id = %principal_id))]
pub(crate) async fn resolve_all<'e, E>(
	executor: E,
	principal_id: &PrincipalId,
) -> Result<BTreeMap<FlagName, Tristate>, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let rows = sqlx::query(
		r#"
		SELECT a.distance, f.name, f.value
		FROM principal_ancestors a
		LEFT JOIN principal_flags f ON f.principal_id = a.ancestor_id
		WHERE a.principal_id = ?
		"#,
	)
	.bind(principal_id.to_string())
	.fetch_all(executor)
	.await?;

	if rows.is_empty() {
		return Err(AuthzError::NotFound(PrincipalRef::Id(*principal_id).to_string()).into());
	}

	let mut by_flag: BTreeMap<FlagName, Vec<(u32, bool)>> = BTreeMap::new();
	for row in &rows {
		let Some(name) = row.get::<Option<String>, _>("name") else {
			continue;
		};
		let value: i64 = row.get("value");
		by_flag
			.entry(parse_flag_name(name)?)
			.or_default()
			.push((parse_distance(row.get("distance"))?, value != 0));
	}

	Ok(by_flag
		.into_iter()
		.map(|(name, found)| (name, warden_authz_core::resolve(found)))
		.collect())
}
