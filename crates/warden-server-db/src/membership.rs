// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Membership edges and closure maintenance.
//!
//! Adding or removing an edge `member -> group` changes the closure of
//! `member` and of everything below it, and nothing else. Both operations
//! collect that subtree from `principal_ancestors` before touching the
//! edge, then rebuild each affected closure from the remaining edge set with
//! [`MembershipGraph::closure_of`]. Distances are never adjusted in place.
//!
//! Callers run these functions inside one transaction so that the cycle
//! check, the edge write and the closure rebuild commit together.

use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use std::collections::BTreeMap;
use warden_authz_core::{
	AuthzError, Closure, MembershipEdge, MembershipGraph, PrincipalId, PrincipalRef,
};

use crate::error::DbError;
use crate::principal;
use crate::row::{parse_distance, parse_id};

/// Insert an edge after validating it. Returns false if it already existed.
#[tracing::instrument(skip(conn), fields(member_id = %edge.member_id, group_id = %edge.group_id))]
pub(crate) async fn add_edge(
	conn: &mut SqliteConnection,
	edge: MembershipEdge,
) -> Result<bool, DbError> {
	if edge.member_id == edge.group_id {
		return Err(AuthzError::SelfReference(edge.member_id).into());
	}

	principal::load(&mut *conn, &PrincipalRef::Id(edge.member_id)).await?;
	let group = principal::load(&mut *conn, &PrincipalRef::Id(edge.group_id)).await?;
	if !group.is_group {
		tracing::warn!(group_id = %group.id, "membership target is not a group");
		return Err(AuthzError::NotAGroup(group.id).into());
	}

	if edge_exists(&mut *conn, &edge).await? {
		tracing::debug!("edge already present");
		return Ok(false);
	}

	// member is already an ancestor of group; the edge would close a loop.
	if is_ancestor(&mut *conn, &edge.group_id, &edge.member_id).await? {
		tracing::warn!("membership would create a cycle");
		return Err(AuthzError::Cycle {
			member: edge.member_id,
			group: edge.group_id,
		}
		.into());
	}

	sqlx::query(
		r#"
		INSERT INTO memberships (member_id, group_id, created_at)
		VALUES (?, ?, ?)
		"#,
	)
	.bind(edge.member_id.to_string())
	.bind(edge.group_id.to_string())
	.bind(chrono::Utc::now().to_rfc3339())
	.execute(&mut *conn)
	.await?;

	let rebuilt = recompute_subtree(&mut *conn, &edge.member_id).await?;
	tracing::debug!(rebuilt, "edge added");
	Ok(true)
}

/// Delete an edge. Returns false, without touching any closure, if it was absent.
#[tracing::instrument(skip(conn), fields(member_id = %edge.member_id, group_id = %edge.group_id))]
pub(crate) async fn remove_edge(
	conn: &mut SqliteConnection,
	edge: MembershipEdge,
) -> Result<bool, DbError> {
	let result = sqlx::query("DELETE FROM memberships WHERE member_id = ? AND group_id = ?")
		.bind(edge.member_id.to_string())
		.bind(edge.group_id.to_string())
		.execute(&mut *conn)
		.await?;

	if result.rows_affected() == 0 {
		tracing::debug!("edge not present");
		return Ok(false);
	}

	let rebuilt = recompute_subtree(&mut *conn, &edge.member_id).await?;
	tracing::debug!(rebuilt, "edge removed");
	Ok(true)
}

pub(crate) async fn edge_exists<'e, E>(executor: E, edge: &MembershipEdge) -> Result<bool, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let row = sqlx::query("SELECT 1 FROM memberships WHERE member_id = ? AND group_id = ?")
		.bind(edge.member_id.to_string())
		.bind(edge.group_id.to_string())
		.fetch_optional(executor)
		.await?;
	Ok(row.is_some())
}

async fn is_ancestor<'e, E>(
	executor: E,
	principal_id: &PrincipalId,
	ancestor_id: &PrincipalId,
) -> Result<bool, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let row = sqlx::query(
		"SELECT 1 FROM principal_ancestors WHERE principal_id = ? AND ancestor_id = ?",
	)
	.bind(principal_id.to_string())
	.bind(ancestor_id.to_string())
	.fetch_optional(executor)
	.await?;
	Ok(row.is_some())
}

/// Rebuild the closure of `root` and of every principal that has `root` as
/// an ancestor. Returns how many closures were written.
pub(crate) async fn recompute_subtree(
	conn: &mut SqliteConnection,
	root: &PrincipalId,
) -> Result<usize, DbError> {
	let mut affected = descendant_ids(&mut *conn, root).await?;
	affected.push(*root);
	recompute(conn, &affected).await
}

/// Rebuild the given closures from the current edge set.
pub(crate) async fn recompute(
	conn: &mut SqliteConnection,
	principal_ids: &[PrincipalId],
) -> Result<usize, DbError> {
	if principal_ids.is_empty() {
		return Ok(0);
	}

	let graph = load_graph(&mut *conn).await?;
	for id in principal_ids {
		write_closure(&mut *conn, &graph.closure_of(*id)).await?;
	}
	Ok(principal_ids.len())
}

/// Rebuild every closure in the store.
#[tracing::instrument(skip(conn))]
pub(crate) async fn rebuild_all(conn: &mut SqliteConnection) -> Result<usize, DbError> {
	let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM principals")
		.fetch_all(&mut *conn)
		.await?;
	let ids = ids
		.iter()
		.map(|raw| parse_id(raw, "principal id"))
		.collect::<Result<Vec<_>, _>>()?;

	let rebuilt = recompute(conn, &ids).await?;
	tracing::info!(rebuilt, "all closures rebuilt");
	Ok(rebuilt)
}

/// Replace the stored closure rows of one principal.
pub(crate) async fn write_closure(
	conn: &mut SqliteConnection,
	closure: &Closure,
) -> Result<(), DbError> {
	let principal_id = closure.principal_id().to_string();

	sqlx::query("DELETE FROM principal_ancestors WHERE principal_id = ?")
		.bind(&principal_id)
		.execute(&mut *conn)
		.await?;

	for (ancestor_id, distance) in closure.iter() {
		sqlx::query(
			r#"
			INSERT INTO principal_ancestors (principal_id, ancestor_id, distance)
			VALUES (?, ?, ?)
			"#,
		)
		.bind(&principal_id)
		.bind(ancestor_id.to_string())
		.bind(i64::from(distance))
		.execute(&mut *conn)
		.await?;
	}
	Ok(())
}

pub(crate) async fn load_graph<'e, E>(executor: E) -> Result<MembershipGraph, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let rows = sqlx::query("SELECT member_id, group_id FROM memberships")
		.fetch_all(executor)
		.await?;

	let edges = rows
		.iter()
		.map(|row| {
			let member: String = row.get("member_id");
			let group: String = row.get("group_id");
			Ok(MembershipEdge::new(
				parse_id(&member, "member_id")?,
				parse_id(&group, "group_id")?,
			))
		})
		.collect::<Result<Vec<_>, DbError>>()?;

	Ok(MembershipGraph::from_edges(edges))
}

/// Stored closure of a principal.
pub(crate) async fn closure_of<'e, E>(
	executor: E,
	principal_id: &PrincipalId,
) -> Result<Closure, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let rows =
		sqlx::query("SELECT ancestor_id, distance FROM principal_ancestors WHERE principal_id = ?")
			.bind(principal_id.to_string())
			.fetch_all(executor)
			.await?;

	// Every principal has at least its own row.
	if rows.is_empty() {
		return Err(AuthzError::NotFound(PrincipalRef::Id(*principal_id).to_string()).into());
	}

	let distances = rows
		.iter()
		.map(|row| {
			let ancestor: String = row.get("ancestor_id");
			let distance: i64 = row.get("distance");
			Ok((parse_id(&ancestor, "ancestor_id")?, parse_distance(distance)?))
		})
		.collect::<Result<Vec<_>, DbError>>()?;

	Ok(Closure::from_distances(*principal_id, distances))
}

/// Principals that have `principal_id` as a proper ancestor.
pub(crate) async fn descendant_ids<'e, E>(
	executor: E,
	principal_id: &PrincipalId,
) -> Result<Vec<PrincipalId>, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	Ok(descendants_with_distance(executor, principal_id)
		.await?
		.into_keys()
		.filter(|id| id != principal_id)
		.collect())
}

/// Everything below `principal_id` (itself included at 0) with the distance
/// from that descendant up to it.
pub(crate) async fn descendants_with_distance<'e, E>(
	executor: E,
	principal_id: &PrincipalId,
) -> Result<BTreeMap<PrincipalId, u32>, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let rows =
		sqlx::query("SELECT principal_id, distance FROM principal_ancestors WHERE ancestor_id = ?")
			.bind(principal_id.to_string())
			.fetch_all(executor)
			.await?;

	rows
		.iter()
		.map(|row| {
			let id: String = row.get("principal_id");
			let distance: i64 = row.get("distance");
			Ok((parse_id(&id, "principal_id")?, parse_distance(distance)?))
		})
		.collect()
}

/// Proper descendants of a principal, nearest first.
pub(crate) async fn descendants_of<'e, E>(
	executor: E,
	principal_id: &PrincipalId,
) -> Result<Vec<(PrincipalId, u32)>, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let found = descendants_with_distance(executor, principal_id).await?;
	if found.is_empty() {
		return Err(AuthzError::NotFound(PrincipalRef::Id(*principal_id).to_string()).into());
	}

	let mut below: Vec<(PrincipalId, u32)> = found
		.into_iter()
		.filter(|(id, _)| id != principal_id)
		.collect();
	below.sort_by_key(|(id, distance)| (*distance, *id));
	Ok(below)
}

/// Direct members of a group, ordered by name.
pub(crate) async fn members_of<'e, E>(
	executor: E,
	group_id: &PrincipalId,
) -> Result<Vec<PrincipalId>, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let ids: Vec<String> = sqlx::query_scalar(
		r#"
		SELECT m.member_id
		FROM memberships m
		INNER JOIN principals p ON p.id = m.member_id
		WHERE m.group_id = ?
		ORDER BY p.name
		"#,
	)
	.bind(group_id.to_string())
	.fetch_all(executor)
	.await?;

	ids.iter().map(|raw| parse_id(raw, "member_id")).collect()
}

/// Groups a principal is a direct member of, ordered by name.
pub(crate) async fn groups_of<'e, E>(
	executor: E,
	member_id: &PrincipalId,
) -> Result<Vec<PrincipalId>, DbError>
where
	E: Executor<'e, Database = Sqlite>,
{
	let ids: Vec<String> = sqlx::query_scalar(
		r#"
		SELECT m.group_id
		FROM memberships m
		INNER JOIN principals p ON p.id = m.group_id
		WHERE m.member_id = ?
		ORDER BY p.name
		"#,
	)
	.bind(member_id.to_string())
	.fetch_all(executor)
	.await?;

	ids.iter().map(|raw| parse_id(raw, "group_id")).collect()
}
