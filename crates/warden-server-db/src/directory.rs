// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The directory: principals, flags and memberships behind one handle.
//!
//! [`Directory`] owns the pool. Its mutating methods each run in their own
//! transaction; callers that need several mutations to land together open a
//! [`DirectoryTx`] with [`Directory::begin`] and commit it themselves. A
//! `DirectoryTx` dropped without `commit` rolls back.
//!
//! Reads on `Directory` go straight to the pool as single statements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Sqlite, Transaction};
use std::collections::BTreeMap;
use warden_authz_core::{
	Closure, FlagDefinition, FlagName, MembershipEdge, Principal, PrincipalId, PrincipalRef,
	Resolution, Tristate,
};

use crate::error::DbError;
use crate::flag::{self, FlagWrite};
use crate::membership;
use crate::permission::{self, PermissionResolver};
use crate::principal::{self, PrincipalStore};

/// Deployment-wide rules for flag writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagPolicy {
	/// When false, `FlagWrite::CreateIfMissing` is treated as
	/// `FlagWrite::RequireRegistered`.
	pub allow_auto_register: bool,
}

impl Default for FlagPolicy {
	fn default() -> Self {
		Self {
			allow_auto_register: true,
		}
	}
}

impl FlagPolicy {
	fn effective(&self, mode: FlagWrite) -> FlagWrite {
		if self.allow_auto_register {
			mode
		} else {
			FlagWrite::RequireRegistered
		}
	}
}

#[derive(Clone)]
pub struct Directory {
	pool: SqlitePool,
	policy: FlagPolicy,
}

impl Directory {
	/// Create a directory over a pool whose schema is already migrated.
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			pool,
			policy: FlagPolicy::default(),
		}
	}

	pub fn with_flag_policy(mut self, policy: FlagPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	pub fn flag_policy(&self) -> FlagPolicy {
		self.policy
	}

	/// Open a unit of work.
	///
	/// The write lock is taken up front (`BEGIN IMMEDIATE`). Every mutation
	/// reads before it writes, and a deferred transaction that upgrades to a
	/// writer while another one holds the lock fails with SQLITE_BUSY instead
	/// of waiting out the busy timeout.
	pub async fn begin(&self) -> Result<DirectoryTx, DbError> {
		let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
		Ok(DirectoryTx {
			tx,
			policy: self.policy,
		})
	}

	/// Register the deployment's flag vocabulary. Returns how many names were new.
	#[tracing::instrument(skip(self, vocabulary), fields(names = vocabulary.len()))]
	pub async fn bootstrap(&self, vocabulary: &[FlagName]) -> Result<usize, DbError> {
		let mut tx = self.begin().await?;
		let mut created = 0;
		for name in vocabulary {
			if tx.register_flag(name, None).await? {
				created += 1;
			}
		}
		tx.commit().await?;

		tracing::info!(created, "flag vocabulary registered");
		Ok(created)
	}

	// =========================================================================
	// Principals
	// =========================================================================

	pub async fn create_principal(
		&self,
		name: &str,
		is_group: bool,
		initial_flags: &[(FlagName, bool)],
	) -> Result<Principal, DbError> {
		let mut tx = self.begin().await?;
		let created = tx.create_principal(name, is_group, initial_flags).await?;
		tx.commit().await?;
		Ok(created)
	}

	/// # Errors
	/// Returns `AuthzError::NotFound` if no principal matches `key`.
	pub async fn load_principal(&self, key: &PrincipalRef) -> Result<Principal, DbError> {
		principal::load(&self.pool, key).await
	}

	pub async fn save_principal(&self, record: &mut Principal) -> Result<(), DbError> {
		let mut tx = self.begin().await?;
		tx.save_principal(record).await?;
		tx.commit().await
	}

	pub async fn delete_principal(&self, id: &PrincipalId) -> Result<(), DbError> {
		let mut tx = self.begin().await?;
		tx.delete_principal(id).await?;
		tx.commit().await
	}

	/// All principals ordered by name, optionally only users or only groups.
	pub async fn list_principals(&self, is_group: Option<bool>) -> Result<Vec<Principal>, DbError> {
		principal::list(&self.pool, is_group).await
	}

	pub async fn touch_principal(&self, id: &PrincipalId) -> Result<DateTime<Utc>, DbError> {
		principal::touch(&self.pool, id).await
	}

	// =========================================================================
	// Flags
	// =========================================================================

	pub async fn register_flag(
		&self,
		name: &FlagName,
		description: Option<&str>,
	) -> Result<bool, DbError> {
		flag::register(&self.pool, name, description).await
	}

	pub async fn flag_definitions(&self) -> Result<Vec<FlagDefinition>, DbError> {
		flag::list_definitions(&self.pool).await
	}

	pub async fn get_flag(&self, id: &PrincipalId, name: &FlagName) -> Result<Tristate, DbError> {
		flag::get(&self.pool, id, name).await
	}

	pub async fn set_flag(
		&self,
		id: &PrincipalId,
		name: &FlagName,
		value: bool,
		mode: FlagWrite,
	) -> Result<(), DbError> {
		let mut tx = self.begin().await?;
		tx.set_flag(id, name, value, mode).await?;
		tx.commit().await
	}

	pub async fn clear_flag(&self, id: &PrincipalId, name: &FlagName) -> Result<bool, DbError> {
		flag::clear(&self.pool, id, name).await
	}

	pub async fn flags_of(&self, id: &PrincipalId) -> Result<BTreeMap<FlagName, bool>, DbError> {
		flag::flags_of(&self.pool, id).await
	}

	// =========================================================================
	// Membership
	// =========================================================================

	/// Make `member` a direct member of `group`.
	///
	/// Returns false if the edge already existed.
	///
	/// # Errors
	/// `SelfReference`, `NotFound`, `NotAGroup` or `Cycle`, checked in that order.
	pub async fn add_edge(
		&self,
		member: &PrincipalId,
		group: &PrincipalId,
	) -> Result<bool, DbError> {
		let mut tx = self.begin().await?;
		let added = tx.add_edge(member, group).await?;
		tx.commit().await?;
		Ok(added)
	}

	pub async fn remove_edge(
		&self,
		member: &PrincipalId,
		group: &PrincipalId,
	) -> Result<bool, DbError> {
		let mut tx = self.begin().await?;
		let removed = tx.remove_edge(member, group).await?;
		tx.commit().await?;
		Ok(removed)
	}

	pub async fn closure_of(&self, id: &PrincipalId) -> Result<Closure, DbError> {
		membership::closure_of(&self.pool, id).await
	}

	pub async fn members_of(&self, group: &PrincipalId) -> Result<Vec<PrincipalId>, DbError> {
		membership::members_of(&self.pool, group).await
	}

	pub async fn groups_of(&self, member: &PrincipalId) -> Result<Vec<PrincipalId>, DbError> {
		membership::groups_of(&self.pool, member).await
	}

	pub async fn descendants_of(
		&self,
		id: &PrincipalId,
	) -> Result<Vec<(PrincipalId, u32)>, DbError> {
		membership::descendants_of(&self.pool, id).await
	}

	/// Recompute every stored closure from the edge table.
	pub async fn rebuild_closures(&self) -> Result<usize, DbError> {
		let mut tx = self.begin().await?;
		let rebuilt = membership::rebuild_all(&mut *tx.tx).await?;
		tx.commit().await?;
		Ok(rebuilt)
	}

	// =========================================================================
	// Permissions
	// =========================================================================

	pub async fn resolve(&self, id: &PrincipalId, flag: &FlagName) -> Result<Tristate, DbError> {
		permission::resolve(&self.pool, id, flag).await
	}

	pub async fn resolve_all(
		&self,
		id: &PrincipalId,
	) -> Result<BTreeMap<FlagName, Tristate>, DbError> {
		permission::resolve_all(&self.pool, id).await
	}

	pub async fn explain(&self, id: &PrincipalId, flag: &FlagName) -> Result<Resolution, DbError> {
		permission::explain(&self.pool, id, flag).await
	}
}

#[async_trait]
impl PrincipalStore for Directory {
	async fn load_principal(&self, key: &PrincipalRef) -> Result<Principal, DbError> {
		self.load_principal(key).await
	}

	async fn touch_principal(&self, id: &PrincipalId) -> Result<DateTime<Utc>, DbError> {
		self.touch_principal(id).await
	}

	async fn list_principals(&self, is_group: Option<bool>) -> Result<Vec<Principal>, DbError> {
		self.list_principals(is_group).await
	}
}

#[async_trait]
impl PermissionResolver for Directory {
	async fn resolve(
		&self,
		principal_id: &PrincipalId,
		flag: &FlagName,
	) -> Result<Tristate, DbError> {
		self.resolve(principal_id, flag).await
	}

	async fn resolve_all(
		&self,
		principal_id: &PrincipalId,
	) -> Result<BTreeMap<FlagName, Tristate>, DbError> {
		self.resolve_all(principal_id).await
	}

	async fn closure_of(&self, principal_id: &PrincipalId) -> Result<Closure, DbError> {
		self.closure_of(principal_id).await
	}
}

/// An open unit of work. Reads inside it see its own uncommitted writes.
pub struct DirectoryTx {
	tx: Transaction<'static, Sqlite>,
	policy: FlagPolicy,
}

impl DirectoryTx {
	pub async fn create_principal(
		&mut self,
		name: &str,
		is_group: bool,
		initial_flags: &[(FlagName, bool)],
	) -> Result<Principal, DbError> {
		principal::create(&mut *self.tx, name, is_group, initial_flags).await
	}

	pub async fn load_principal(&mut self, key: &PrincipalRef) -> Result<Principal, DbError> {
		principal::load(&mut *self.tx, key).await
	}

	pub async fn save_principal(&mut self, record: &mut Principal) -> Result<(), DbError> {
		principal::save(&mut *self.tx, record).await
	}

	pub async fn delete_principal(&mut self, id: &PrincipalId) -> Result<(), DbError> {
		principal::delete(&mut *self.tx, id).await
	}

	pub async fn register_flag(
		&mut self,
		name: &FlagName,
		description: Option<&str>,
	) -> Result<bool, DbError> {
		flag::register(&mut *self.tx, name, description).await
	}

	/// Write a flag, subject to the directory's [`FlagPolicy`].
	pub async fn set_flag(
		&mut self,
		id: &PrincipalId,
		name: &FlagName,
		value: bool,
		mode: FlagWrite,
	) -> Result<(), DbError> {
		let mode = self.policy.effective(mode);
		flag::set(&mut *self.tx, id, name, value, mode).await
	}

	pub async fn clear_flag(&mut self, id: &PrincipalId, name: &FlagName) -> Result<bool, DbError> {
		flag::clear(&mut *self.tx, id, name).await
	}

	pub async fn add_edge(
		&mut self,
		member: &PrincipalId,
		group: &PrincipalId,
	) -> Result<bool, DbError> {
		membership::add_edge(&mut *self.tx, MembershipEdge::new(*member, *group)).await
	}

	pub async fn remove_edge(
		&mut self,
		member: &PrincipalId,
		group: &PrincipalId,
	) -> Result<bool, DbError> {
		membership::remove_edge(&mut *self.tx, MembershipEdge::new(*member, *group)).await
	}

	pub async fn closure_of(&mut self, id: &PrincipalId) -> Result<Closure, DbError> {
		membership::closure_of(&mut *self.tx, id).await
	}

	pub async fn resolve(
		&mut self,
		id: &PrincipalId,
		flag: &FlagName,
	) -> Result<Tristate, DbError> {
		permission::resolve(&mut *self.tx, id, flag).await
	}

	pub async fn commit(self) -> Result<(), DbError> {
		self.tx.commit().await?;
		Ok(())
	}

	pub async fn rollback(self) -> Result<(), DbError> {
		self.tx.rollback().await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_test_directory, create_test_pool};
	use crate::{create_pool, run_migrations};
	use warden_authz_core::AuthzError;

	fn flag(name: &str) -> FlagName {
		FlagName::parse(name).unwrap()
	}

	async fn create_file_directory(tmp: &tempfile::TempDir) -> Directory {
		let url = format!("sqlite:{}", tmp.path().join("warden.db").display());
		let pool = create_pool(&url).await.unwrap();
		run_migrations(&pool).await.unwrap();
		Directory::new(pool)
	}

	#[tokio::test]
	async fn test_dropped_tx_rolls_back() {
		let dir = create_test_directory().await;
		{
			let mut tx = dir.begin().await.unwrap();
			tx.create_principal("alice", false, &[]).await.unwrap();
		}

		assert!(dir.list_principals(None).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_explicit_rollback_discards_edge_and_closure() {
		let dir = create_test_directory().await;
		let u = dir.create_principal("u", false, &[]).await.unwrap();
		let g = dir.create_principal("g", true, &[]).await.unwrap();

		let mut tx = dir.begin().await.unwrap();
		tx.add_edge(&u.id, &g.id).await.unwrap();
		assert!(tx.closure_of(&u.id).await.unwrap().contains(&g.id));
		tx.rollback().await.unwrap();

		assert!(!dir.closure_of(&u.id).await.unwrap().contains(&g.id));
		assert!(dir.groups_of(&u.id).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_commit_applies_all_writes_together() {
		let dir = create_test_directory().await;
		dir.register_flag(&flag("beta"), None).await.unwrap();

		let mut tx = dir.begin().await.unwrap();
		let g = tx.create_principal("g", true, &[(flag("beta"), true)]).await.unwrap();
		let u = tx.create_principal("u", false, &[]).await.unwrap();
		tx.add_edge(&u.id, &g.id).await.unwrap();
		assert_eq!(tx.resolve(&u.id, &flag("beta")).await.unwrap(), Tristate::True);
		tx.commit().await.unwrap();

		assert_eq!(dir.resolve(&u.id, &flag("beta")).await.unwrap(), Tristate::True);
	}

	#[tokio::test]
	async fn test_failed_mutation_leaves_tx_usable() {
		let dir = create_test_directory().await;
		let g1 = dir.create_principal("g1", true, &[]).await.unwrap();
		let g2 = dir.create_principal("g2", true, &[]).await.unwrap();
		dir.add_edge(&g2.id, &g1.id).await.unwrap();

		let mut tx = dir.begin().await.unwrap();
		let err = tx.add_edge(&g1.id, &g2.id).await.unwrap_err();
		assert!(matches!(err.as_authz(), Some(AuthzError::Cycle { .. })));
		let g3 = tx.create_principal("g3", true, &[]).await.unwrap();
		tx.commit().await.unwrap();

		assert!(dir.load_principal(&PrincipalRef::Id(g3.id)).await.is_ok());
	}

	#[tokio::test]
	async fn test_policy_blocks_auto_register() {
		let pool = create_test_pool().await;
		let dir = Directory::new(pool).with_flag_policy(FlagPolicy {
			allow_auto_register: false,
		});
		let alice = dir.create_principal("alice", false, &[]).await.unwrap();

		let err = dir
			.set_flag(&alice.id, &flag("beta"), true, FlagWrite::CreateIfMissing)
			.await
			.unwrap_err();
		assert_eq!(
			err.as_authz(),
			Some(&AuthzError::UnknownFlag("beta".to_string()))
		);
		assert!(dir.flag_definitions().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_bootstrap_is_idempotent() {
		let dir = create_test_directory().await;
		let vocabulary = vec![flag("beta"), flag("admin")];

		assert_eq!(dir.bootstrap(&vocabulary).await.unwrap(), 2);
		assert_eq!(dir.bootstrap(&vocabulary).await.unwrap(), 0);
		assert_eq!(dir.flag_definitions().await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn test_directory_as_trait_objects() {
		let dir = create_test_directory().await;
		let alice = dir.create_principal("alice", false, &[]).await.unwrap();

		let store: &dyn PrincipalStore = &dir;
		let resolver: &dyn PermissionResolver = &dir;

		assert_eq!(
			store.load_principal(&PrincipalRef::from("alice")).await.unwrap().id,
			alice.id
		);
		assert_eq!(
			resolver.resolve(&alice.id, &flag("beta")).await.unwrap(),
			Tristate::Absent
		);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_writers_queue_instead_of_failing() {
		let tmp = tempfile::tempdir().unwrap();
		let dir = create_file_directory(&tmp).await;
		dir.register_flag(&flag("beta"), None).await.unwrap();
		let staff = dir.create_principal("staff", true, &[]).await.unwrap();
		let mut users = Vec::new();
		for i in 0..8 {
			users.push(dir.create_principal(&format!("u{i}"), false, &[]).await.unwrap());
		}

		let mut tasks = tokio::task::JoinSet::new();
		for (i, user) in users.iter().enumerate() {
			let dir = dir.clone();
			let (id, staff_id) = (user.id, staff.id);
			tasks.spawn(async move {
				if i % 2 == 0 {
					dir.set_flag(&id, &flag("beta"), true, FlagWrite::RequireRegistered)
						.await
				} else {
					dir.add_edge(&id, &staff_id).await.map(|_| ())
				}
			});
		}
		while let Some(joined) = tasks.join_next().await {
			joined.unwrap().unwrap();
		}

		assert_eq!(dir.members_of(&staff.id).await.unwrap().len(), 4);
		for user in users.iter().step_by(2) {
			assert_eq!(
				dir.resolve(&user.id, &flag("beta")).await.unwrap(),
				Tristate::True
			);
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_opposing_edges_leave_exactly_one() {
		let tmp = tempfile::tempdir().unwrap();
		let dir = create_file_directory(&tmp).await;

		for round in 0..5 {
			let a = dir.create_principal(&format!("a{round}"), true, &[]).await.unwrap();
			let b = dir.create_principal(&format!("b{round}"), true, &[]).await.unwrap();

			let (a_id, b_id) = (a.id, b.id);

			let forward = {
				let dir = dir.clone();
				tokio::spawn(async move { dir.add_edge(&a_id, &b_id).await })
			};
			let backward = {
				let dir = dir.clone();
				tokio::spawn(async move { dir.add_edge(&b_id, &a_id).await })
			};
			let results = [forward.await.unwrap(), backward.await.unwrap()];

			let added = results.iter().filter(|r| matches!(r, Ok(true))).count();
			let cycles = results
				.iter()
				.filter_map(|r| r.as_ref().err())
				.filter(|e| matches!(e.as_authz(), Some(AuthzError::Cycle { .. })))
				.count();
			assert_eq!((added, cycles), (1, 1), "round {round}: {results:?}");

			let edges = dir.groups_of(&a.id).await.unwrap().len()
				+ dir.groups_of(&b.id).await.unwrap().len();
			assert_eq!(edges, 1);
			let a_up = dir.closure_of(&a.id).await.unwrap();
			let b_up = dir.closure_of(&b.id).await.unwrap();
			assert!(!(a_up.contains(&b.id) && b_up.contains(&a.id)));
		}
	}
}
