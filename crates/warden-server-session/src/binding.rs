// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session-user binding.
//!
//! A [`SessionUser`] is a logged-in, non-group principal together with the
//! handles it needs to answer permission questions. Permissions are resolved
//! on every call, so flag and membership changes made after binding are
//! seen immediately.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use warden_authz_core::{FlagName, Principal, PrincipalId, PrincipalRef, Tristate};
use warden_server_db::{PermissionResolver, PrincipalStore};

use crate::credential::CredentialStrategy;
use crate::error::{Result, SessionError};

/// One line of an ancestry report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestryEntry {
	pub id: PrincipalId,
	pub name: String,
	pub distance: u32,
}

/// Builds [`SessionUser`]s from ids or from name and secret.
#[derive(Clone)]
pub struct SessionBinder {
	store: Arc<dyn PrincipalStore>,
	resolver: Arc<dyn PermissionResolver>,
	credentials: Arc<dyn CredentialStrategy>,
	dummy_hash: Arc<OnceLock<String>>,
}

impl SessionBinder {
	pub fn new(
		store: Arc<dyn PrincipalStore>,
		resolver: Arc<dyn PermissionResolver>,
		credentials: Arc<dyn CredentialStrategy>,
	) -> Self {
		Self {
			store,
			resolver,
			credentials,
			dummy_hash: Arc::new(OnceLock::new()),
		}
	}

	pub fn credentials(&self) -> &dyn CredentialStrategy {
		self.credentials.as_ref()
	}

	/// Bind an already authenticated principal.
	pub async fn bind(&self, principal_id: &PrincipalId) -> Result<SessionUser> {
		SessionUser::bind(self.store.clone(), self.resolver.clone(), principal_id).await
	}

	/// Verify `secret` against `stored_hash`, then bind the principal named `name`.
	///
	/// Unknown names and wrong secrets fail the same way. An unknown name still
	/// pays for one verification, against a throwaway hash.
	#[tracing::instrument(skip(self, secret, stored_hash))]
	pub async fn authenticate(
		&self,
		name: &str,
		secret: &str,
		stored_hash: &str,
	) -> Result<SessionUser> {
		let principal = match self.store.load_principal(&PrincipalRef::from(name)).await {
			Ok(principal) => principal,
			Err(e) if e.as_authz().is_some() => {
				let _ = self.credentials.verify(secret, self.dummy_hash()?)?;
				return Err(SessionError::Credential("invalid credentials".to_string()));
			}
			Err(e) => return Err(e.into()),
		};

		if !self.credentials.verify(secret, stored_hash)? {
			tracing::warn!(principal_id = %principal.id, "credential verification failed");
			return Err(SessionError::Credential("invalid credentials".to_string()));
		}

		self.bind(&principal.id).await
	}

	fn dummy_hash(&self) -> Result<&str> {
		if let Some(hash) = self.dummy_hash.get() {
			return Ok(hash);
		}
		let hash = self.credentials.hash("warden-unknown-principal")?;
		Ok(self.dummy_hash.get_or_init(|| hash))
	}
}

pub struct SessionUser {
	principal: Principal,
	store: Arc<dyn PrincipalStore>,
	resolver: Arc<dyn PermissionResolver>,
}

impl std::fmt::Debug for SessionUser {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionUser")
			.field("principal", &self.principal)
			.finish_non_exhaustive()
	}
}

impl SessionUser {
	/// Load the principal, refuse groups, and record the login time.
	#[tracing::instrument(skip(store, resolver))]
	pub async fn bind(
		store: Arc<dyn PrincipalStore>,
		resolver: Arc<dyn PermissionResolver>,
		principal_id: &PrincipalId,
	) -> Result<Self> {
		let mut principal = store.load_principal(&PrincipalRef::Id(*principal_id)).await?;
		if principal.is_group {
			tracing::warn!(principal_id = %principal.id, "refused login as group");
			return Err(SessionError::GroupLogin(principal.id));
		}

		principal.last_used_at = Some(store.touch_principal(&principal.id).await?);

		tracing::debug!(principal_id = %principal.id, name = %principal.name, "session bound");
		Ok(Self {
			principal,
			store,
			resolver,
		})
	}

	pub fn principal(&self) -> &Principal {
		&self.principal
	}

	pub fn id(&self) -> PrincipalId {
		self.principal.id
	}

	pub fn name(&self) -> &str {
		&self.principal.name
	}

	pub async fn permission(&self, flag: &FlagName) -> Result<Tristate> {
		Ok(self.resolver.resolve(&self.principal.id, flag).await?)
	}

	/// True only when the flag resolves to `True`; absent denies.
	pub async fn has_permission(&self, flag: &FlagName) -> Result<bool> {
		Ok(self.permission(flag).await?.is_true())
	}

	/// Every flag visible to this user, resolved.
	pub async fn permissions(&self) -> Result<BTreeMap<FlagName, Tristate>> {
		Ok(self.resolver.resolve_all(&self.principal.id).await?)
	}

	/// Proper ancestors, nearest first, ties broken by name.
	pub async fn ancestry_report(&self) -> Result<Vec<AncestryEntry>> {
		let closure = self.resolver.closure_of(&self.principal.id).await?;

		let mut report = Vec::with_capacity(closure.ancestor_count().saturating_sub(1));
		for (id, distance) in closure.proper_ancestors() {
			let ancestor = self.store.load_principal(&PrincipalRef::Id(id)).await?;
			report.push(AncestryEntry {
				id,
				name: ancestor.name,
				distance,
			});
		}
		report.sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.name.cmp(&b.name)));
		Ok(report)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::credential::Argon2Strategy;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use warden_server_db::testing::create_test_directory;
	use warden_server_db::{Directory, FlagWrite};

	fn beta() -> FlagName {
		FlagName::parse("beta").unwrap()
	}

	fn binder(dir: &Directory) -> SessionBinder {
		let shared = Arc::new(dir.clone());
		SessionBinder::new(shared.clone(), shared, Arc::new(Argon2Strategy))
	}

	#[tokio::test]
	async fn test_bind_touches_last_used() {
		let dir = create_test_directory().await;
		let alice = dir.create_principal("alice", false, &[]).await.unwrap();

		let user = binder(&dir).bind(&alice.id).await.unwrap();

		assert_eq!(user.name(), "alice");
		assert!(user.principal().last_used_at.is_some());
		let stored = dir.load_principal(&PrincipalRef::Id(alice.id)).await.unwrap();
		assert_eq!(stored.last_used_at, user.principal().last_used_at);
	}

	#[tokio::test]
	async fn test_groups_cannot_bind() {
		let dir = create_test_directory().await;
		let staff = dir.create_principal("staff", true, &[]).await.unwrap();

		let err = binder(&dir).bind(&staff.id).await.unwrap_err();
		assert!(matches!(err, SessionError::GroupLogin(id) if id == staff.id));
		let stored = dir.load_principal(&PrincipalRef::Id(staff.id)).await.unwrap();
		assert!(stored.last_used_at.is_none());
	}

	#[tokio::test]
	async fn test_permission_follows_inheritance() {
		let dir = create_test_directory().await;
		dir.register_flag(&beta(), None).await.unwrap();
		let alice = dir.create_principal("alice", false, &[]).await.unwrap();
		let staff = dir.create_principal("staff", true, &[]).await.unwrap();
		dir.add_edge(&alice.id, &staff.id).await.unwrap();

		let user = binder(&dir).bind(&alice.id).await.unwrap();
		assert_eq!(user.permission(&beta()).await.unwrap(), Tristate::Absent);
		assert!(!user.has_permission(&beta()).await.unwrap());

		dir.set_flag(&staff.id, &beta(), true, FlagWrite::RequireRegistered)
			.await
			.unwrap();
		assert!(user.has_permission(&beta()).await.unwrap());
		assert_eq!(
			user.permissions().await.unwrap(),
			BTreeMap::from([(beta(), Tristate::True)])
		);

		dir.set_flag(&alice.id, &beta(), false, FlagWrite::RequireRegistered)
			.await
			.unwrap();
		assert!(!user.has_permission(&beta()).await.unwrap());
	}

	#[tokio::test]
	async fn test_ancestry_report_orders_by_distance_then_name() {
		let dir = create_test_directory().await;
		let u = dir.create_principal("u", false, &[]).await.unwrap();
		let zeta = dir.create_principal("zeta", true, &[]).await.unwrap();
		let alpha = dir.create_principal("alpha", true, &[]).await.unwrap();
		let root = dir.create_principal("root", true, &[]).await.unwrap();
		dir.add_edge(&u.id, &zeta.id).await.unwrap();
		dir.add_edge(&u.id, &alpha.id).await.unwrap();
		dir.add_edge(&zeta.id, &root.id).await.unwrap();

		let user = binder(&dir).bind(&u.id).await.unwrap();
		let report: Vec<(String, u32)> = user
			.ancestry_report()
			.await
			.unwrap()
			.into_iter()
			.map(|e| (e.name, e.distance))
			.collect();

		assert_eq!(
			report,
			vec![
				("alpha".to_string(), 1),
				("zeta".to_string(), 1),
				("root".to_string(), 2)
			]
		);
	}

	#[tokio::test]
	async fn test_authenticate_checks_secret() {
		let dir = create_test_directory().await;
		dir.create_principal("alice", false, &[]).await.unwrap();
		let binder = binder(&dir);
		let stored = binder.credentials().hash("hunter2").unwrap();

		let user = binder.authenticate("alice", "hunter2", &stored).await.unwrap();
		assert_eq!(user.name(), "alice");

		for (name, secret) in [("alice", "wrong"), ("nobody", "hunter2")] {
			let err = binder.authenticate(name, secret, &stored).await.unwrap_err();
			assert!(matches!(err, SessionError::Credential(_)));
		}
	}

	#[derive(Default)]
	struct CountingStrategy {
		hashes: AtomicUsize,
		verifies: AtomicUsize,
	}

	impl CredentialStrategy for CountingStrategy {
		fn hash(&self, secret: &str) -> Result<String> {
			self.hashes.fetch_add(1, Ordering::SeqCst);
			Ok(format!("plain:{secret}"))
		}

		fn verify(&self, secret: &str, stored: &str) -> Result<bool> {
			self.verifies.fetch_add(1, Ordering::SeqCst);
			Ok(stored == format!("plain:{secret}"))
		}
	}

	#[tokio::test]
	async fn test_unknown_name_still_verifies() {
		let dir = create_test_directory().await;
		dir.create_principal("alice", false, &[]).await.unwrap();
		let shared = Arc::new(dir.clone());
		let strategy = Arc::new(CountingStrategy::default());
		let binder = SessionBinder::new(shared.clone(), shared, strategy.clone());

		for _ in 0..3 {
			let err = binder
				.authenticate("nobody", "hunter2", "plain:hunter2")
				.await
				.unwrap_err();
			assert!(matches!(err, SessionError::Credential(_)));
		}
		assert_eq!(strategy.verifies.load(Ordering::SeqCst), 3);
		assert_eq!(strategy.hashes.load(Ordering::SeqCst), 1);

		binder
			.authenticate("alice", "hunter2", "plain:hunter2")
			.await
			.unwrap();
		assert_eq!(strategy.verifies.load(Ordering::SeqCst), 4);
	}
}
