// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Principal records and the relations between them.
//!
//! This module provides:
//! - [`Principal`] - a user or group, with flag edits optionally staged in memory
//! - [`PrincipalRef`] - lookup key (id or name)
//! - [`MembershipEdge`] - "member belongs to group"
//! - [`FlagDefinition`] - an entry of the deployment's flag vocabulary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::AuthzError;
use crate::types::{FlagName, PrincipalId, Tristate};

/// Maximum length of a principal name in bytes.
pub const MAX_PRINCIPAL_NAME_LEN: usize = 255;

/// A user or a group.
///
/// `is_group` is fixed when the principal is created; the store rejects a
/// save that tries to flip it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
	/// Unique identifier for this principal.
	pub id: PrincipalId,

	/// Unique, case-sensitive name.
	pub name: String,

	/// Groups can have members; users can log in.
	pub is_group: bool,

	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,

	/// Last time a session was bound to this principal.
	pub last_used_at: Option<DateTime<Utc>>,

	#[serde(skip)]
	staged_flags: BTreeMap<FlagName, Tristate>,
}

impl Principal {
	/// Creates a new principal with a generated id and timestamps set to now.
	pub fn new(name: impl Into<String>, is_group: bool) -> Self {
		let now = Utc::now();
		Self {
			id: PrincipalId::generate(),
			name: name.into(),
			is_group,
			created_at: now,
			updated_at: now,
			last_used_at: None,
			staged_flags: BTreeMap::new(),
		}
	}

	/// Rebuilds a stored principal. Nothing is staged.
	pub fn from_parts(
		id: PrincipalId,
		name: impl Into<String>,
		is_group: bool,
		created_at: DateTime<Utc>,
		updated_at: DateTime<Utc>,
		last_used_at: Option<DateTime<Utc>>,
	) -> Self {
		Self {
			id,
			name: name.into(),
			is_group,
			created_at,
			updated_at,
			last_used_at,
			staged_flags: BTreeMap::new(),
		}
	}

	pub fn new_user(name: impl Into<String>) -> Self {
		Self::new(name, false)
	}

	pub fn new_group(name: impl Into<String>) -> Self {
		Self::new(name, true)
	}

	/// Records a flag edit on this in-memory record only.
	///
	/// Staged edits reach storage when the record is saved. `Tristate::Absent`
	/// stages a removal.
	pub fn stage_flag(&mut self, name: FlagName, value: impl Into<Tristate>) {
		self.staged_flags.insert(name, value.into());
	}

	pub fn staged_flags(&self) -> &BTreeMap<FlagName, Tristate> {
		&self.staged_flags
	}

	pub fn has_staged_flags(&self) -> bool {
		!self.staged_flags.is_empty()
	}

	/// Drops staged edits, typically after they were written.
	pub fn clear_staged_flags(&mut self) {
		self.staged_flags.clear();
	}

	/// Checks a principal name: non-empty, bounded, no control characters.
	pub fn validate_name(name: &str) -> Result<(), AuthzError> {
		let invalid = |reason: &str| AuthzError::InvalidName {
			kind: "principal name",
			reason: reason.to_string(),
		};

		if name.is_empty() {
			return Err(invalid("must not be empty"));
		}
		if name.len() > MAX_PRINCIPAL_NAME_LEN {
			return Err(invalid("is too long"));
		}
		if name.chars().any(char::is_control) {
			return Err(invalid("must not contain control characters"));
		}
		Ok(())
	}
}

/// Lookup key for a principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrincipalRef {
	Id(PrincipalId),
	Name(String),
}

impl From<PrincipalId> for PrincipalRef {
	fn from(id: PrincipalId) -> Self {
		PrincipalRef::Id(id)
	}
}

impl From<&str> for PrincipalRef {
	fn from(name: &str) -> Self {
		PrincipalRef::Name(name.to_string())
	}
}

impl From<String> for PrincipalRef {
	fn from(name: String) -> Self {
		PrincipalRef::Name(name)
	}
}

impl fmt::Display for PrincipalRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PrincipalRef::Id(id) => write!(f, "principal {id}"),
			PrincipalRef::Name(name) => write!(f, "principal '{name}'"),
		}
	}
}

/// A direct "member of" relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MembershipEdge {
	pub member_id: PrincipalId,
	pub group_id: PrincipalId,
}

impl MembershipEdge {
	pub fn new(member_id: PrincipalId, group_id: PrincipalId) -> Self {
		Self {
			member_id,
			group_id,
		}
	}
}

/// A registered flag name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagDefinition {
	pub name: FlagName,
	pub description: Option<String>,
	pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn flag(name: &str) -> FlagName {
		FlagName::parse(name).unwrap()
	}

	mod principal {
		use super::*;

		#[test]
		fn from_parts_keeps_stored_fields() {
			let id = PrincipalId::generate();
			let created = Utc::now() - chrono::Duration::days(3);
			let updated = created + chrono::Duration::hours(1);
			let p = Principal::from_parts(id, "staff", true, created, updated, Some(updated));

			assert_eq!(p.id, id);
			assert_eq!(p.name, "staff");
			assert!(p.is_group);
			assert_eq!(p.created_at, created);
			assert_eq!(p.updated_at, updated);
			assert_eq!(p.last_used_at, Some(updated));
			assert!(p.staged_flags().is_empty());
		}

		#[test]
		fn constructors_set_kind() {
			assert!(!Principal::new_user("alice").is_group);
			assert!(Principal::new_group("staff").is_group);
		}

		#[test]
		fn new_generates_unique_ids() {
			assert_ne!(Principal::new_user("a").id, Principal::new_user("a").id);
		}

		#[test]
		fn new_sets_timestamps() {
			let before = Utc::now();
			let p = Principal::new_user("alice");
			let after = Utc::now();

			assert!(p.created_at >= before && p.created_at <= after);
			assert_eq!(p.created_at, p.updated_at);
			assert!(p.last_used_at.is_none());
		}

		#[test]
		fn staging_keeps_latest_value_per_flag() {
			let mut p = Principal::new_user("alice");
			p.stage_flag(flag("beta"), true);
			p.stage_flag(flag("beta"), Tristate::Absent);
			p.stage_flag(flag("admin"), false);

			assert!(p.has_staged_flags());
			assert_eq!(p.staged_flags().get(&flag("beta")), Some(&Tristate::Absent));
			assert_eq!(p.staged_flags().get(&flag("admin")), Some(&Tristate::False));

			p.clear_staged_flags();
			assert!(!p.has_staged_flags());
		}
	}

	mod names {
		use super::*;

		#[test]
		fn names_are_case_sensitive_and_free_form() {
			assert!(Principal::validate_name("Alice Smith").is_ok());
			assert!(Principal::validate_name("alice").is_ok());
		}

		#[test]
		fn rejects_empty_and_control_chars() {
			assert!(Principal::validate_name("").is_err());
			assert!(Principal::validate_name("bad\nname").is_err());
			assert!(Principal::validate_name(&"x".repeat(MAX_PRINCIPAL_NAME_LEN + 1)).is_err());
		}
	}

	#[test]
	fn principal_ref_conversions() {
		let id = PrincipalId::generate();
		assert_eq!(PrincipalRef::from(id), PrincipalRef::Id(id));
		assert_eq!(
			PrincipalRef::from("staff"),
			PrincipalRef::Name("staff".to_string())
		);
		assert_eq!(PrincipalRef::from("staff").to_string(), "principal 'staff'");
	}
}
