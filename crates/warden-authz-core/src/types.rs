// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Foundational value types for the authorization model.
//!
//! - **ID newtypes**: [`PrincipalId`] wraps a UUID so principal ids cannot be
//!   confused with other UUIDs flowing through the server
//! - **Flag values**: [`Tristate`] distinguishes an explicit `false` from a flag
//!   that was never set
//! - **Flag names**: [`FlagName`] only admits names from the deployment's
//!   naming rules

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AuthzError;

// =============================================================================
// ID Newtypes
// =============================================================================

macro_rules! define_id_type {
	($name:ident, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			/// Create a new ID from a UUID.
			pub fn new(id: Uuid) -> Self {
				Self(id)
			}

			/// Generate a new random ID.
			pub fn generate() -> Self {
				Self(Uuid::new_v4())
			}

			/// Get the inner UUID value.
			pub fn into_inner(self) -> Uuid {
				self.0
			}

			/// Get a reference to the inner UUID.
			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl FromStr for $name {
			type Err = uuid::Error;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Uuid::parse_str(s).map(Self)
			}
		}

		impl From<Uuid> for $name {
			fn from(id: Uuid) -> Self {
				Self(id)
			}
		}

		impl From<$name> for Uuid {
			fn from(id: $name) -> Self {
				id.0
			}
		}
	};
}

define_id_type!(PrincipalId, "Unique identifier for a principal (user or group).");

// =============================================================================
// Tristate
// =============================================================================

/// Value of a flag on a principal, or of a resolved permission.
///
/// `Absent` means no row exists. It is not the same as `False`: an absent
/// flag lets an ancestor's value through, an explicit `False` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tristate {
	True,
	False,
	#[default]
	Absent,
}

impl Tristate {
	pub fn as_option(self) -> Option<bool> {
		match self {
			Tristate::True => Some(true),
			Tristate::False => Some(false),
			Tristate::Absent => None,
		}
	}

	/// Returns true only for an explicit `True`.
	pub fn is_true(self) -> bool {
		self == Tristate::True
	}

	pub fn is_absent(self) -> bool {
		self == Tristate::Absent
	}
}

impl From<bool> for Tristate {
	fn from(value: bool) -> Self {
		if value {
			Tristate::True
		} else {
			Tristate::False
		}
	}
}

impl From<Option<bool>> for Tristate {
	fn from(value: Option<bool>) -> Self {
		value.map(Tristate::from).unwrap_or(Tristate::Absent)
	}
}

impl From<Tristate> for Option<bool> {
	fn from(value: Tristate) -> Self {
		value.as_option()
	}
}

impl fmt::Display for Tristate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Tristate::True => write!(f, "true"),
			Tristate::False => write!(f, "false"),
			Tristate::Absent => write!(f, "absent"),
		}
	}
}

// =============================================================================
// Flag names
// =============================================================================

/// Maximum length of a flag name.
pub const MAX_FLAG_NAME_LEN: usize = 64;

/// A validated flag name.
///
/// Names start with a lowercase ASCII letter and continue with lowercase
/// letters, digits, `_`, `-` or `.`, up to [`MAX_FLAG_NAME_LEN`] characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FlagName(String);

impl FlagName {
	pub fn parse(name: impl Into<String>) -> Result<Self, AuthzError> {
		let name = name.into();
		validate_flag_name(&name)?;
		Ok(Self(name))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

fn validate_flag_name(name: &str) -> Result<(), AuthzError> {
	let invalid = |reason: String| AuthzError::InvalidName {
		kind: "flag name",
		reason,
	};

	let first = name
		.chars()
		.next()
		.ok_or_else(|| invalid("must not be empty".to_string()))?;
	if name.len() > MAX_FLAG_NAME_LEN {
		return Err(invalid(format!(
			"must be at most {MAX_FLAG_NAME_LEN} characters"
		)));
	}
	if !first.is_ascii_lowercase() {
		return Err(invalid(format!("'{name}' must start with a lowercase letter")));
	}
	if let Some(c) = name
		.chars()
		.find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.')))
	{
		return Err(invalid(format!("'{name}' contains '{c}'")));
	}
	Ok(())
}

impl fmt::Display for FlagName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for FlagName {
	type Err = AuthzError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl TryFrom<String> for FlagName {
	type Error = AuthzError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(value)
	}
}

impl From<FlagName> for String {
	fn from(name: FlagName) -> Self {
		name.0
	}
}

impl AsRef<str> for FlagName {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	mod principal_id {
		use super::*;

		#[test]
		fn display_round_trips_through_from_str() {
			let id = PrincipalId::generate();
			let parsed: PrincipalId = id.to_string().parse().unwrap();
			assert_eq!(parsed, id);
		}

		#[test]
		fn serializes_as_bare_uuid() {
			let id = PrincipalId::generate();
			let json = serde_json::to_string(&id).unwrap();
			assert_eq!(json, format!("\"{}\"", id.as_uuid()));
		}

		#[test]
		fn rejects_garbage() {
			assert!("not-a-uuid".parse::<PrincipalId>().is_err());
		}
	}

	mod tristate {
		use super::*;

		#[test]
		fn default_is_absent() {
			assert_eq!(Tristate::default(), Tristate::Absent);
		}

		#[test]
		fn option_conversions() {
			assert_eq!(Tristate::from(Some(true)), Tristate::True);
			assert_eq!(Tristate::from(Some(false)), Tristate::False);
			assert_eq!(Tristate::from(None), Tristate::Absent);
			assert_eq!(Option::<bool>::from(Tristate::False), Some(false));
		}

		#[test]
		fn only_true_is_true() {
			assert!(Tristate::True.is_true());
			assert!(!Tristate::False.is_true());
			assert!(!Tristate::Absent.is_true());
		}

		#[test]
		fn serde_uses_snake_case() {
			assert_eq!(serde_json::to_string(&Tristate::Absent).unwrap(), "\"absent\"");
		}
	}

	mod flag_name {
		use super::*;

		#[test]
		fn accepts_typical_names() {
			for name in ["beta", "can_login", "ui.dark-mode", "v2"] {
				assert!(FlagName::parse(name).is_ok(), "{name} should be valid");
			}
		}

		#[test]
		fn rejects_bad_names() {
			for name in ["", "Beta", "1st", "_x", "has space", "emoji🙂"] {
				assert!(
					matches!(
						FlagName::parse(name),
						Err(AuthzError::InvalidName {
							kind: "flag name",
							..
						})
					),
					"{name} should be rejected"
				);
			}
		}

		#[test]
		fn rejects_overlong_names() {
			let name = "a".repeat(MAX_FLAG_NAME_LEN + 1);
			assert!(FlagName::parse(name).is_err());
		}

		#[test]
		fn deserialization_validates() {
			let ok: FlagName = serde_json::from_str("\"beta\"").unwrap();
			assert_eq!(ok.as_str(), "beta");
			assert!(serde_json::from_str::<FlagName>("\"Beta\"").is_err());
		}

		proptest! {
			#[test]
			fn generated_valid_names_parse(name in "[a-z][a-z0-9_.-]{0,63}") {
				let parsed = FlagName::parse(name.clone()).unwrap();
				prop_assert_eq!(parsed.as_str(), name.as_str());
			}
		}
	}
}
