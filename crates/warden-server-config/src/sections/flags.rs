// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag vocabulary configuration.
//!
//! The vocabulary is the set of flag names registered when a deployment
//! starts. `allow_auto_register = false` stops callers from growing it at
//! runtime by writing to a name nobody registered.

use serde::Deserialize;
use warden_authz_core::FlagName;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagsConfig {
	/// Validated names, in first-seen order, without duplicates.
	pub vocabulary: Vec<FlagName>,
	pub allow_auto_register: bool,
}

impl Default for FlagsConfig {
	fn default() -> Self {
		Self {
			vocabulary: Vec::new(),
			allow_auto_register: true,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagsConfigLayer {
	#[serde(default)]
	pub vocabulary: Option<Vec<String>>,
	#[serde(default)]
	pub allow_auto_register: Option<bool>,
}

impl FlagsConfigLayer {
	/// A later vocabulary replaces an earlier one; lists are not concatenated.
	pub fn merge(&mut self, other: FlagsConfigLayer) {
		if other.vocabulary.is_some() {
			self.vocabulary = other.vocabulary;
		}
		if other.allow_auto_register.is_some() {
			self.allow_auto_register = other.allow_auto_register;
		}
	}

	pub fn finalize(self) -> Result<FlagsConfig, ConfigError> {
		let mut vocabulary: Vec<FlagName> = Vec::new();
		for raw in self.vocabulary.unwrap_or_default() {
			let name = FlagName::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
				key: "flags.vocabulary".to_string(),
				message: e.to_string(),
			})?;
			if !vocabulary.contains(&name) {
				vocabulary.push(name);
			}
		}

		Ok(FlagsConfig {
			vocabulary,
			allow_auto_register: self.allow_auto_register.unwrap_or(true),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_defaults() {
		let config = FlagsConfigLayer::default().finalize().unwrap();
		assert!(config.vocabulary.is_empty());
		assert!(config.allow_auto_register);
	}

	#[test]
	fn test_vocabulary_is_deduplicated_in_order() {
		let layer = FlagsConfigLayer {
			vocabulary: Some(vec!["beta".into(), " admin ".into(), "beta".into()]),
			allow_auto_register: Some(false),
		};
		let config = layer.finalize().unwrap();

		let names: Vec<&str> = config.vocabulary.iter().map(|n| n.as_str()).collect();
		assert_eq!(names, vec!["beta", "admin"]);
		assert!(!config.allow_auto_register);
	}

	#[test]
	fn test_invalid_name_is_rejected() {
		let layer = FlagsConfigLayer {
			vocabulary: Some(vec!["Beta Users".into()]),
			allow_auto_register: None,
		};
		let err = layer.finalize().unwrap_err();
		assert!(matches!(
			err,
			ConfigError::InvalidValue { ref key, .. } if key == "flags.vocabulary"
		));
	}

	#[test]
	fn test_merge_replaces_vocabulary() {
		let mut base = FlagsConfigLayer {
			vocabulary: Some(vec!["beta".into()]),
			allow_auto_register: Some(false),
		};
		base.merge(FlagsConfigLayer {
			vocabulary: Some(vec!["admin".into()]),
			allow_auto_register: None,
		});

		assert_eq!(base.vocabulary, Some(vec!["admin".to_string()]));
		assert_eq!(base.allow_auto_register, Some(false));
	}

	proptest! {
		#[test]
		fn finalized_vocabulary_has_no_duplicates(
			names in prop::collection::vec("[a-z][a-z0-9_]{0,6}", 0..12)
		) {
			let layer = FlagsConfigLayer {
				vocabulary: Some(names.clone()),
				allow_auto_register: None,
			};
			let config = layer.finalize().unwrap();

			let mut seen = std::collections::BTreeSet::new();
			prop_assert!(config.vocabulary.iter().all(|n| seen.insert(n.clone())));
			prop_assert!(names
				.iter()
				.all(|raw| config.vocabulary.iter().any(|n| n.as_str() == raw)));
		}
	}
}
