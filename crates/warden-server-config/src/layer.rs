// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

use crate::sections::{DatabaseConfigLayer, FlagsConfigLayer, LoggingConfigLayer};

/// One source's view of the configuration. Unset sections stay `None`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WardenConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub flags: Option<FlagsConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl WardenConfigLayer {
	/// Overlay `other` on top of `self`; fields set in `other` win.
	pub fn merge(&mut self, other: WardenConfigLayer) {
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.flags, other.flags, FlagsConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_section<T>(current: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	match (current.as_mut(), other) {
		(Some(existing), Some(other)) => merge(existing, other),
		(None, Some(other)) => *current = Some(other),
		(_, None) => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_later_layer_overrides_set_fields_only() {
		let mut base = WardenConfigLayer {
			database: Some(DatabaseConfigLayer {
				url: Some("sqlite:/a.db".to_string()),
			}),
			logging: Some(LoggingConfigLayer {
				level: Some("debug".to_string()),
			}),
			..Default::default()
		};
		base.merge(WardenConfigLayer {
			database: Some(DatabaseConfigLayer {
				url: Some("sqlite:/b.db".to_string()),
			}),
			logging: Some(LoggingConfigLayer { level: None }),
			..Default::default()
		});

		assert_eq!(
			base.database.and_then(|d| d.url).as_deref(),
			Some("sqlite:/b.db")
		);
		assert_eq!(base.logging.and_then(|l| l.level).as_deref(), Some("debug"));
		assert!(base.flags.is_none());
	}

	#[test]
	fn test_parses_partial_toml() {
		let layer: WardenConfigLayer = toml::from_str(
			r#"
			[flags]
			vocabulary = ["beta", "admin"]
			"#,
		)
		.unwrap();

		let flags = layer.flags.unwrap();
		assert_eq!(flags.vocabulary.unwrap(), vec!["beta", "admin"]);
		assert!(flags.allow_auto_register.is_none());
		assert!(layer.database.is_none());
	}

	#[test]
	fn test_rejects_unknown_section() {
		let result: Result<WardenConfigLayer, _> = toml::from_str("[http]\nport = 1\n");
		assert!(result.is_err());
	}
}
