// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission resolution across an ancestor closure.
//!
//! Every ancestor that has the flag set contributes `(distance, value)`.
//! The contributions at the smallest distance decide: if they agree, that
//! value wins; if they disagree, the result is `False`. A flag set directly
//! on the principal sits at distance 0 and therefore always wins. With no
//! contributions the permission is `Absent`.

use serde::{Deserialize, Serialize};

use crate::graph::Closure;
use crate::types::{PrincipalId, Tristate};

/// A flag value found on one ancestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
	pub ancestor_id: PrincipalId,
	pub distance: u32,
	pub value: bool,
}

/// The outcome of a resolution together with the contributions that decided it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
	pub value: Tristate,
	/// Contributions at the winning distance, ordered by ancestor id.
	pub deciding: Vec<Contribution>,
}

/// Resolves a permission from `(distance, value)` pairs.
pub fn resolve(contributions: impl IntoIterator<Item = (u32, bool)>) -> Tristate {
	let mut best: Option<(u32, bool)> = None;

	for (distance, value) in contributions {
		best = match best {
			None => Some((distance, value)),
			Some((d, _)) if distance < d => Some((distance, value)),
			Some((d, current)) if distance == d => Some((d, current && value)),
			keep => keep,
		};
	}

	best.map(|(_, value)| Tristate::from(value))
		.unwrap_or(Tristate::Absent)
}

/// Resolves a permission and keeps the deciding contributions.
pub fn explain(contributions: impl IntoIterator<Item = Contribution>) -> Resolution {
	let contributions: Vec<Contribution> = contributions.into_iter().collect();
	let Some(nearest) = contributions.iter().map(|c| c.distance).min() else {
		return Resolution {
			value: Tristate::Absent,
			deciding: Vec::new(),
		};
	};

	let mut deciding: Vec<Contribution> = contributions
		.into_iter()
		.filter(|c| c.distance == nearest)
		.collect();
	deciding.sort_by_key(|c| c.ancestor_id);

	Resolution {
		value: resolve(deciding.iter().map(|c| (c.distance, c.value))),
		deciding,
	}
}

/// Resolves using a closure and a lookup of the flag on each ancestor.
///
/// Used where the flag values are already in memory; the database layer
/// fetches contributions with a single join instead.
pub fn resolve_in_closure<F>(closure: &Closure, mut flag_on: F) -> Tristate
where
	F: FnMut(&PrincipalId) -> Tristate,
{
	resolve(
		closure
			.iter()
			.filter_map(|(ancestor, distance)| {
				flag_on(&ancestor).as_option().map(|v| (distance, v))
			}),
	)
}
