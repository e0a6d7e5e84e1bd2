// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Membership graph and ancestor closure.
//!
//! The graph stores direct edges only. The closure of a principal maps every
//! ancestor (the principal itself included, at distance 0) to the minimum
//! number of hops needed to reach it. Closures are always recomputed from the
//! edges by breadth-first expansion; they are never patched in place, because
//! removing an edge can leave another path that justifies the same ancestor
//! at a different distance.

use serde::{Deserialize, Serialize};
use std::collections::{btree_map::Entry, BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::error::AuthzError;
use crate::principal::MembershipEdge;
use crate::types::PrincipalId;

/// Ancestors of one principal with their minimum hop distance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
	principal_id: PrincipalId,
	distances: BTreeMap<PrincipalId, u32>,
}

impl Closure {
	/// Builds a closure from stored distances.
	///
	/// The principal's own zero-distance entry is always present afterwards.
	pub fn from_distances(
		principal_id: PrincipalId,
		distances: impl IntoIterator<Item = (PrincipalId, u32)>,
	) -> Self {
		let mut distances: BTreeMap<_, _> = distances.into_iter().collect();
		distances.insert(principal_id, 0);
		Self {
			principal_id,
			distances,
		}
	}

	pub fn principal_id(&self) -> PrincipalId {
		self.principal_id
	}

	pub fn distance(&self, ancestor: &PrincipalId) -> Option<u32> {
		self.distances.get(ancestor).copied()
	}

	pub fn contains(&self, ancestor: &PrincipalId) -> bool {
		self.distances.contains_key(ancestor)
	}

	/// Number of entries, the principal itself included.
	pub fn ancestor_count(&self) -> usize {
		self.distances.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = (PrincipalId, u32)> + '_ {
		self.distances.iter().map(|(id, d)| (*id, *d))
	}

	/// Ancestors other than the principal itself.
	pub fn proper_ancestors(&self) -> impl Iterator<Item = (PrincipalId, u32)> + '_ {
		self.iter().filter(move |(id, _)| *id != self.principal_id)
	}

	/// Entries ordered by distance, ties broken by id.
	pub fn by_distance(&self) -> Vec<(PrincipalId, u32)> {
		let mut entries: Vec<_> = self.iter().collect();
		entries.sort_by_key(|(id, d)| (*d, *id));
		entries
	}

	pub fn into_map(self) -> BTreeMap<PrincipalId, u32> {
		self.distances
	}
}

/// Direct membership edges, indexed both ways.
#[derive(Debug, Clone, Default)]
pub struct MembershipGraph {
	groups: HashMap<PrincipalId, BTreeSet<PrincipalId>>,
	members: HashMap<PrincipalId, BTreeSet<PrincipalId>>,
}

impl MembershipGraph {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builds a graph from stored edges without validating them.
	pub fn from_edges(edges: impl IntoIterator<Item = MembershipEdge>) -> Self {
		let mut graph = Self::new();
		for edge in edges {
			graph.insert_edge(edge);
		}
		graph
	}

	/// Inserts an edge without any checks. Returns false if it was present.
	pub fn insert_edge(&mut self, edge: MembershipEdge) -> bool {
		self
			.members
			.entry(edge.group_id)
			.or_default()
			.insert(edge.member_id);
		self
			.groups
			.entry(edge.member_id)
			.or_default()
			.insert(edge.group_id)
	}

	/// Removes an edge. Returns false if it was absent.
	pub fn remove_edge(&mut self, edge: &MembershipEdge) -> bool {
		if let Some(members) = self.members.get_mut(&edge.group_id) {
			members.remove(&edge.member_id);
		}
		self
			.groups
			.get_mut(&edge.member_id)
			.map(|groups| groups.remove(&edge.group_id))
			.unwrap_or(false)
	}

	pub fn contains_edge(&self, edge: &MembershipEdge) -> bool {
		self
			.groups
			.get(&edge.member_id)
			.is_some_and(|groups| groups.contains(&edge.group_id))
	}

	/// Groups the principal is a direct member of.
	pub fn groups_of(&self, member: &PrincipalId) -> impl Iterator<Item = &PrincipalId> {
		self.groups.get(member).into_iter().flatten()
	}

	/// Direct members of a group.
	pub fn members_of(&self, group: &PrincipalId) -> impl Iterator<Item = &PrincipalId> {
		self.members.get(group).into_iter().flatten()
	}

	pub fn edge_count(&self) -> usize {
		self.groups.values().map(BTreeSet::len).sum()
	}

	/// Computes the ancestor closure of `principal` by breadth-first expansion.
	///
	/// BFS visits each ancestor first along a shortest path, so the first
	/// distance recorded is the minimum.
	pub fn closure_of(&self, principal: PrincipalId) -> Closure {
		Closure {
			principal_id: principal,
			distances: self.expand(principal, |id| self.groups_of(id)),
		}
	}

	/// Everything that has `principal` in its closure, with the distance from
	/// that descendant up to `principal`. Includes `principal` at 0.
	pub fn descendants_of(&self, principal: PrincipalId) -> BTreeMap<PrincipalId, u32> {
		self.expand(principal, |id| self.members_of(id))
	}

	fn expand<'a, F, I>(&'a self, start: PrincipalId, next: F) -> BTreeMap<PrincipalId, u32>
	where
		F: Fn(&PrincipalId) -> I,
		I: Iterator<Item = &'a PrincipalId>,
	{
		let mut distances = BTreeMap::from([(start, 0)]);
		let mut queue = VecDeque::from([start]);

		while let Some(current) = queue.pop_front() {
			let hop = distances[&current] + 1;
			for neighbour in next(&current) {
				if let Entry::Vacant(slot) = distances.entry(*neighbour) {
					slot.insert(hop);
					queue.push_back(*neighbour);
				}
			}
		}

		distances
	}

	/// Checks that adding `member -> group` keeps the graph acyclic.
	///
	/// Group-ness of the target is a property of the principal record and is
	/// checked by the store.
	pub fn check_edge(&self, edge: &MembershipEdge) -> Result<(), AuthzError> {
		if edge.member_id == edge.group_id {
			return Err(AuthzError::SelfReference(edge.member_id));
		}
		if self.closure_of(edge.group_id).contains(&edge.member_id) {
			return Err(AuthzError::Cycle {
				member: edge.member_id,
				group: edge.group_id,
			});
		}
		Ok(())
	}

	/// Validates and inserts an edge. Re-adding an existing edge is a no-op
	/// that returns `Ok(false)`.
	pub fn try_insert_edge(&mut self, edge: MembershipEdge) -> Result<bool, AuthzError> {
		if self.contains_edge(&edge) {
			return Ok(false);
		}
		self.check_edge(&edge)?;
		Ok(self.insert_edge(edge))
	}
}
