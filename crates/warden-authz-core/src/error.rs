// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::types::PrincipalId;

/// Typed failures of the authorization model.
///
/// Storage failures are not part of this enum; the database layer wraps it
/// and adds its own variant so callers can tell a rejected mutation apart
/// from a failing store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Principal name already in use: {0}")]
	DuplicateName(String),

	#[error("Adding {member} to {group} would create a membership cycle")]
	Cycle {
		member: PrincipalId,
		group: PrincipalId,
	},

	#[error("Principal {0} cannot be a member of itself")]
	SelfReference(PrincipalId),

	#[error("Principal {0} is not a group")]
	NotAGroup(PrincipalId),

	#[error("Flag is not registered: {0}")]
	UnknownFlag(String),

	#[error("Attribute cannot change after creation: {0}")]
	ImmutableAttribute(&'static str),

	#[error("Invalid {kind}: {reason}")]
	InvalidName { kind: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, AuthzError>;
