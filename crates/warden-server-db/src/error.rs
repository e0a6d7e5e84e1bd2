// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use warden_authz_core::AuthzError;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error(transparent)]
	Authz(#[from] AuthzError),

	#[error("Storage failure: {0}")]
	Storage(#[from] sqlx::Error),

	#[error("Internal: {0}")]
	Internal(String),
}

impl DbError {
	/// The authorization failure behind this error, if it is one.
	pub fn as_authz(&self) -> Option<&AuthzError> {
		match self {
			DbError::Authz(e) => Some(e),
			_ => None,
		}
	}

	pub fn is_storage_failure(&self) -> bool {
		matches!(self, DbError::Storage(_))
	}
}

pub type Result<T> = std::result::Result<T, DbError>;

/// True if the error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
	matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
