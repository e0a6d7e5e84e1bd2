// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use warden_authz_core::PrincipalId;
use warden_server_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
	#[error(transparent)]
	Db(#[from] DbError),

	#[error("Principal {0} is a group and cannot log in")]
	GroupLogin(PrincipalId),

	#[error("Credential error: {0}")]
	Credential(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
