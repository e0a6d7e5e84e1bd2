// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Column decoding shared by the stores. Ids and timestamps are stored as
//! TEXT (UUID strings and RFC 3339), booleans and distances as INTEGER.

use chrono::{DateTime, Utc};
use warden_authz_core::{FlagName, PrincipalId};

use crate::error::DbError;

pub(crate) fn parse_id(raw: &str, column: &str) -> Result<PrincipalId, DbError> {
	raw
		.parse()
		.map_err(|e| DbError::Internal(format!("Invalid {column}: {e}")))
}

pub(crate) fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, DbError> {
	DateTime::parse_from_rfc3339(raw)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("Invalid {column}: {e}")))
}

pub(crate) fn parse_flag_name(raw: String) -> Result<FlagName, DbError> {
	FlagName::parse(raw).map_err(|e| DbError::Internal(format!("Invalid stored flag name: {e}")))
}

pub(crate) fn parse_distance(raw: i64) -> Result<u32, DbError> {
	u32::try_from(raw).map_err(|_| DbError::Internal(format!("Invalid distance: {raw}")))
}
