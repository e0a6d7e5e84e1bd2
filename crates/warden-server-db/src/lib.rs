// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite storage for the Warden directory.
//!
//! Principals, flags, membership edges and the derived ancestor closure live
//! in one database. [`Directory`] is the entry point; the store modules hold
//! the queries and are driven through it.

pub mod directory;
pub mod error;
pub mod flag;
pub mod membership;
pub mod permission;
pub mod pool;
pub mod principal;
mod row;
pub mod schema;
pub mod testing;

pub use directory::{Directory, DirectoryTx, FlagPolicy};
pub use error::{DbError, Result};
pub use flag::FlagWrite;
pub use permission::PermissionResolver;
pub use pool::create_pool;
pub use principal::PrincipalStore;
pub use schema::run_migrations;
