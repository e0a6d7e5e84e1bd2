// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core authorization model for Warden.
//!
//! This crate holds everything about principals, flags and group membership
//! that does not need a database:
//!
//! - [`types`]: id newtypes, [`Tristate`] flag values and validated [`FlagName`]s
//! - [`principal`]: the [`Principal`] record, [`MembershipEdge`] and flag definitions
//! - [`graph`]: the in-memory [`MembershipGraph`] and the ancestor [`Closure`]
//!   computed from it
//! - [`resolve`]: the nearest-wins / false-wins rule that turns inherited flag
//!   values into an effective permission
//! - [`error`]: the [`AuthzError`] taxonomy shared by every Warden crate
//!
//! The storage layer (`warden-server-db`) persists these types and calls the
//! same closure and resolution routines inside its transactions.

pub mod error;
pub mod graph;
pub mod principal;
pub mod resolve;
pub mod types;

pub use error::AuthzError;
pub use graph::{Closure, MembershipGraph};
pub use principal::{FlagDefinition, MembershipEdge, Principal, PrincipalRef};
pub use resolve::{explain, resolve, resolve_in_closure, Contribution, Resolution};
pub use types::{FlagName, PrincipalId, Tristate};
