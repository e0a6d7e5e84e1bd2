// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session binding for Warden.
//!
//! Turns an authenticated identity into a [`SessionUser`] that can answer
//! "does this user have permission X?" against the directory. Secrets are
//! checked through an injected [`CredentialStrategy`].

pub mod binding;
pub mod credential;
pub mod error;
pub mod service;

pub use binding::{AncestryEntry, SessionBinder, SessionUser};
pub use credential::{Argon2Strategy, CredentialStrategy};
pub use error::{Result, SessionError};
pub use service::open_directory;
