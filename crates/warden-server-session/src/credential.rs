// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Credential hashing.
//!
//! The binder never sees how secrets are stored; it is handed a
//! [`CredentialStrategy`] and asks it to verify. [`Argon2Strategy`] stores
//! PHC strings (`$argon2id$v=19$...`).

use argon2::{
	password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
	Argon2,
};
#[cfg(test)]
use argon2::{Algorithm, Params, Version};

use crate::error::{Result, SessionError};

pub trait CredentialStrategy: Send + Sync {
	/// Hash a secret for storage.
	fn hash(&self, secret: &str) -> Result<String>;

	/// Check a secret against a stored hash. A malformed hash is an error,
	/// a mismatch is `Ok(false)`.
	fn verify(&self, secret: &str, stored: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Strategy;

impl CredentialStrategy for Argon2Strategy {
	fn hash(&self, secret: &str) -> Result<String> {
		let salt = SaltString::generate(&mut OsRng);
		argon2_instance()
			.hash_password(secret.as_bytes(), &salt)
			.map(|hash| hash.to_string())
			.map_err(|e| SessionError::Credential(format!("failed to hash secret: {e}")))
	}

	fn verify(&self, secret: &str, stored: &str) -> Result<bool> {
		let parsed = PasswordHash::new(stored)
			.map_err(|e| SessionError::Credential(format!("invalid stored hash: {e}")))?;
		Ok(argon2_instance()
			.verify_password(secret.as_bytes(), &parsed)
			.is_ok())
	}
}

/// Argon2id with the crate defaults; test builds use 1 MiB and one pass.
fn argon2_instance() -> Argon2<'static> {
	#[cfg(test)]
	{
		let params = Params::new(1024, 1, 1, None).expect("valid Argon2 params for tests");
		Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
	}

	#[cfg(not(test))]
	{
		Argon2::default()
	}
}
