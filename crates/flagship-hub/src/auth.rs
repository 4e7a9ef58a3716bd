// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! API key hashing and authentication.
//!
//! Keys are stored as Argon2 hashes; authentication narrows candidates by
//! the plaintext's lookup prefix and verifies against each hash. This is
//! O(candidates) but the prefix keeps that to a handful, and it runs once
//! per connection or cache miss, not per evaluation.

use argon2::{
	password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
	Argon2,
};
use chrono::Utc;

use flagship_core::ApiKey;

use crate::error::{HubError, Result};
use crate::repository::HubRepository;

/// Hashes an API key plaintext using Argon2.
pub fn hash_api_key(plaintext: &str) -> Result<String> {
	let salt = SaltString::generate(&mut OsRng);
	let argon2 = Argon2::default();

	argon2
		.hash_password(plaintext.as_bytes(), &salt)
		.map(|hash| hash.to_string())
		.map_err(|_| HubError::Internal("failed to hash API key".to_string()))
}

/// Verifies an API key plaintext against a stored hash.
pub fn verify_api_key(plaintext: &str, hash: &str) -> Result<bool> {
	let parsed_hash = PasswordHash::new(hash)
		.map_err(|_| HubError::Internal("invalid API key hash format".to_string()))?;

	Ok(Argon2::default()
		.verify_password(plaintext.as_bytes(), &parsed_hash)
		.is_ok())
}

/// Authenticates a plaintext key against the store. Returns the matching
/// key with `last_used_at` stamped, or `None` when nothing verifies.
pub async fn authenticate(repo: &dyn HubRepository, plaintext: &str) -> Result<Option<ApiKey>> {
	if ApiKey::parse_plaintext(plaintext).is_none() {
		return Ok(None);
	}

	let now = Utc::now();
	let candidates = repo
		.list_api_keys_by_prefix(&ApiKey::prefix_of(plaintext))
		.await?;

	for candidate in candidates {
		if !candidate.is_usable(now) {
			continue;
		}
		if verify_api_key(plaintext, &candidate.key_hash)? {
			repo.update_api_key_last_used(candidate.id).await?;
			return Ok(Some(candidate));
		}
	}

	Ok(None)
}
