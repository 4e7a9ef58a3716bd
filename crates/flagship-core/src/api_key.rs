// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! API keys scoping edge servers and SDK callers to a project and
//! environment.
//!
//! Plaintext keys have the shape `fsk_{environment}_{body}` where the body
//! is 32 hex chars. Only the Argon2 hash and a short lookup prefix are
//! stored; authentication verifies against the hash, never the plaintext.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Length of the stored lookup prefix (`fsk_` plus the first plaintext
/// chars). Narrows the Argon2 verification scan to a handful of candidates.
pub const KEY_PREFIX_LEN: usize = 12;

/// Unique identifier for an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKeyId(pub Uuid);

impl ApiKeyId {
	pub fn new() -> Self {
		ApiKeyId(Uuid::new_v4())
	}
}

impl Default for ApiKeyId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for ApiKeyId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// What an API key may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
	Read,
	Write,
	Admin,
}

impl fmt::Display for Permission {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Permission::Read => "read",
			Permission::Write => "write",
			Permission::Admin => "admin",
		};
		f.write_str(s)
	}
}

/// A stored API key. The plaintext is returned exactly once, at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
	pub id: ApiKeyId,
	/// Project scope, or "all".
	pub project: String,
	pub environment: String,
	pub name: String,
	/// Argon2 hash of the plaintext. Unique.
	pub key_hash: String,
	/// First [`KEY_PREFIX_LEN`] chars of the plaintext, for lookup.
	pub key_prefix: String,
	pub permissions: Vec<Permission>,
	pub active: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
	/// Generates a fresh plaintext key for an environment.
	pub fn generate_plaintext(environment: &str) -> String {
		let body = Uuid::new_v4().simple().to_string();
		format!("fsk_{environment}_{body}")
	}

	/// Splits a plaintext key into (environment, body) without touching
	/// the store. Returns `None` for malformed keys.
	pub fn parse_plaintext(plaintext: &str) -> Option<(String, String)> {
		let rest = plaintext.strip_prefix("fsk_")?;
		// The body never contains '_', so the last separator is unambiguous
		// even for environments with underscores in their name.
		let (environment, body) = rest.rsplit_once('_')?;
		if environment.is_empty() || body.is_empty() {
			return None;
		}
		Some((environment.to_string(), body.to_string()))
	}

	/// Lookup prefix for a plaintext key.
	pub fn prefix_of(plaintext: &str) -> String {
		plaintext.chars().take(KEY_PREFIX_LEN).collect()
	}

	/// True when the key can authenticate right now.
	pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
		self.active && self.expires_at.is_none_or(|exp| exp > now)
	}

	pub fn has_permission(&self, permission: Permission) -> bool {
		self.permissions.contains(&permission) || self.permissions.contains(&Permission::Admin)
	}

	/// True when this key's scope covers the given project.
	pub fn covers_project(&self, project: &str) -> bool {
		self.project == "all" || self.project == project
	}
}

/// The scope handed back by `/edge/auth` and cached on edges. Carries no
/// hash material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyScope {
	pub project: String,
	pub environment: String,
	pub permissions: Vec<Permission>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_at: Option<DateTime<Utc>>,
}

impl From<&ApiKey> for ApiKeyScope {
	fn from(key: &ApiKey) -> Self {
		ApiKeyScope {
			project: key.project.clone(),
			environment: key.environment.clone(),
			permissions: key.permissions.clone(),
			expires_at: key.expires_at,
		}
	}
}
