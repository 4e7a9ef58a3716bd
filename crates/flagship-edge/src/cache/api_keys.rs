// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The API-key layer.
//!
//! Maps plaintext keys to their scope for O(1) request authentication.
//! Unknown keys are first verified locally against the hashed key records
//! delivered by sync (one Argon2 verify, then cached); the caller falls
//! back to the hub's auth endpoint when no record matches.

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

use flagship_core::{ApiKey, ApiKeyScope};

struct CachedKey {
	scope: ApiKeyScope,
	last_used: chrono::DateTime<Utc>,
}

struct Inner {
	/// Plaintext -> scope, bounded oldest-first.
	by_plaintext: HashMap<String, CachedKey>,
	order: VecDeque<String>,
	/// Hashed records from the sync snapshot, grouped by lookup prefix.
	records: HashMap<String, Vec<ApiKey>>,
}

/// Plaintext-keyed authentication cache.
pub struct ApiKeyCache {
	inner: RwLock<Inner>,
	max_keys: usize,
}

impl ApiKeyCache {
	pub fn new(max_keys: usize) -> Self {
		ApiKeyCache {
			inner: RwLock::new(Inner {
				by_plaintext: HashMap::new(),
				order: VecDeque::new(),
				records: HashMap::new(),
			}),
			max_keys,
		}
	}

	/// Replaces the hashed key records (from a sync snapshot). Cached
	/// plaintext entries are kept; their expiry still applies.
	pub async fn set_records(&self, keys: Vec<ApiKey>) {
		let mut records: HashMap<String, Vec<ApiKey>> = HashMap::new();
		for key in keys {
			records.entry(key.key_prefix.clone()).or_default().push(key);
		}
		self.inner.write().await.records = records;
	}

	/// Authenticates a plaintext against the cache and the synced hash
	/// records. `None` means the caller should consult the hub.
	pub async fn authenticate(&self, plaintext: &str) -> Option<ApiKeyScope> {
		let now = Utc::now();

		{
			let mut inner = self.inner.write().await;
			if let Some(cached) = inner.by_plaintext.get_mut(plaintext) {
				if cached.scope.expires_at.is_none_or(|exp| exp > now) {
					cached.last_used = now;
					return Some(cached.scope.clone());
				}
				inner.by_plaintext.remove(plaintext);
				inner.order.retain(|k| k != plaintext);
			}
		}

		// One-time Argon2 verification against synced records.
		let prefix = ApiKey::prefix_of(plaintext);
		let candidates = {
			let inner = self.inner.read().await;
			inner.records.get(&prefix).cloned().unwrap_or_default()
		};

		for candidate in candidates {
			if !candidate.is_usable(now) {
				continue;
			}
			if verify(plaintext, &candidate.key_hash) {
				let scope = ApiKeyScope::from(&candidate);
				self.insert(plaintext.to_string(), scope.clone()).await;
				debug!(prefix = %prefix, "api key verified against synced record");
				return Some(scope);
			}
		}

		None
	}

	/// Caches a scope for a plaintext, e.g. after the hub validated it.
	pub async fn insert(&self, plaintext: String, scope: ApiKeyScope) {
		let mut inner = self.inner.write().await;
		if !inner.by_plaintext.contains_key(&plaintext) {
			inner.order.push_back(plaintext.clone());
			while inner.by_plaintext.len() >= self.max_keys {
				let Some(oldest) = inner.order.pop_front() else {
					break;
				};
				inner.by_plaintext.remove(&oldest);
			}
		}
		inner.by_plaintext.insert(
			plaintext,
			CachedKey {
				scope,
				last_used: Utc::now(),
			},
		);
	}

	/// Drops expired plaintext entries.
	pub async fn sweep(&self) -> usize {
		let now = Utc::now();
		let mut inner = self.inner.write().await;
		let before = inner.by_plaintext.len();
		inner
			.by_plaintext
			.retain(|_, cached| cached.scope.expires_at.is_none_or(|exp| exp > now));
		let order: VecDeque<String> = inner
			.order
			.iter()
			.filter(|k| inner.by_plaintext.contains_key(*k))
			.cloned()
			.collect();
		inner.order = order;
		before - inner.by_plaintext.len()
	}

	pub async fn len(&self) -> usize {
		self.inner.read().await.by_plaintext.len()
	}
}

fn verify(plaintext: &str, hash: &str) -> bool {
	let Ok(parsed) = PasswordHash::new(hash) else {
		return false;
	};
	Argon2::default()
		.verify_password(plaintext.as_bytes(), &parsed)
		.is_ok()
}

#[cfg(test)]
mod tests {
	use super::*;
	use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
	use chrono::Duration;
	use flagship_core::{ApiKeyId, Permission};

	fn hash(plaintext: &str) -> String {
		let salt = SaltString::generate(&mut OsRng);
		Argon2::default()
			.hash_password(plaintext.as_bytes(), &salt)
			.unwrap()
			.to_string()
	}

	fn record(plaintext: &str, expires_in: Option<Duration>) -> ApiKey {
		ApiKey {
			id: ApiKeyId::new(),
			project: "web".to_string(),
			environment: "prod".to_string(),
			name: "edge key".to_string(),
			key_hash: hash(plaintext),
			key_prefix: ApiKey::prefix_of(plaintext),
			permissions: vec![Permission::Read],
			active: true,
			expires_at: expires_in.map(|d| Utc::now() + d),
			created_at: Utc::now(),
			last_used_at: None,
		}
	}

	fn scope() -> ApiKeyScope {
		ApiKeyScope {
			project: "web".to_string(),
			environment: "prod".to_string(),
			permissions: vec![Permission::Read],
			expires_at: None,
		}
	}

	#[tokio::test]
	async fn insert_then_authenticate_is_a_hit() {
		let cache = ApiKeyCache::new(16);
		cache.insert("fsk_prod_abc".to_string(), scope()).await;

		let found = cache.authenticate("fsk_prod_abc").await.unwrap();
		assert_eq!(found.environment, "prod");
		assert!(cache.authenticate("fsk_prod_other").await.is_none());
	}

	#[tokio::test]
	async fn authenticates_against_synced_records() {
		let cache = ApiKeyCache::new(16);
		let plaintext = ApiKey::generate_plaintext("prod");
		cache.set_records(vec![record(&plaintext, None)]).await;

		assert!(cache.authenticate(&plaintext).await.is_some());
		// Now cached as plaintext; a second call needs no verification.
		assert_eq!(cache.len().await, 1);
		assert!(cache.authenticate(&plaintext).await.is_some());
	}

	#[tokio::test]
	async fn expired_record_is_rejected() {
		let cache = ApiKeyCache::new(16);
		let plaintext = ApiKey::generate_plaintext("prod");
		cache
			.set_records(vec![record(&plaintext, Some(Duration::hours(-1)))])
			.await;

		assert!(cache.authenticate(&plaintext).await.is_none());
	}

	#[tokio::test]
	async fn expired_plaintext_entries_sweep() {
		let cache = ApiKeyCache::new(16);
		let mut expired = scope();
		expired.expires_at = Some(Utc::now() - Duration::hours(1));
		cache.insert("fsk_prod_old".to_string(), expired).await;
		cache.insert("fsk_prod_live".to_string(), scope()).await;

		assert!(cache.authenticate("fsk_prod_old").await.is_none());
		let swept = cache.sweep().await;
		assert_eq!(swept, 1);
		assert_eq!(cache.len().await, 1);
	}

	#[tokio::test]
	async fn size_never_exceeds_max_keys() {
		let cache = ApiKeyCache::new(2);
		for i in 0..5 {
			cache.insert(format!("fsk_prod_{i}"), scope()).await;
		}
		assert_eq!(cache.len().await, 2);
	}
}
