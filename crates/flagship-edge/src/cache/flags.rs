// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The preloaded flag layer.
//!
//! Read-mostly map from (flag key, environment) to a pre-processed flag.
//! Lookups take the read lock for an O(1) probe; sync updates take the
//! write lock only long enough to swap an entry.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use flagship_core::{Flag, FlagUpdate, UpdateOp};

/// A flag prepared for the evaluation hot path: the default kept both raw
/// (for direct response assembly) and parsed, and targeting presence
/// precomputed.
#[derive(Debug, Clone)]
pub struct CachedFlag {
	pub flag: Flag,
	/// Pre-serialized default value, avoiding per-request serialization.
	pub default_raw: String,
	pub has_targeting: bool,
}

impl CachedFlag {
	pub fn new(flag: Flag) -> Self {
		CachedFlag {
			default_raw: flag.default_value.to_string(),
			has_targeting: flag.has_targeting(),
			flag,
		}
	}
}

type Key = (String, String);

struct Inner {
	flags: HashMap<Key, Arc<CachedFlag>>,
	/// Insertion order for oldest-first eviction.
	order: VecDeque<Key>,
	last_updated: Option<DateTime<Utc>>,
}

/// Map of (flag key, environment) to preloaded flags.
pub struct FlagCache {
	inner: RwLock<Inner>,
	max_flags: usize,
	hits: AtomicU64,
	misses: AtomicU64,
}

impl FlagCache {
	pub fn new(max_flags: usize) -> Self {
		FlagCache {
			inner: RwLock::new(Inner {
				flags: HashMap::new(),
				order: VecDeque::new(),
				last_updated: None,
			}),
			max_flags,
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
		}
	}

	/// O(1) lock-read lookup.
	pub async fn get(&self, flag_key: &str, environment: &str) -> Option<Arc<CachedFlag>> {
		let inner = self.inner.read().await;
		let found = inner
			.flags
			.get(&(flag_key.to_string(), environment.to_string()))
			.cloned();
		drop(inner);

		match &found {
			Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
			None => self.misses.fetch_add(1, Ordering::Relaxed),
		};
		found
	}

	/// Applies one sync update. Idempotent: the same update twice leaves
	/// the cache unchanged. Returns the flag key so callers can flush
	/// dependent memo entries.
	pub async fn apply_update(&self, update: &FlagUpdate) {
		let key = (update.flag_key.clone(), update.environment.clone());
		let mut inner = self.inner.write().await;

		match update.action {
			UpdateOp::Create | UpdateOp::Update => {
				let Some(flag) = &update.flag else {
					debug!(flag_key = %update.flag_key, "update without flag body ignored");
					return;
				};
				// Archived bodies are tombstones however they arrive.
				if flag.is_archived() {
					remove_entry(&mut inner, &key);
				} else {
					insert_entry(&mut inner, key, CachedFlag::new(flag.clone()), self.max_flags);
				}
			}
			UpdateOp::Delete => {
				remove_entry(&mut inner, &key);
			}
		}
		inner.last_updated = Some(Utc::now());
	}

	/// Atomically replaces every flag for one environment.
	pub async fn bulk_replace(&self, environment: &str, flags: Vec<Flag>) {
		let mut inner = self.inner.write().await;

		inner.flags.retain(|(_, env), _| env != environment);
		inner.order.retain(|(_, env)| env != environment);

		for flag in flags {
			if flag.is_archived() {
				continue;
			}
			let key = (flag.key.clone(), flag.environment.clone());
			insert_entry(&mut inner, key, CachedFlag::new(flag), self.max_flags);
		}
		inner.last_updated = Some(Utc::now());
	}

	pub async fn len(&self) -> usize {
		self.inner.read().await.flags.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.inner.read().await.flags.is_empty()
	}

	pub async fn last_updated(&self) -> Option<DateTime<Utc>> {
		self.inner.read().await.last_updated
	}

	pub fn hits(&self) -> u64 {
		self.hits.load(Ordering::Relaxed)
	}

	pub fn misses(&self) -> u64 {
		self.misses.load(Ordering::Relaxed)
	}
}

fn insert_entry(inner: &mut Inner, key: Key, cached: CachedFlag, max_flags: usize) {
	if !inner.flags.contains_key(&key) {
		inner.order.push_back(key.clone());
		// Oldest-first eviction keeps the layer under its bound.
		while inner.flags.len() >= max_flags {
			let Some(oldest) = inner.order.pop_front() else {
				break;
			};
			inner.flags.remove(&oldest);
		}
	}
	inner.flags.insert(key, Arc::new(cached));
}

fn remove_entry(inner: &mut Inner, key: &Key) {
	inner.flags.remove(key);
	inner.order.retain(|k| k != key);
}

#[cfg(test)]
mod tests {
	use super::*;
	use flagship_core::FlagKind;

	fn flag(key: &str, environment: &str) -> Flag {
		let mut flag = Flag::new("web", key, environment, FlagKind::Boolean);
		flag.enabled = true;
		flag
	}

	#[tokio::test]
	async fn get_tracks_hits_and_misses() {
		let cache = FlagCache::new(16);
		cache.bulk_replace("prod", vec![flag("known.flag", "prod")]).await;

		assert!(cache.get("known.flag", "prod").await.is_some());
		assert!(cache.get("unknown.flag", "prod").await.is_none());
		assert!(cache.get("known.flag", "dev").await.is_none());

		assert_eq!(cache.hits(), 1);
		assert_eq!(cache.misses(), 2);
	}

	#[tokio::test]
	async fn apply_update_is_idempotent() {
		let cache = FlagCache::new(16);
		let update = FlagUpdate::update(flag("idem.flag", "prod"));

		cache.apply_update(&update).await;
		let first = cache.get("idem.flag", "prod").await.unwrap();

		cache.apply_update(&update).await;
		let second = cache.get("idem.flag", "prod").await.unwrap();

		assert_eq!(first.flag, second.flag);
		assert_eq!(cache.len().await, 1);
	}

	#[tokio::test]
	async fn delete_removes_entry() {
		let cache = FlagCache::new(16);
		cache.bulk_replace("prod", vec![flag("gone.flag", "prod")]).await;

		cache
			.apply_update(&FlagUpdate::delete("web", "gone.flag", "prod"))
			.await;
		assert!(cache.get("gone.flag", "prod").await.is_none());

		// Deleting again is harmless.
		cache
			.apply_update(&FlagUpdate::delete("web", "gone.flag", "prod"))
			.await;
		assert_eq!(cache.len().await, 0);
	}

	#[tokio::test]
	async fn archived_body_acts_as_tombstone() {
		let cache = FlagCache::new(16);
		cache.bulk_replace("prod", vec![flag("tomb.flag", "prod")]).await;

		let mut archived = flag("tomb.flag", "prod");
		archived.archived_at = Some(Utc::now());
		cache.apply_update(&FlagUpdate::update(archived)).await;

		assert!(cache.get("tomb.flag", "prod").await.is_none());
	}

	#[tokio::test]
	async fn bulk_replace_swaps_only_one_environment() {
		let cache = FlagCache::new(16);
		cache.bulk_replace("prod", vec![flag("a.flag", "prod")]).await;
		cache.bulk_replace("dev", vec![flag("b.flag", "dev")]).await;

		cache.bulk_replace("prod", vec![flag("c.flag", "prod")]).await;

		assert!(cache.get("a.flag", "prod").await.is_none());
		assert!(cache.get("c.flag", "prod").await.is_some());
		assert!(cache.get("b.flag", "dev").await.is_some());
	}

	#[tokio::test]
	async fn size_never_exceeds_max_flags() {
		let cache = FlagCache::new(3);
		for i in 0..10 {
			cache
				.apply_update(&FlagUpdate::create(flag(&format!("flag.{i}"), "prod")))
				.await;
		}

		assert_eq!(cache.len().await, 3);
		// Oldest evicted first.
		assert!(cache.get("flag.0", "prod").await.is_none());
		assert!(cache.get("flag.9", "prod").await.is_some());
	}

	#[tokio::test]
	async fn cached_flag_preserializes_default() {
		let mut f = flag("raw.flag", "prod");
		f.default_value = serde_json::json!({"mode": "dark"});
		let cached = CachedFlag::new(f);

		assert_eq!(cached.default_raw, r#"{"mode":"dark"}"#);
		assert!(!cached.has_targeting);
	}
}
