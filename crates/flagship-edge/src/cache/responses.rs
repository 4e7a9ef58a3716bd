// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The response-memo layer.
//!
//! Maps request fingerprints to pre-serialized response bytes with an
//! absolute expiry. Entries for a flag are flushed the moment an update
//! for that flag is applied, which bounds staleness to the sync latency
//! rather than the memo TTL.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct MemoEntry {
	/// The flag this response belongs to, for flush-on-update.
	flag_key: String,
	bytes: Vec<u8>,
	expires_at: Instant,
}

struct Inner {
	entries: HashMap<String, MemoEntry>,
	order: VecDeque<String>,
}

/// Fingerprint-keyed memo of serialized evaluation responses.
pub struct ResponseCache {
	inner: RwLock<Inner>,
	ttl: Duration,
	max_responses: usize,
	hits: AtomicU64,
	misses: AtomicU64,
}

impl ResponseCache {
	pub fn new(max_responses: usize, ttl: Duration) -> Self {
		ResponseCache {
			inner: RwLock::new(Inner {
				entries: HashMap::new(),
				order: VecDeque::new(),
			}),
			ttl,
			max_responses,
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
		}
	}

	/// Returns the memoized bytes when present and unexpired.
	pub async fn get(&self, fingerprint: &str) -> Option<Vec<u8>> {
		let now = Instant::now();
		let inner = self.inner.read().await;
		let found = inner
			.entries
			.get(fingerprint)
			.filter(|entry| entry.expires_at > now)
			.map(|entry| entry.bytes.clone());
		drop(inner);

		match &found {
			Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
			None => self.misses.fetch_add(1, Ordering::Relaxed),
		};
		found
	}

	/// Memoizes response bytes under a fingerprint.
	pub async fn put(&self, fingerprint: String, flag_key: String, bytes: Vec<u8>) {
		let mut inner = self.inner.write().await;
		if !inner.entries.contains_key(&fingerprint) {
			inner.order.push_back(fingerprint.clone());
			while inner.entries.len() >= self.max_responses {
				let Some(oldest) = inner.order.pop_front() else {
					break;
				};
				inner.entries.remove(&oldest);
			}
		}
		inner.entries.insert(
			fingerprint,
			MemoEntry {
				flag_key,
				bytes,
				expires_at: Instant::now() + self.ttl,
			},
		);
	}

	/// Flushes every entry belonging to a flag. Called on each applied
	/// update so stale memoized responses never outlive a change.
	pub async fn invalidate_flag(&self, flag_key: &str) -> usize {
		let mut inner = self.inner.write().await;
		let before = inner.entries.len();
		inner.entries.retain(|_, entry| entry.flag_key != flag_key);
		let order: VecDeque<String> = inner
			.order
			.iter()
			.filter(|fp| inner.entries.contains_key(*fp))
			.cloned()
			.collect();
		inner.order = order;
		before - inner.entries.len()
	}

	/// Evicts expired entries. Run on the cleanup tick.
	pub async fn sweep(&self) -> usize {
		let now = Instant::now();
		let mut inner = self.inner.write().await;
		let before = inner.entries.len();
		inner.entries.retain(|_, entry| entry.expires_at > now);
		let order: VecDeque<String> = inner
			.order
			.iter()
			.filter(|fp| inner.entries.contains_key(*fp))
			.cloned()
			.collect();
		inner.order = order;
		before - inner.entries.len()
	}

	pub async fn len(&self) -> usize {
		self.inner.read().await.entries.len()
	}

	pub fn hits(&self) -> u64 {
		self.hits.load(Ordering::Relaxed)
	}

	pub fn misses(&self) -> u64 {
		self.misses.load(Ordering::Relaxed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn cache(ttl: Duration) -> ResponseCache {
		ResponseCache::new(8, ttl)
	}

	#[tokio::test]
	async fn put_get_roundtrip_is_byte_identical() {
		let cache = cache(Duration::from_secs(30));
		let bytes = br#"{"flag_key":"dark-mode","value":true}"#.to_vec();
		cache
			.put("fp1".to_string(), "dark-mode".to_string(), bytes.clone())
			.await;

		assert_eq!(cache.get("fp1").await.unwrap(), bytes);
		assert_eq!(cache.get("fp1").await.unwrap(), bytes);
		assert_eq!(cache.hits(), 2);
	}

	#[tokio::test]
	async fn expired_entries_miss_and_sweep() {
		let cache = cache(Duration::from_millis(10));
		cache
			.put("fp1".to_string(), "dark-mode".to_string(), vec![1])
			.await;

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(cache.get("fp1").await.is_none());
		assert_eq!(cache.misses(), 1);

		assert_eq!(cache.sweep().await, 1);
		assert_eq!(cache.len().await, 0);
	}

	#[tokio::test]
	async fn invalidate_flag_flushes_only_that_flag() {
		let cache = cache(Duration::from_secs(30));
		cache.put("fp1".to_string(), "f1".to_string(), vec![1]).await;
		cache.put("fp2".to_string(), "f1".to_string(), vec![2]).await;
		cache.put("fp3".to_string(), "f2".to_string(), vec![3]).await;

		assert_eq!(cache.invalidate_flag("f1").await, 2);
		assert!(cache.get("fp1").await.is_none());
		assert!(cache.get("fp3").await.is_some());
	}

	#[tokio::test]
	async fn size_never_exceeds_max_responses() {
		let cache = cache(Duration::from_secs(30));
		for i in 0..20 {
			cache
				.put(format!("fp{i}"), "f".to_string(), vec![i as u8])
				.await;
		}
		assert_eq!(cache.len().await, 8);
		// Oldest evicted first.
		assert!(cache.get("fp0").await.is_none());
		assert!(cache.get("fp19").await.is_some());
	}
}
