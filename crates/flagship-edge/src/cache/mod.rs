// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The edge's multi-tier cache.
//!
//! Three in-memory layers: preloaded flags, API-key scopes, and memoized
//! response bytes. The flag and response layers sit behind separate
//! read-write locks so evaluation reads and memo writes never contend.

pub mod api_keys;
pub mod flags;
pub mod responses;

pub use api_keys::ApiKeyCache;
pub use flags::{CachedFlag, FlagCache};
pub use responses::ResponseCache;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use flagship_core::FlagUpdate;

use crate::config::EdgeConfig;

/// Facade over the three cache layers.
pub struct EdgeCache {
	pub flags: FlagCache,
	pub api_keys: ApiKeyCache,
	pub responses: ResponseCache,
}

/// Metrics served by `GET /evaluate/cache/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
	pub flag_count: usize,
	pub api_key_count: usize,
	pub response_count: usize,
	pub flag_hits: u64,
	pub flag_misses: u64,
	pub response_hits: u64,
	pub response_misses: u64,
	pub hit_rate: f64,
	pub last_updated: Option<DateTime<Utc>>,
}

impl EdgeCache {
	pub fn new(config: &EdgeConfig) -> Self {
		EdgeCache {
			flags: FlagCache::new(config.max_flags),
			api_keys: ApiKeyCache::new(config.max_api_keys),
			responses: ResponseCache::new(config.max_responses, config.cache_ttl),
		}
	}

	/// Applies a sync update and flushes dependent memo entries in one
	/// step, so no stale response survives a flag change.
	pub async fn apply_update(&self, update: &FlagUpdate) {
		self.flags.apply_update(update).await;
		let flushed = self.responses.invalidate_flag(&update.flag_key).await;
		if flushed > 0 {
			tracing::debug!(
				flag_key = %update.flag_key,
				flushed,
				"memoized responses flushed after update"
			);
		}
	}

	/// One cleanup tick: expired memo entries and API-key entries.
	pub async fn sweep(&self) {
		let responses = self.responses.sweep().await;
		let keys = self.api_keys.sweep().await;
		if responses > 0 || keys > 0 {
			tracing::debug!(responses, keys, "cache sweep");
		}
	}

	pub async fn stats(&self) -> CacheStats {
		let flag_hits = self.flags.hits();
		let flag_misses = self.flags.misses();
		let response_hits = self.responses.hits();
		let response_misses = self.responses.misses();
		let lookups = flag_hits + flag_misses + response_hits + response_misses;
		let hit_rate = if lookups == 0 {
			0.0
		} else {
			(flag_hits + response_hits) as f64 / lookups as f64
		};

		CacheStats {
			flag_count: self.flags.len().await,
			api_key_count: self.api_keys.len().await,
			response_count: self.responses.len().await,
			flag_hits,
			flag_misses,
			response_hits,
			response_misses,
			hit_rate,
			last_updated: self.flags.last_updated().await,
		}
	}

	/// Spawns the periodic sweep task.
	pub fn start_sweeper(
		self: std::sync::Arc<Self>,
		interval: Duration,
	) -> tokio::task::JoinHandle<()> {
		tokio::spawn(async move {
			let mut tick = tokio::time::interval(interval);
			tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
			loop {
				tick.tick().await;
				self.sweep().await;
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use flagship_core::{Flag, FlagKind};

	fn test_cache() -> EdgeCache {
		EdgeCache::new(&EdgeConfig::default())
	}

	#[tokio::test]
	async fn update_flushes_dependent_memo_entries() {
		let cache = test_cache();
		let flag = Flag::new("web", "memo.flag", "production", FlagKind::Boolean);
		cache.flags.bulk_replace("production", vec![flag.clone()]).await;

		cache
			.responses
			.put("fp1".to_string(), "memo.flag".to_string(), vec![1])
			.await;
		cache
			.responses
			.put("fp2".to_string(), "other.flag".to_string(), vec![2])
			.await;

		let mut updated = flag;
		updated.enabled = true;
		cache.apply_update(&FlagUpdate::update(updated)).await;

		assert!(cache.responses.get("fp1").await.is_none());
		assert!(cache.responses.get("fp2").await.is_some());
	}

	#[tokio::test]
	async fn stats_reflect_layers() {
		let cache = test_cache();
		cache
			.flags
			.bulk_replace(
				"production",
				vec![Flag::new("web", "s.flag", "production", FlagKind::Boolean)],
			)
			.await;
		cache.flags.get("s.flag", "production").await;
		cache.flags.get("missing", "production").await;

		let stats = cache.stats().await;
		assert_eq!(stats.flag_count, 1);
		assert_eq!(stats.flag_hits, 1);
		assert_eq!(stats.flag_misses, 1);
		assert!(stats.hit_rate > 0.0);
		assert!(stats.last_updated.is_some());
	}
}
