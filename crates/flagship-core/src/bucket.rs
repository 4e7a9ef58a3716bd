// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Stable bucket hashing for rollouts.
//!
//! Buckets are computed with murmur3 (32-bit) over
//! `"{flag_key}:{bucket_key}:{seed}"` and reduced modulo [`BUCKET_SPACE`].
//! The function is stable across processes and restarts; changing it would
//! move every subject to a new bucket, so it must never change silently.

use murmur3::murmur3_32;
use std::io::Cursor;

/// Number of buckets subjects hash into. Allocation weights are expressed
/// in percent and scaled by 100 against this space.
pub const BUCKET_SPACE: u32 = 10_000;

/// Computes the bucket for a subject on a flag.
///
/// Deterministic for fixed inputs. The seed participates through the hash
/// input so rollouts can be deliberately rebucketed without touching the
/// hash function itself.
pub fn bucket_for(flag_key: &str, bucket_key: &str, seed: u64) -> u32 {
	let input = format!("{flag_key}:{bucket_key}:{seed}");
	let hash = murmur3_32(&mut Cursor::new(input.as_bytes()), 0).unwrap_or(0);
	hash % BUCKET_SPACE
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bucket_is_deterministic() {
		let a = bucket_for("checkout.new_flow", "alice", 42);
		let b = bucket_for("checkout.new_flow", "alice", 42);
		assert_eq!(a, b);
	}

	#[test]
	fn bucket_stays_in_space() {
		for i in 0..1_000 {
			let bucket = bucket_for("some.flag", &format!("user{i}"), 0);
			assert!(bucket < BUCKET_SPACE);
		}
	}

	#[test]
	fn distribution_is_roughly_uniform() {
		// 10k subjects over 2 halves of the bucket space; allow wide
		// tolerance, this only guards against gross skew.
		let mut low = 0u32;
		for i in 0..10_000 {
			if bucket_for("dist.flag", &format!("user{i}"), 0) < BUCKET_SPACE / 2 {
				low += 1;
			}
		}
		assert!((4_500..=5_500).contains(&low), "low half got {low}");
	}

	#[test]
	fn different_flags_bucket_independently() {
		let moved = (0..64).any(|i| {
			let key = format!("user{i}");
			bucket_for("flag.a", &key, 0) != bucket_for("flag.b", &key, 0)
		});
		assert!(moved);
	}
}
