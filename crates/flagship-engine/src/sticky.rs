// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sticky-assignment storage.
//!
//! The engine pins subjects to variations through this trait. The hub backs
//! it with SQLite; edges use the in-memory store (process-lifetime pinning,
//! durable stickiness lives on the hub).

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use flagship_core::StickyAssignment;

use crate::error::Result;

/// Persistent per-(flag, environment, subject) variation pinning.
///
/// `put` is idempotent on its key: a later put replaces an earlier one and
/// bumps the expiry. Races between concurrent puts resolve last-writer-wins;
/// the engine tolerates either outcome.
#[async_trait]
pub trait StickyStore: Send + Sync {
	/// Returns the live assignment, if any. Expired rows are never
	/// returned.
	async fn get(
		&self,
		flag_key: &str,
		environment: &str,
		subject_key: &str,
	) -> Result<Option<StickyAssignment>>;

	/// Inserts or replaces the assignment for its key.
	async fn put(&self, assignment: StickyAssignment) -> Result<()>;

	/// Removes expired rows, returning how many were swept.
	async fn delete_expired(&self) -> Result<u64>;
}

/// In-memory sticky store used on edges and in tests.
#[derive(Debug, Default)]
pub struct InMemoryStickyStore {
	assignments: RwLock<HashMap<(String, String, String), StickyAssignment>>,
}

impl InMemoryStickyStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn len(&self) -> usize {
		self.assignments.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.assignments.read().await.is_empty()
	}
}

#[async_trait]
impl StickyStore for InMemoryStickyStore {
	async fn get(
		&self,
		flag_key: &str,
		environment: &str,
		subject_key: &str,
	) -> Result<Option<StickyAssignment>> {
		let key = (
			flag_key.to_string(),
			environment.to_string(),
			subject_key.to_string(),
		);
		let assignments = self.assignments.read().await;
		Ok(assignments
			.get(&key)
			.filter(|a| !a.is_expired(Utc::now()))
			.cloned())
	}

	async fn put(&self, assignment: StickyAssignment) -> Result<()> {
		let key = (
			assignment.flag_key.clone(),
			assignment.environment.clone(),
			assignment.subject_key.clone(),
		);
		self.assignments.write().await.insert(key, assignment);
		Ok(())
	}

	async fn delete_expired(&self) -> Result<u64> {
		let now = Utc::now();
		let mut assignments = self.assignments.write().await;
		let before = assignments.len();
		assignments.retain(|_, a| !a.is_expired(now));
		Ok((before - assignments.len()) as u64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;

	fn assignment(subject_key: &str, expires_in: Option<Duration>) -> StickyAssignment {
		let now = Utc::now();
		StickyAssignment {
			flag_key: "exp.flag".to_string(),
			environment: "prod".to_string(),
			subject_key: subject_key.to_string(),
			variation_id: "a".to_string(),
			bucket_key: subject_key.to_string(),
			assigned_at: now,
			expires_at: expires_in.map(|d| now + d),
		}
	}

	#[tokio::test]
	async fn put_then_get() {
		let store = InMemoryStickyStore::new();
		store.put(assignment("bob", None)).await.unwrap();

		let found = store.get("exp.flag", "prod", "bob").await.unwrap();
		assert_eq!(found.map(|a| a.variation_id), Some("a".to_string()));

		assert!(store.get("exp.flag", "prod", "carol").await.unwrap().is_none());
		assert!(store.get("exp.flag", "dev", "bob").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn put_replaces_existing() {
		let store = InMemoryStickyStore::new();
		store.put(assignment("bob", None)).await.unwrap();

		let mut replacement = assignment("bob", None);
		replacement.variation_id = "b".to_string();
		store.put(replacement).await.unwrap();

		let found = store.get("exp.flag", "prod", "bob").await.unwrap().unwrap();
		assert_eq!(found.variation_id, "b");
		assert_eq!(store.len().await, 1);
	}

	#[tokio::test]
	async fn expired_rows_are_invisible_and_swept() {
		let store = InMemoryStickyStore::new();
		store
			.put(assignment("bob", Some(Duration::seconds(-10))))
			.await
			.unwrap();
		store.put(assignment("carol", None)).await.unwrap();

		assert!(store.get("exp.flag", "prod", "bob").await.unwrap().is_none());

		let swept = store.delete_expired().await.unwrap();
		assert_eq!(swept, 1);
		assert_eq!(store.len().await, 1);
	}
}
