// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite-backed sticky-assignment store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use flagship_core::StickyAssignment;
use flagship_engine::{EngineError, StickyStore};

/// Durable sticky store used by the hub's evaluator.
#[derive(Clone)]
pub struct SqliteStickyStore {
	pool: SqlitePool,
}

impl SqliteStickyStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl StickyStore for SqliteStickyStore {
	async fn get(
		&self,
		flag_key: &str,
		environment: &str,
		subject_key: &str,
	) -> Result<Option<StickyAssignment>, EngineError> {
		let row = sqlx::query(
			r#"
			SELECT flag_key, environment, subject_key, variation_id, bucket_key,
				   assigned_at, expires_at
			FROM sticky_assignments
			WHERE flag_key = ? AND environment = ? AND subject_key = ?
			"#,
		)
		.bind(flag_key)
		.bind(environment)
		.bind(subject_key)
		.fetch_optional(&self.pool)
		.await
		.map_err(store_err)?;

		let Some(row) = row else {
			return Ok(None);
		};

		let assignment = parse_row(&row)?;
		if assignment.is_expired(Utc::now()) {
			return Ok(None);
		}
		Ok(Some(assignment))
	}

	async fn put(&self, assignment: StickyAssignment) -> Result<(), EngineError> {
		// Last writer wins on the primary key; a replace bumps the expiry.
		sqlx::query(
			r#"
			INSERT INTO sticky_assignments
				(flag_key, environment, subject_key, variation_id, bucket_key, assigned_at, expires_at)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT (flag_key, environment, subject_key) DO UPDATE SET
				variation_id = excluded.variation_id,
				bucket_key = excluded.bucket_key,
				assigned_at = excluded.assigned_at,
				expires_at = excluded.expires_at
			"#,
		)
		.bind(&assignment.flag_key)
		.bind(&assignment.environment)
		.bind(&assignment.subject_key)
		.bind(&assignment.variation_id)
		.bind(&assignment.bucket_key)
		.bind(assignment.assigned_at.to_rfc3339())
		.bind(assignment.expires_at.map(|dt| dt.to_rfc3339()))
		.execute(&self.pool)
		.await
		.map_err(store_err)?;

		Ok(())
	}

	async fn delete_expired(&self) -> Result<u64, EngineError> {
		let result =
			sqlx::query("DELETE FROM sticky_assignments WHERE expires_at IS NOT NULL AND expires_at <= ?")
				.bind(Utc::now().to_rfc3339())
				.execute(&self.pool)
				.await
				.map_err(store_err)?;

		Ok(result.rows_affected())
	}
}

fn store_err(e: sqlx::Error) -> EngineError {
	EngineError::Store(e.to_string())
}

fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<StickyAssignment, EngineError> {
	let assigned_at: String = row.get("assigned_at");
	let expires_at: Option<String> = row.get("expires_at");

	Ok(StickyAssignment {
		flag_key: row.get("flag_key"),
		environment: row.get("environment"),
		subject_key: row.get("subject_key"),
		variation_id: row.get("variation_id"),
		bucket_key: row.get("bucket_key"),
		assigned_at: parse_timestamp(&assigned_at)?,
		expires_at: expires_at.map(|v| parse_timestamp(&v)).transpose()?,
	})
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, EngineError> {
	DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| EngineError::Store(format!("invalid timestamp: {e}")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::{create_memory_pool, run_migrations};
	use chrono::Duration;

	async fn make_store() -> SqliteStickyStore {
		let pool = create_memory_pool().await.unwrap();
		run_migrations(&pool).await.unwrap();
		SqliteStickyStore::new(pool)
	}

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
	async fn put_get_roundtrip() {
		let store = make_store().await;
		store.put(assignment("bob", Some(Duration::hours(1)))).await.unwrap();

		let found = store.get("exp.flag", "prod", "bob").await.unwrap().unwrap();
		assert_eq!(found.variation_id, "a");
		assert!(found.expires_at.is_some());
	}

	#[tokio::test]
	async fn put_is_idempotent_and_replaces() {
		let store = make_store().await;
		store.put(assignment("bob", None)).await.unwrap();

		let mut replacement = assignment("bob", Some(Duration::hours(2)));
		replacement.variation_id = "b".to_string();
		store.put(replacement).await.unwrap();

		let found = store.get("exp.flag", "prod", "bob").await.unwrap().unwrap();
		assert_eq!(found.variation_id, "b");
	}

	#[tokio::test]
	async fn expired_rows_never_returned_and_swept() {
		let store = make_store().await;
		store
			.put(assignment("bob", Some(Duration::seconds(-5))))
			.await
			.unwrap();
		store.put(assignment("carol", None)).await.unwrap();

		assert!(store.get("exp.flag", "prod", "bob").await.unwrap().is_none());

		let swept = store.delete_expired().await.unwrap();
		assert_eq!(swept, 1);
		assert!(store.get("exp.flag", "prod", "carol").await.unwrap().is_some());
	}
}
