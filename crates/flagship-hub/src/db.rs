// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database pool and schema management.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use std::str::FromStr;

use crate::error::{HubError, Result};

/// Create a SqlitePool with WAL mode and common settings.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| HubError::Internal(format!("invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

/// In-memory pool for tests. Capped at one connection so every query sees
/// the same database.
pub async fn create_memory_pool() -> Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str(":memory:")
		.map_err(|e| HubError::Internal(format!("invalid database URL: {e}")))?
		.create_if_missing(true);

	let pool = sqlx::sqlite::SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await?;

	Ok(pool)
}

/// Applies the schema. Statements are idempotent so boot can always run
/// them.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
	let statements = [
		r#"
		CREATE TABLE IF NOT EXISTS flags (
			id TEXT PRIMARY KEY,
			project TEXT NOT NULL,
			key TEXT NOT NULL,
			environment TEXT NOT NULL,
			name TEXT NOT NULL,
			description TEXT,
			kind TEXT NOT NULL,
			enabled INTEGER NOT NULL DEFAULT 0,
			default_value TEXT NOT NULL,
			variations TEXT NOT NULL,
			targeting TEXT,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			archived_at TEXT,
			UNIQUE (project, key, environment)
		)
		"#,
		r#"
		CREATE TABLE IF NOT EXISTS segments (
			id TEXT PRIMARY KEY,
			project TEXT NOT NULL,
			key TEXT NOT NULL,
			name TEXT NOT NULL,
			description TEXT,
			rules TEXT NOT NULL,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			archived_at TEXT,
			UNIQUE (project, key)
		)
		"#,
		r#"
		CREATE TABLE IF NOT EXISTS api_keys (
			id TEXT PRIMARY KEY,
			project TEXT NOT NULL,
			environment TEXT NOT NULL,
			name TEXT NOT NULL,
			key_hash TEXT NOT NULL UNIQUE,
			key_prefix TEXT NOT NULL,
			permissions TEXT NOT NULL,
			active INTEGER NOT NULL DEFAULT 1,
			expires_at TEXT,
			created_at TEXT NOT NULL,
			last_used_at TEXT
		)
		"#,
		r#"
		CREATE INDEX IF NOT EXISTS idx_api_keys_prefix ON api_keys (key_prefix)
		"#,
		r#"
		CREATE TABLE IF NOT EXISTS sticky_assignments (
			flag_key TEXT NOT NULL,
			environment TEXT NOT NULL,
			subject_key TEXT NOT NULL,
			variation_id TEXT NOT NULL,
			bucket_key TEXT NOT NULL,
			assigned_at TEXT NOT NULL,
			expires_at TEXT,
			PRIMARY KEY (flag_key, environment, subject_key)
		)
		"#,
		r#"
		CREATE TABLE IF NOT EXISTS flag_stats (
			flag_id TEXT PRIMARY KEY,
			flag_key TEXT NOT NULL,
			evaluation_count INTEGER NOT NULL DEFAULT 0,
			last_evaluated_at TEXT
		)
		"#,
	];

	for statement in statements {
		sqlx::query(statement).execute(pool).await?;
	}

	tracing::debug!("migrations applied");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn migrations_are_idempotent() {
		let pool = create_memory_pool().await.unwrap();
		run_migrations(&pool).await.unwrap();
		run_migrations(&pool).await.unwrap();
	}
}
