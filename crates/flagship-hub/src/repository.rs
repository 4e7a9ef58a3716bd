// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed repository over the persistent store.
//!
//! The hub owns authoritative state; everything here goes through SQLite.
//! Flags and segments are logically deleted (tombstoned via `archived_at`)
//! so deletions can propagate over the sync fabric.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use flagship_core::{ApiKey, ApiKeyId, Flag, FlagId, Permission, Segment, SegmentId};

use crate::error::{HubError, Result};

/// Repository trait for hub persistence.
#[async_trait]
pub trait HubRepository: Send + Sync {
	// Flag operations
	async fn create_flag(&self, flag: &Flag) -> Result<()>;
	async fn get_flag(&self, project: &str, key: &str, environment: &str)
		-> Result<Option<Flag>>;
	/// Key lookup across projects, for callers that do not scope by
	/// project (first match wins; keys are usually globally distinct).
	async fn get_flag_by_key(&self, key: &str, environment: &str) -> Result<Option<Flag>>;
	async fn update_flag(&self, flag: &Flag) -> Result<()>;
	/// Tombstones the flag. Returns false when it did not exist.
	async fn archive_flag(&self, project: &str, key: &str, environment: &str) -> Result<bool>;
	async fn list_flags(&self, environment: &str) -> Result<Vec<Flag>>;
	async fn list_flags_by_project(&self, project: &str, environment: &str) -> Result<Vec<Flag>>;
	/// Every live flag in a project, across environments. Used when a
	/// segment change has to be re-pushed for all referencing flags.
	async fn list_flags_for_project(&self, project: &str) -> Result<Vec<Flag>>;

	// Segment operations
	async fn create_segment(&self, segment: &Segment) -> Result<()>;
	async fn get_segment(&self, project: &str, key: &str) -> Result<Option<Segment>>;
	async fn update_segment(&self, segment: &Segment) -> Result<()>;
	async fn archive_segment(&self, project: &str, key: &str) -> Result<bool>;
	async fn list_segments(&self, project: &str) -> Result<Vec<Segment>>;

	// API key operations
	async fn create_api_key(&self, key: &ApiKey) -> Result<()>;
	async fn list_api_keys(&self) -> Result<Vec<ApiKey>>;
	/// Candidates for authentication, narrowed by the plaintext's lookup
	/// prefix. The caller verifies against each hash.
	async fn list_api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>>;
	async fn update_api_key_last_used(&self, id: ApiKeyId) -> Result<()>;
	async fn revoke_api_key(&self, id: ApiKeyId) -> Result<bool>;

	// Evaluation stats
	async fn record_evaluation(&self, flag_id: FlagId, flag_key: &str) -> Result<()>;
}

/// SQLite implementation of the hub repository.
#[derive(Clone)]
pub struct SqliteRepository {
	pool: SqlitePool,
}

impl SqliteRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

const FLAG_COLUMNS: &str = "id, project, key, environment, name, description, kind, enabled, \
	default_value, variations, targeting, created_at, updated_at, archived_at";

const SEGMENT_COLUMNS: &str =
	"id, project, key, name, description, rules, created_at, updated_at, archived_at";

const API_KEY_COLUMNS: &str = "id, project, environment, name, key_hash, key_prefix, \
	permissions, active, expires_at, created_at, last_used_at";

#[async_trait]
impl HubRepository for SqliteRepository {
	// Flag operations

	#[instrument(skip(self, flag), fields(flag_key = %flag.key, environment = %flag.environment))]
	async fn create_flag(&self, flag: &Flag) -> Result<()> {
		let result = sqlx::query(
			r#"
			INSERT INTO flags (id, project, key, environment, name, description, kind, enabled,
							   default_value, variations, targeting, created_at, updated_at, archived_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(flag.id.to_string())
		.bind(&flag.project)
		.bind(&flag.key)
		.bind(&flag.environment)
		.bind(&flag.name)
		.bind(&flag.description)
		.bind(flag.kind.to_string())
		.bind(flag.enabled)
		.bind(flag.default_value.to_string())
		.bind(serde_json::to_string(&flag.variations)?)
		.bind(
			flag.targeting
				.as_ref()
				.map(serde_json::to_string)
				.transpose()?,
		)
		.bind(flag.created_at.to_rfc3339())
		.bind(flag.updated_at.to_rfc3339())
		.bind(flag.archived_at.map(|dt| dt.to_rfc3339()))
		.execute(&self.pool)
		.await;

		map_unique_violation(result, || {
			format!(
				"flag '{}' already exists in {}/{}",
				flag.key, flag.project, flag.environment
			)
		})
	}

	#[instrument(skip(self))]
	async fn get_flag(
		&self,
		project: &str,
		key: &str,
		environment: &str,
	) -> Result<Option<Flag>> {
		let row = sqlx::query(&format!(
			"SELECT {FLAG_COLUMNS} FROM flags WHERE project = ? AND key = ? AND environment = ?"
		))
		.bind(project)
		.bind(key)
		.bind(environment)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| parse_flag_row(&r)).transpose()
	}

	#[instrument(skip(self))]
	async fn get_flag_by_key(&self, key: &str, environment: &str) -> Result<Option<Flag>> {
		let row = sqlx::query(&format!(
			"SELECT {FLAG_COLUMNS} FROM flags WHERE key = ? AND environment = ? ORDER BY project LIMIT 1"
		))
		.bind(key)
		.bind(environment)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| parse_flag_row(&r)).transpose()
	}

	#[instrument(skip(self, flag), fields(flag_key = %flag.key, environment = %flag.environment))]
	async fn update_flag(&self, flag: &Flag) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE flags
			SET name = ?, description = ?, kind = ?, enabled = ?, default_value = ?,
				variations = ?, targeting = ?, updated_at = ?, archived_at = ?
			WHERE project = ? AND key = ? AND environment = ?
			"#,
		)
		.bind(&flag.name)
		.bind(&flag.description)
		.bind(flag.kind.to_string())
		.bind(flag.enabled)
		.bind(flag.default_value.to_string())
		.bind(serde_json::to_string(&flag.variations)?)
		.bind(
			flag.targeting
				.as_ref()
				.map(serde_json::to_string)
				.transpose()?,
		)
		.bind(flag.updated_at.to_rfc3339())
		.bind(flag.archived_at.map(|dt| dt.to_rfc3339()))
		.bind(&flag.project)
		.bind(&flag.key)
		.bind(&flag.environment)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(HubError::NotFound(format!("flag '{}'", flag.key)));
		}
		Ok(())
	}

	#[instrument(skip(self))]
	async fn archive_flag(&self, project: &str, key: &str, environment: &str) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE flags SET archived_at = ?, updated_at = ?
			WHERE project = ? AND key = ? AND environment = ? AND archived_at IS NULL
			"#,
		)
		.bind(Utc::now().to_rfc3339())
		.bind(Utc::now().to_rfc3339())
		.bind(project)
		.bind(key)
		.bind(environment)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self))]
	async fn list_flags(&self, environment: &str) -> Result<Vec<Flag>> {
		let rows = sqlx::query(&format!(
			"SELECT {FLAG_COLUMNS} FROM flags WHERE environment = ? AND archived_at IS NULL ORDER BY key"
		))
		.bind(environment)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_flag_row).collect()
	}

	#[instrument(skip(self))]
	async fn list_flags_by_project(&self, project: &str, environment: &str) -> Result<Vec<Flag>> {
		let rows = sqlx::query(&format!(
			"SELECT {FLAG_COLUMNS} FROM flags \
			 WHERE project = ? AND environment = ? AND archived_at IS NULL ORDER BY key"
		))
		.bind(project)
		.bind(environment)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_flag_row).collect()
	}

	#[instrument(skip(self))]
	async fn list_flags_for_project(&self, project: &str) -> Result<Vec<Flag>> {
		let rows = sqlx::query(&format!(
			"SELECT {FLAG_COLUMNS} FROM flags \
			 WHERE project = ? AND archived_at IS NULL ORDER BY environment, key"
		))
		.bind(project)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_flag_row).collect()
	}

	// Segment operations

	#[instrument(skip(self, segment), fields(segment_key = %segment.key, project = %segment.project))]
	async fn create_segment(&self, segment: &Segment) -> Result<()> {
		let result = sqlx::query(
			r#"
			INSERT INTO segments (id, project, key, name, description, rules,
								  created_at, updated_at, archived_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(segment.id.to_string())
		.bind(&segment.project)
		.bind(&segment.key)
		.bind(&segment.name)
		.bind(&segment.description)
		.bind(serde_json::to_string(&segment.rules)?)
		.bind(segment.created_at.to_rfc3339())
		.bind(segment.updated_at.to_rfc3339())
		.bind(segment.archived_at.map(|dt| dt.to_rfc3339()))
		.execute(&self.pool)
		.await;

		map_unique_violation(result, || {
			format!(
				"segment '{}' already exists in {}",
				segment.key, segment.project
			)
		})
	}

	#[instrument(skip(self))]
	async fn get_segment(&self, project: &str, key: &str) -> Result<Option<Segment>> {
		let row = sqlx::query(&format!(
			"SELECT {SEGMENT_COLUMNS} FROM segments WHERE project = ? AND key = ?"
		))
		.bind(project)
		.bind(key)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| parse_segment_row(&r)).transpose()
	}

	#[instrument(skip(self, segment), fields(segment_key = %segment.key))]
	async fn update_segment(&self, segment: &Segment) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE segments SET name = ?, description = ?, rules = ?, updated_at = ?, archived_at = ?
			WHERE project = ? AND key = ?
			"#,
		)
		.bind(&segment.name)
		.bind(&segment.description)
		.bind(serde_json::to_string(&segment.rules)?)
		.bind(segment.updated_at.to_rfc3339())
		.bind(segment.archived_at.map(|dt| dt.to_rfc3339()))
		.bind(&segment.project)
		.bind(&segment.key)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(HubError::NotFound(format!("segment '{}'", segment.key)));
		}
		Ok(())
	}

	#[instrument(skip(self))]
	async fn archive_segment(&self, project: &str, key: &str) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE segments SET archived_at = ?, updated_at = ?
			WHERE project = ? AND key = ? AND archived_at IS NULL
			"#,
		)
		.bind(Utc::now().to_rfc3339())
		.bind(Utc::now().to_rfc3339())
		.bind(project)
		.bind(key)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self))]
	async fn list_segments(&self, project: &str) -> Result<Vec<Segment>> {
		let rows = sqlx::query(&format!(
			"SELECT {SEGMENT_COLUMNS} FROM segments \
			 WHERE project = ? AND archived_at IS NULL ORDER BY key"
		))
		.bind(project)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_segment_row).collect()
	}

	// API key operations

	#[instrument(skip(self, key), fields(key_id = %key.id, project = %key.project))]
	async fn create_api_key(&self, key: &ApiKey) -> Result<()> {
		let result = sqlx::query(
			r#"
			INSERT INTO api_keys (id, project, environment, name, key_hash, key_prefix,
								  permissions, active, expires_at, created_at, last_used_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(key.id.to_string())
		.bind(&key.project)
		.bind(&key.environment)
		.bind(&key.name)
		.bind(&key.key_hash)
		.bind(&key.key_prefix)
		.bind(serde_json::to_string(&key.permissions)?)
		.bind(key.active)
		.bind(key.expires_at.map(|dt| dt.to_rfc3339()))
		.bind(key.created_at.to_rfc3339())
		.bind(key.last_used_at.map(|dt| dt.to_rfc3339()))
		.execute(&self.pool)
		.await;

		map_unique_violation(result, || "api key hash already exists".to_string())
	}

	#[instrument(skip(self))]
	async fn list_api_keys(&self) -> Result<Vec<ApiKey>> {
		let rows = sqlx::query(&format!(
			"SELECT {API_KEY_COLUMNS} FROM api_keys ORDER BY created_at"
		))
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_api_key_row).collect()
	}

	#[instrument(skip(self))]
	async fn list_api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>> {
		let rows = sqlx::query(&format!(
			"SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_prefix = ? AND active = 1"
		))
		.bind(prefix)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_api_key_row).collect()
	}

	#[instrument(skip(self))]
	async fn update_api_key_last_used(&self, id: ApiKeyId) -> Result<()> {
		sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
			.bind(Utc::now().to_rfc3339())
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	#[instrument(skip(self))]
	async fn revoke_api_key(&self, id: ApiKeyId) -> Result<bool> {
		let result = sqlx::query("UPDATE api_keys SET active = 0 WHERE id = ? AND active = 1")
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	// Evaluation stats

	#[instrument(skip(self))]
	async fn record_evaluation(&self, flag_id: FlagId, flag_key: &str) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO flag_stats (flag_id, flag_key, evaluation_count, last_evaluated_at)
			VALUES (?, ?, 1, ?)
			ON CONFLICT (flag_id) DO UPDATE SET
				evaluation_count = evaluation_count + 1,
				last_evaluated_at = excluded.last_evaluated_at
			"#,
		)
		.bind(flag_id.to_string())
		.bind(flag_key)
		.bind(Utc::now().to_rfc3339())
		.execute(&self.pool)
		.await?;
		Ok(())
	}
}

fn map_unique_violation(
	result: std::result::Result<sqlx::sqlite::SqliteQueryResult, sqlx::Error>,
	conflict: impl FnOnce() -> String,
) -> Result<()> {
	match result {
		Ok(_) => Ok(()),
		Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
			Err(HubError::Conflict(conflict()))
		}
		Err(e) => Err(e.into()),
	}
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| HubError::Internal(format!("invalid {column}: {e}")))
}

fn parse_optional_timestamp(value: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>> {
	value.map(|v| parse_timestamp(&v, column)).transpose()
}

fn parse_flag_row(row: &sqlx::sqlite::SqliteRow) -> Result<Flag> {
	let id: String = row.get("id");
	let targeting: Option<String> = row.get("targeting");
	let kind: String = row.get("kind");
	let default_value: String = row.get("default_value");
	let variations: String = row.get("variations");
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	let archived_at: Option<String> = row.get("archived_at");

	Ok(Flag {
		id: id
			.parse::<FlagId>()
			.map_err(|_| HubError::Internal("invalid flag id in database".to_string()))?,
		project: row.get("project"),
		key: row.get("key"),
		environment: row.get("environment"),
		name: row.get("name"),
		description: row.get("description"),
		kind: kind
			.parse()
			.map_err(|_| HubError::Internal(format!("invalid flag kind '{kind}' in database")))?,
		enabled: row.get("enabled"),
		default_value: serde_json::from_str(&default_value)?,
		variations: serde_json::from_str(&variations)?,
		targeting: targeting.map(|t| serde_json::from_str(&t)).transpose()?,
		created_at: parse_timestamp(&created_at, "created_at")?,
		updated_at: parse_timestamp(&updated_at, "updated_at")?,
		archived_at: parse_optional_timestamp(archived_at, "archived_at")?,
	})
}

fn parse_segment_row(row: &sqlx::sqlite::SqliteRow) -> Result<Segment> {
	let id: String = row.get("id");
	let rules: String = row.get("rules");
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	let archived_at: Option<String> = row.get("archived_at");

	Ok(Segment {
		id: SegmentId(
			id.parse()
				.map_err(|_| HubError::Internal("invalid segment id in database".to_string()))?,
		),
		project: row.get("project"),
		key: row.get("key"),
		name: row.get("name"),
		description: row.get("description"),
		rules: serde_json::from_str(&rules)?,
		created_at: parse_timestamp(&created_at, "created_at")?,
		updated_at: parse_timestamp(&updated_at, "updated_at")?,
		archived_at: parse_optional_timestamp(archived_at, "archived_at")?,
	})
}

fn parse_api_key_row(row: &sqlx::sqlite::SqliteRow) -> Result<ApiKey> {
	let id: String = row.get("id");
	let permissions: String = row.get("permissions");
	let expires_at: Option<String> = row.get("expires_at");
	let created_at: String = row.get("created_at");
	let last_used_at: Option<String> = row.get("last_used_at");

	let permissions: Vec<Permission> = serde_json::from_str(&permissions)?;

	Ok(ApiKey {
		id: ApiKeyId(
			id.parse()
				.map_err(|_| HubError::Internal("invalid api key id in database".to_string()))?,
		),
		project: row.get("project"),
		environment: row.get("environment"),
		name: row.get("name"),
		key_hash: row.get("key_hash"),
		key_prefix: row.get("key_prefix"),
		permissions,
		active: row.get("active"),
		expires_at: parse_optional_timestamp(expires_at, "expires_at")?,
		created_at: parse_timestamp(&created_at, "created_at")?,
		last_used_at: parse_optional_timestamp(last_used_at, "last_used_at")?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::{create_memory_pool, run_migrations};
	use flagship_core::{FlagKind, Operator, TargetingConfig, TargetingRule};

	async fn make_repo() -> SqliteRepository {
		let pool = create_memory_pool().await.unwrap();
		run_migrations(&pool).await.unwrap();
		SqliteRepository::new(pool)
	}

	fn sample_flag(key: &str, environment: &str) -> Flag {
		let mut flag = Flag::new("web", key, environment, FlagKind::Boolean);
		flag.enabled = true;
		flag.variations = vec![flagship_core::Variation {
			id: "on".to_string(),
			name: "on".to_string(),
			value: serde_json::json!(true),
			weight: 0,
		}];
		flag.targeting = Some(TargetingConfig {
			rules: vec![TargetingRule {
				id: "r1".to_string(),
				attribute: "plan".to_string(),
				operator: Operator::Eq,
				values: vec![serde_json::json!("premium")],
				variation_id: "on".to_string(),
				description: None,
			}],
			segments: vec![],
			rollout: None,
		});
		flag
	}

	#[tokio::test]
	async fn create_and_get_flag_roundtrip() {
		let repo = make_repo().await;
		let flag = sample_flag("checkout.new_flow", "prod");
		repo.create_flag(&flag).await.unwrap();

		let fetched = repo
			.get_flag("web", "checkout.new_flow", "prod")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(fetched.id, flag.id);
		assert_eq!(fetched.targeting, flag.targeting);
		assert_eq!(fetched.default_value, flag.default_value);
	}

	#[tokio::test]
	async fn duplicate_flag_is_a_conflict() {
		let repo = make_repo().await;
		let flag = sample_flag("dup.flag", "prod");
		repo.create_flag(&flag).await.unwrap();

		let again = sample_flag("dup.flag", "prod");
		assert!(matches!(
			repo.create_flag(&again).await,
			Err(HubError::Conflict(_))
		));
	}

	#[tokio::test]
	async fn same_key_different_environment_is_allowed() {
		let repo = make_repo().await;
		repo.create_flag(&sample_flag("multi.env", "prod")).await.unwrap();
		repo.create_flag(&sample_flag("multi.env", "staging"))
			.await
			.unwrap();

		assert_eq!(repo.list_flags("prod").await.unwrap().len(), 1);
		assert_eq!(repo.list_flags("staging").await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn archive_hides_flag_from_listings() {
		let repo = make_repo().await;
		repo.create_flag(&sample_flag("gone.flag", "prod")).await.unwrap();

		assert!(repo.archive_flag("web", "gone.flag", "prod").await.unwrap());
		assert!(repo.list_flags("prod").await.unwrap().is_empty());

		// Second archive is a no-op.
		assert!(!repo.archive_flag("web", "gone.flag", "prod").await.unwrap());

		// Direct lookup still sees the tombstone.
		let flag = repo
			.get_flag("web", "gone.flag", "prod")
			.await
			.unwrap()
			.unwrap();
		assert!(flag.is_archived());
	}

	#[tokio::test]
	async fn update_flag_persists_changes() {
		let repo = make_repo().await;
		let mut flag = sample_flag("mutable.flag", "prod");
		repo.create_flag(&flag).await.unwrap();

		flag.enabled = false;
		flag.updated_at = Utc::now();
		repo.update_flag(&flag).await.unwrap();

		let fetched = repo
			.get_flag("web", "mutable.flag", "prod")
			.await
			.unwrap()
			.unwrap();
		assert!(!fetched.enabled);
	}

	#[tokio::test]
	async fn update_missing_flag_is_not_found() {
		let repo = make_repo().await;
		let flag = sample_flag("ghost.flag", "prod");
		assert!(matches!(
			repo.update_flag(&flag).await,
			Err(HubError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn segment_crud_roundtrip() {
		let repo = make_repo().await;
		let mut segment = Segment::new("web", "beta-testers");
		segment.rules = vec![TargetingRule {
			id: "s1".to_string(),
			attribute: "beta".to_string(),
			operator: Operator::Eq,
			values: vec![serde_json::json!(true)],
			variation_id: String::new(),
			description: None,
		}];
		repo.create_segment(&segment).await.unwrap();

		let fetched = repo.get_segment("web", "beta-testers").await.unwrap().unwrap();
		assert_eq!(fetched.rules, segment.rules);

		assert!(repo.archive_segment("web", "beta-testers").await.unwrap());
		assert!(repo.list_segments("web").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn api_key_prefix_lookup_and_revoke() {
		let repo = make_repo().await;
		let plaintext = ApiKey::generate_plaintext("prod");
		let key = ApiKey {
			id: ApiKeyId::new(),
			project: "web".to_string(),
			environment: "prod".to_string(),
			name: "edge key".to_string(),
			key_hash: "$argon2id$stub".to_string(),
			key_prefix: ApiKey::prefix_of(&plaintext),
			permissions: vec![Permission::Read],
			active: true,
			expires_at: None,
			created_at: Utc::now(),
			last_used_at: None,
		};
		repo.create_api_key(&key).await.unwrap();

		let candidates = repo
			.list_api_keys_by_prefix(&ApiKey::prefix_of(&plaintext))
			.await
			.unwrap();
		assert_eq!(candidates.len(), 1);

		assert!(repo.revoke_api_key(key.id).await.unwrap());
		let candidates = repo
			.list_api_keys_by_prefix(&ApiKey::prefix_of(&plaintext))
			.await
			.unwrap();
		assert!(candidates.is_empty());
	}

	#[tokio::test]
	async fn record_evaluation_accumulates() {
		let repo = make_repo().await;
		let flag = sample_flag("counted.flag", "prod");
		repo.create_flag(&flag).await.unwrap();

		repo.record_evaluation(flag.id, &flag.key).await.unwrap();
		repo.record_evaluation(flag.id, &flag.key).await.unwrap();

		let count: i64 =
			sqlx::query_scalar("SELECT evaluation_count FROM flag_stats WHERE flag_id = ?")
				.bind(flag.id.to_string())
				.fetch_one(&repo.pool)
				.await
				.unwrap();
		assert_eq!(count, 2);
	}
}
