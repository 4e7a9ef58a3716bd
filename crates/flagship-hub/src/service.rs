// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The administrative write path.
//!
//! The only component allowed to mutate authoritative state. Every write
//! follows validate -> persist -> dispatch, in that order: validation
//! failures abort before persistence, persistence failures abort before
//! dispatch, so no update is ever broadcast for a change that did not
//! land. A crash between persist and dispatch is recovered by edges'
//! full-sync on reconnect.

use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

use flagship_core::{
	ApiKey, ApiKeyId, Flag, FlagUpdate, Permission, Segment, SyncSnapshot,
};

use crate::auth::hash_api_key;
use crate::dispatcher::Dispatcher;
use crate::error::{HubError, Result};
use crate::repository::HubRepository;

/// Validated write operations over flags, segments and API keys.
#[derive(Clone)]
pub struct FlagService {
	repo: Arc<dyn HubRepository>,
	dispatcher: Arc<Dispatcher>,
}

impl FlagService {
	pub fn new(repo: Arc<dyn HubRepository>, dispatcher: Arc<Dispatcher>) -> Self {
		FlagService { repo, dispatcher }
	}

	// Flag writes

	#[instrument(skip(self, flag), fields(flag_key = %flag.key, environment = %flag.environment))]
	pub async fn create_flag(&self, mut flag: Flag) -> Result<Flag> {
		flag.validate()?;
		self.check_segment_refs(&flag).await?;

		let now = Utc::now();
		flag.created_at = now;
		flag.updated_at = now;
		flag.archived_at = None;

		self.repo.create_flag(&flag).await?;

		let materialized = self.materialize(flag.clone()).await?;
		self.dispatcher
			.broadcast(&FlagUpdate::create(materialized))
			.await;

		Ok(flag)
	}

	#[instrument(skip(self, flag), fields(flag_key = %flag.key, environment = %flag.environment))]
	pub async fn update_flag(&self, mut flag: Flag) -> Result<Flag> {
		flag.validate()?;
		self.check_segment_refs(&flag).await?;

		flag.updated_at = Utc::now();
		self.repo.update_flag(&flag).await?;

		let materialized = self.materialize(flag.clone()).await?;
		self.dispatcher
			.broadcast(&FlagUpdate::update(materialized))
			.await;

		Ok(flag)
	}

	#[instrument(skip(self))]
	pub async fn delete_flag(&self, project: &str, key: &str, environment: &str) -> Result<()> {
		if !self.repo.archive_flag(project, key, environment).await? {
			return Err(HubError::NotFound(format!("flag '{key}'")));
		}

		self.dispatcher
			.broadcast(&FlagUpdate::delete(project, key, environment))
			.await;

		Ok(())
	}

	// Segment writes

	#[instrument(skip(self, segment), fields(segment_key = %segment.key, project = %segment.project))]
	pub async fn create_segment(&self, mut segment: Segment) -> Result<Segment> {
		segment.validate()?;

		let now = Utc::now();
		segment.created_at = now;
		segment.updated_at = now;
		segment.archived_at = None;

		self.repo.create_segment(&segment).await?;
		// A fresh segment is not referenced by any flag yet, so there is
		// nothing to rebroadcast.
		Ok(segment)
	}

	#[instrument(skip(self, segment), fields(segment_key = %segment.key, project = %segment.project))]
	pub async fn update_segment(&self, mut segment: Segment) -> Result<Segment> {
		segment.validate()?;

		segment.updated_at = Utc::now();
		self.repo.update_segment(&segment).await?;

		self.rebroadcast_referencing(&segment.project, &segment.key)
			.await?;
		Ok(segment)
	}

	#[instrument(skip(self))]
	pub async fn delete_segment(&self, project: &str, key: &str) -> Result<()> {
		if !self.repo.archive_segment(project, key).await? {
			return Err(HubError::NotFound(format!("segment '{key}'")));
		}

		self.rebroadcast_referencing(project, key).await?;
		Ok(())
	}

	// API key writes

	/// Creates an API key and returns it with the plaintext. The plaintext
	/// is never stored and never returned again.
	#[instrument(skip(self))]
	pub async fn create_api_key(
		&self,
		name: &str,
		project: &str,
		environment: &str,
		permissions: Vec<Permission>,
		expires_at: Option<chrono::DateTime<Utc>>,
	) -> Result<(ApiKey, String)> {
		if permissions.is_empty() {
			return Err(HubError::invalid("permissions", "at least one permission"));
		}

		let plaintext = ApiKey::generate_plaintext(environment);
		let key = ApiKey {
			id: ApiKeyId::new(),
			project: project.to_string(),
			environment: environment.to_string(),
			name: name.to_string(),
			key_hash: hash_api_key(&plaintext)?,
			key_prefix: ApiKey::prefix_of(&plaintext),
			permissions,
			active: true,
			expires_at,
			created_at: Utc::now(),
			last_used_at: None,
		};

		self.repo.create_api_key(&key).await?;
		Ok((key, plaintext))
	}

	// Read-side helpers used by the sync endpoints

	/// Bulk snapshot for an edge scoped to (project, environment). Flags
	/// have their segment references materialized so edges evaluate
	/// without a segment store.
	#[instrument(skip(self))]
	pub async fn snapshot(&self, project: &str, environment: &str) -> Result<SyncSnapshot> {
		let flags = if project == "all" {
			self.repo.list_flags(environment).await?
		} else {
			self.repo.list_flags_by_project(project, environment).await?
		};

		let mut materialized = Vec::with_capacity(flags.len());
		for flag in flags {
			materialized.push(self.materialize(flag).await?);
		}

		let api_keys = self
			.repo
			.list_api_keys()
			.await?
			.into_iter()
			.filter(|key| key.environment == environment && key.covers_project(project))
			.collect();

		Ok(SyncSnapshot {
			flags: materialized,
			api_keys,
			timestamp: Utc::now(),
		})
	}

	/// Copies each referenced segment's rules into the flag so it can be
	/// evaluated without a segment lookup.
	pub async fn materialize(&self, mut flag: Flag) -> Result<Flag> {
		let Some(targeting) = flag.targeting.as_mut() else {
			return Ok(flag);
		};

		for segment_match in targeting.segments.iter_mut() {
			let segment = self
				.repo
				.get_segment(&flag.project, &segment_match.segment_key)
				.await?;
			segment_match.rules = match segment.filter(|s| !s.is_archived()) {
				Some(segment) => segment.rules,
				// Archived or missing segments match nothing.
				None => Vec::new(),
			};
		}

		Ok(flag)
	}

	async fn check_segment_refs(&self, flag: &Flag) -> Result<()> {
		let Some(targeting) = &flag.targeting else {
			return Ok(());
		};
		for segment_match in &targeting.segments {
			let segment = self
				.repo
				.get_segment(&flag.project, &segment_match.segment_key)
				.await?;
			if segment.filter(|s| !s.is_archived()).is_none() {
				return Err(HubError::invalid(
					"segments",
					format!("unknown segment '{}'", segment_match.segment_key),
				));
			}
		}
		Ok(())
	}

	/// Pushes fresh updates for every flag referencing a changed segment,
	/// so edges pick up the new materialized rules.
	async fn rebroadcast_referencing(&self, project: &str, segment_key: &str) -> Result<()> {
		let flags = self.repo.list_flags_for_project(project).await?;
		for flag in flags {
			let references = flag.targeting.as_ref().is_some_and(|t| {
				t.segments.iter().any(|s| s.segment_key == segment_key)
			});
			if !references {
				continue;
			}
			let materialized = self.materialize(flag).await?;
			self.dispatcher
				.broadcast(&FlagUpdate::update(materialized))
				.await;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::{create_memory_pool, run_migrations};
	use crate::repository::SqliteRepository;
	use flagship_core::{
		EdgeHello, FlagKind, Operator, SegmentMatch, StreamEvent, TargetingConfig, TargetingRule,
		UpdateOp, Variation,
	};
	use std::time::Duration;

	async fn make_service() -> (FlagService, Arc<Dispatcher>) {
		let pool = create_memory_pool().await.unwrap();
		run_migrations(&pool).await.unwrap();
		let repo = Arc::new(SqliteRepository::new(pool));
		let dispatcher = Arc::new(Dispatcher::new(
			64,
			Duration::from_secs(30),
			Duration::from_secs(3600),
		));
		(FlagService::new(repo, dispatcher.clone()), dispatcher)
	}

	fn hello(environment: &str) -> EdgeHello {
		EdgeHello {
			server_id: "edge-1".to_string(),
			region: None,
			version: None,
			project: "all".to_string(),
			environment: environment.to_string(),
		}
	}

	fn bool_flag(key: &str) -> Flag {
		let mut flag = Flag::new("web", key, "prod", FlagKind::Boolean);
		flag.enabled = true;
		flag.variations = vec![
			Variation {
				id: "on".to_string(),
				name: "on".to_string(),
				value: serde_json::json!(true),
				weight: 0,
			},
			Variation {
				id: "off".to_string(),
				name: "off".to_string(),
				value: serde_json::json!(false),
				weight: 0,
			},
		];
		flag
	}

	#[tokio::test]
	async fn create_persists_then_dispatches() {
		let (service, dispatcher) = make_service().await;
		let mut rx = dispatcher.register(&hello("prod"), None).await;
		rx.recv().await.unwrap(); // connected ack

		service.create_flag(bool_flag("write.path")).await.unwrap();

		match rx.recv().await.unwrap() {
			StreamEvent::FlagUpdate(update) => {
				assert_eq!(update.action, UpdateOp::Create);
				assert_eq!(update.flag_key, "write.path");
				assert!(update.flag.is_some());
			}
			other => panic!("expected flag_update, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn validation_failure_aborts_before_persistence() {
		let (service, _dispatcher) = make_service().await;

		let mut flag = bool_flag("invalid.rollout");
		flag.targeting = Some(TargetingConfig {
			rules: vec![],
			segments: vec![],
			rollout: Some(flagship_core::RolloutConfig {
				kind: flagship_core::RolloutKind::Percentage,
				allocations: vec![flagship_core::Allocation {
					variation_id: "on".to_string(),
					weight: 60,
				}],
				bucket_by: "user_key".to_string(),
				seed: None,
				sticky: false,
				sticky_ttl_secs: None,
			}),
		});

		assert!(matches!(
			service.create_flag(flag).await,
			Err(HubError::Invalid { field, .. }) if field == "rollout"
		));
		assert!(service.snapshot("all", "prod").await.unwrap().flags.is_empty());
	}

	#[tokio::test]
	async fn unknown_segment_reference_is_invalid() {
		let (service, _dispatcher) = make_service().await;

		let mut flag = bool_flag("seg.flag");
		flag.targeting = Some(TargetingConfig {
			rules: vec![],
			segments: vec![SegmentMatch {
				segment_key: "missing".to_string(),
				variation_id: "on".to_string(),
				rules: vec![],
			}],
			rollout: None,
		});

		assert!(matches!(
			service.create_flag(flag).await,
			Err(HubError::Invalid { field, .. }) if field == "segments"
		));
	}

	#[tokio::test]
	async fn delete_dispatches_tombstone() {
		let (service, dispatcher) = make_service().await;
		service.create_flag(bool_flag("doomed.flag")).await.unwrap();

		let mut rx = dispatcher.register(&hello("prod"), None).await;
		rx.recv().await.unwrap();

		service.delete_flag("web", "doomed.flag", "prod").await.unwrap();

		match rx.recv().await.unwrap() {
			StreamEvent::FlagUpdate(update) => {
				assert_eq!(update.action, UpdateOp::Delete);
				assert!(update.flag.is_none());
			}
			other => panic!("expected delete update, got {other:?}"),
		}

		assert!(matches!(
			service.delete_flag("web", "doomed.flag", "prod").await,
			Err(HubError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn snapshot_materializes_segment_rules() {
		let (service, _dispatcher) = make_service().await;

		let mut segment = Segment::new("web", "beta-testers");
		segment.rules = vec![TargetingRule {
			id: "s1".to_string(),
			attribute: "beta".to_string(),
			operator: Operator::Eq,
			values: vec![serde_json::json!(true)],
			variation_id: String::new(),
			description: None,
		}];
		service.create_segment(segment).await.unwrap();

		let mut flag = bool_flag("seg.materialized");
		flag.targeting = Some(TargetingConfig {
			rules: vec![],
			segments: vec![SegmentMatch {
				segment_key: "beta-testers".to_string(),
				variation_id: "on".to_string(),
				rules: vec![],
			}],
			rollout: None,
		});
		service.create_flag(flag).await.unwrap();

		let snapshot = service.snapshot("all", "prod").await.unwrap();
		let flag = &snapshot.flags[0];
		let segments = &flag.targeting.as_ref().unwrap().segments;
		assert_eq!(segments[0].rules.len(), 1);
		assert_eq!(segments[0].rules[0].attribute, "beta");
	}

	#[tokio::test]
	async fn segment_update_rebroadcasts_referencing_flags() {
		let (service, dispatcher) = make_service().await;

		let mut segment = Segment::new("web", "beta-testers");
		segment.rules = vec![];
		let segment = service.create_segment(segment).await.unwrap();

		let mut flag = bool_flag("seg.rebroadcast");
		flag.targeting = Some(TargetingConfig {
			rules: vec![],
			segments: vec![SegmentMatch {
				segment_key: "beta-testers".to_string(),
				variation_id: "on".to_string(),
				rules: vec![],
			}],
			rollout: None,
		});
		service.create_flag(flag).await.unwrap();
		service.create_flag(bool_flag("seg.unrelated")).await.unwrap();

		let mut rx = dispatcher.register(&hello("prod"), None).await;
		rx.recv().await.unwrap();

		let mut updated = segment;
		updated.rules = vec![TargetingRule {
			id: "s1".to_string(),
			attribute: "beta".to_string(),
			operator: Operator::Eq,
			values: vec![serde_json::json!(true)],
			variation_id: String::new(),
			description: None,
		}];
		service.update_segment(updated).await.unwrap();

		// Only the referencing flag is rebroadcast, with materialized rules.
		match rx.recv().await.unwrap() {
			StreamEvent::FlagUpdate(update) => {
				assert_eq!(update.flag_key, "seg.rebroadcast");
				let flag = update.flag.unwrap();
				assert_eq!(
					flag.targeting.unwrap().segments[0].rules.len(),
					1
				);
			}
			other => panic!("expected flag_update, got {other:?}"),
		}
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn api_key_plaintext_returned_once_and_verifies() {
		let (service, _dispatcher) = make_service().await;

		let (key, plaintext) = service
			.create_api_key("edge key", "web", "prod", vec![Permission::Read], None)
			.await
			.unwrap();

		assert!(plaintext.starts_with("fsk_prod_"));
		assert_ne!(key.key_hash, plaintext);
		assert!(crate::auth::verify_api_key(&plaintext, &key.key_hash).unwrap());
	}

	#[tokio::test]
	async fn snapshot_scopes_api_keys() {
		let (service, _dispatcher) = make_service().await;
		service
			.create_api_key("prod key", "web", "prod", vec![Permission::Read], None)
			.await
			.unwrap();
		service
			.create_api_key("dev key", "web", "dev", vec![Permission::Read], None)
			.await
			.unwrap();

		let snapshot = service.snapshot("web", "prod").await.unwrap();
		assert_eq!(snapshot.api_keys.len(), 1);
		assert_eq!(snapshot.api_keys[0].environment, "prod");
	}
}
