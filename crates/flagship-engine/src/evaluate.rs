// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The evaluation algorithm.
//!
//! Order, on first match return:
//! 1. Disabled flag -> default, `flag_disabled`
//! 2. No targeting -> default, `default`
//! 3. Targeting rules in order -> `rule_match`
//! 4. Referenced segments in order -> `segment_match`
//! 5. Rollout (sticky lookup, then weighted bucket walk) -> `percentage_rollout`
//! 6. Default -> `default`
//!
//! A rule that cannot be evaluated (missing attribute, dangling variation
//! reference) is skipped, never fatal to the flag. Sticky-store failures
//! degrade to a freshly computed assignment.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use flagship_core::{
	bucket_for, EvalReason, EvaluationResponse, Flag, ResponseSource, RolloutConfig, Segment,
	StickyAssignment, Subject, TargetingRule, Variation,
};

use crate::sticky::StickyStore;

/// Where segment definitions come from during evaluation. The hub backs
/// this with its repository snapshot; edges rely on rules the hub
/// materialized into the flag and use [`NoSegments`].
pub trait SegmentSource: Send + Sync {
	/// Rules for a segment key within a project, or `None` when unknown.
	fn segment_rules(&self, project: &str, segment_key: &str) -> Option<Vec<TargetingRule>>;
}

/// A segment source that knows nothing.
pub struct NoSegments;

impl SegmentSource for NoSegments {
	fn segment_rules(&self, _project: &str, _segment_key: &str) -> Option<Vec<TargetingRule>> {
		None
	}
}

/// Segment source over a preloaded key -> segment map.
pub struct MapSegments(pub HashMap<String, Segment>);

impl SegmentSource for MapSegments {
	fn segment_rules(&self, _project: &str, segment_key: &str) -> Option<Vec<TargetingRule>> {
		self.0.get(segment_key).map(|s| s.rules.clone())
	}
}

/// True when the subject matches any of the rules. Rules whose attribute is
/// absent from the subject are skipped.
pub fn matches_rules(rules: &[TargetingRule], subject: &Subject) -> bool {
	rules.iter().any(|rule| {
		subject
			.attribute(&rule.attribute)
			.is_some_and(|value| rule.operator.evaluate(&value, &rule.values))
	})
}

/// Deterministic flag evaluator, shared by hub and edge.
pub struct Evaluator {
	sticky: Arc<dyn StickyStore>,
}

impl Evaluator {
	pub fn new(sticky: Arc<dyn StickyStore>) -> Self {
		Evaluator { sticky }
	}

	/// Resolves `flag` for `subject`. Never fails; internal errors degrade
	/// per-rule or per-store-call.
	pub async fn evaluate(
		&self,
		flag: &Flag,
		subject: &Subject,
		segments: &dyn SegmentSource,
	) -> EvaluationResponse {
		let started = Instant::now();
		let mut response = self.resolve(flag, subject, segments).await;
		response.eval_time_ms = started.elapsed().as_secs_f64() * 1_000.0;
		response
	}

	async fn resolve(
		&self,
		flag: &Flag,
		subject: &Subject,
		segments: &dyn SegmentSource,
	) -> EvaluationResponse {
		if !flag.enabled {
			return EvaluationResponse::default_value(
				&flag.key,
				flag.default_value.clone(),
				EvalReason::FlagDisabled,
			);
		}

		let Some(targeting) = flag.targeting.as_ref().filter(|t| !t.is_empty()) else {
			return EvaluationResponse::default_value(
				&flag.key,
				flag.default_value.clone(),
				EvalReason::Default,
			);
		};

		// Targeting rules, first match wins.
		for rule in &targeting.rules {
			let Some(value) = subject.attribute(&rule.attribute) else {
				continue;
			};
			if !rule.operator.evaluate(&value, &rule.values) {
				continue;
			}
			match flag.variation(&rule.variation_id) {
				Some(variation) => {
					return self.variation_response(
						flag,
						variation,
						EvalReason::RuleMatch,
						Some(rule.id.clone()),
					);
				}
				None => {
					warn!(
						flag_key = %flag.key,
						rule_id = %rule.id,
						variation_id = %rule.variation_id,
						"rule references missing variation, skipping"
					);
				}
			}
		}

		// Segments, in order. Materialized rules win over the source.
		for segment_match in &targeting.segments {
			let rules = if segment_match.rules.is_empty() {
				segments.segment_rules(&flag.project, &segment_match.segment_key)
			} else {
				Some(segment_match.rules.clone())
			};
			let Some(rules) = rules else {
				continue;
			};
			if !matches_rules(&rules, subject) {
				continue;
			}
			match flag.variation(&segment_match.variation_id) {
				Some(variation) => {
					return self.variation_response(flag, variation, EvalReason::SegmentMatch, None);
				}
				None => {
					warn!(
						flag_key = %flag.key,
						segment_key = %segment_match.segment_key,
						variation_id = %segment_match.variation_id,
						"segment references missing variation, skipping"
					);
				}
			}
		}

		if let Some(rollout) = &targeting.rollout {
			if let Some(response) = self.resolve_rollout(flag, subject, rollout).await {
				return response;
			}
		}

		EvaluationResponse::default_value(&flag.key, flag.default_value.clone(), EvalReason::Default)
	}

	async fn resolve_rollout(
		&self,
		flag: &Flag,
		subject: &Subject,
		rollout: &RolloutConfig,
	) -> Option<EvaluationResponse> {
		let bucket_key = subject.bucket_key(&rollout.bucket_by);

		if rollout.sticky {
			match self.sticky.get(&flag.key, &flag.environment, &bucket_key).await {
				Ok(Some(assignment)) => {
					if let Some(variation) = flag.variation(&assignment.variation_id) {
						return Some(self.variation_response(
							flag,
							variation,
							EvalReason::PercentageRollout,
							None,
						));
					}
					// The pinned variation was removed; fall through and
					// rebucket below.
				}
				Ok(None) => {}
				Err(e) => {
					warn!(flag_key = %flag.key, error = %e, "sticky lookup failed, rebucketing");
				}
			}
		}

		let variation = pick_allocation(flag, rollout, &bucket_key)?;

		if rollout.sticky {
			let now = Utc::now();
			let assignment = StickyAssignment {
				flag_key: flag.key.clone(),
				environment: flag.environment.clone(),
				subject_key: bucket_key.clone(),
				variation_id: variation.id.clone(),
				bucket_key,
				assigned_at: now,
				expires_at: sticky_expiry(rollout, now),
			};
			if let Err(e) = self.sticky.put(assignment).await {
				warn!(flag_key = %flag.key, error = %e, "failed to persist sticky assignment");
			}
		}

		Some(self.variation_response(flag, variation, EvalReason::PercentageRollout, None))
	}

	fn variation_response(
		&self,
		flag: &Flag,
		variation: &Variation,
		reason: EvalReason,
		rule_id: Option<String>,
	) -> EvaluationResponse {
		EvaluationResponse {
			flag_key: flag.key.clone(),
			value: variation.value.clone(),
			variation_id: Some(variation.id.clone()),
			reason,
			rule_id,
			default: variation.value == flag.default_value,
			timestamp: Utc::now(),
			eval_time_ms: 0.0,
			source: ResponseSource::Default,
		}
	}
}

/// Walks allocations in definition order, accumulating `weight * 100`
/// against the subject's bucket. The first block whose cumulative weight
/// exceeds the bucket wins; adding a new allocation at the end never moves
/// subjects bucketed below the previous total.
fn pick_allocation<'a>(
	flag: &'a Flag,
	rollout: &RolloutConfig,
	bucket_key: &str,
) -> Option<&'a Variation> {
	let bucket = bucket_for(&flag.key, bucket_key, rollout.seed());

	let mut cumulative = 0u32;
	for allocation in &rollout.allocations {
		cumulative += allocation.weight * 100;
		if bucket < cumulative {
			match flag.variation(&allocation.variation_id) {
				Some(variation) => return Some(variation),
				None => {
					warn!(
						flag_key = %flag.key,
						variation_id = %allocation.variation_id,
						"allocation references missing variation"
					);
					return None;
				}
			}
		}
	}
	None
}

fn sticky_expiry(rollout: &RolloutConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
	rollout
		.sticky_ttl_secs
		.and_then(|secs| i64::try_from(secs).ok())
		.map(|secs| now + Duration::seconds(secs))
}
