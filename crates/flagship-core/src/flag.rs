// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag, variation, targeting and rollout types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::error::{FlagError, Result};
use crate::operator::Operator;

/// Unique identifier for a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagId(pub Uuid);

impl FlagId {
	pub fn new() -> Self {
		FlagId(Uuid::new_v4())
	}
}

impl Default for FlagId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for FlagId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl std::str::FromStr for FlagId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(FlagId(Uuid::parse_str(s)?))
	}
}

/// The value kind a flag resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
	Boolean,
	String,
	Number,
	Json,
	Variant,
}

impl FlagKind {
	/// All supported kinds, for validation error messages.
	pub const ALL: &'static [FlagKind] = &[
		FlagKind::Boolean,
		FlagKind::String,
		FlagKind::Number,
		FlagKind::Json,
		FlagKind::Variant,
	];
}

impl fmt::Display for FlagKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			FlagKind::Boolean => "boolean",
			FlagKind::String => "string",
			FlagKind::Number => "number",
			FlagKind::Json => "json",
			FlagKind::Variant => "variant",
		};
		f.write_str(s)
	}
}

impl std::str::FromStr for FlagKind {
	type Err = FlagError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"boolean" => Ok(FlagKind::Boolean),
			"string" => Ok(FlagKind::String),
			"number" => Ok(FlagKind::Number),
			"json" => Ok(FlagKind::Json),
			"variant" => Ok(FlagKind::Variant),
			other => Err(FlagError::invalid(
				"kind",
				format!("unknown flag kind '{other}'"),
			)),
		}
	}
}

/// One of the values a flag can resolve to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
	/// Identifier referenced by targeting rules and rollout allocations.
	/// Unique within a flag.
	pub id: String,
	pub name: String,
	/// Opaque JSON value returned to callers.
	pub value: serde_json::Value,
	/// Rollout weight in [0, 100]. Ignored outside rollouts.
	#[serde(default)]
	pub weight: u32,
}

/// A predicate over subject attributes selecting a variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingRule {
	pub id: String,
	/// Attribute read from the subject. Lookup is case-sensitive.
	pub attribute: String,
	pub operator: Operator,
	/// Operand set. Single-operand operators use the first element;
	/// `in`/`not_in` match against the whole set.
	pub values: Vec<serde_json::Value>,
	/// Variation returned when the rule matches.
	pub variation_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
}

/// Reference from a flag to a segment, mapping matching subjects to a
/// variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMatch {
	pub segment_key: String,
	pub variation_id: String,
	/// Segment rules materialized by the hub when serving edges, so edges
	/// evaluate segments without a segment store of their own. Empty until
	/// materialized; the engine then falls back to its segment source.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub rules: Vec<TargetingRule>,
}

/// How a rollout allocates subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloutKind {
	Percentage,
	Experiment,
	Segment,
}

/// One variation's share of a rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
	pub variation_id: String,
	/// Weight in [0, 100]; allocations across a rollout sum to 100.
	pub weight: u32,
}

/// Probabilistic allocation of subjects to variations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutConfig {
	pub kind: RolloutKind,
	/// Walked in definition order when bucketing; order is part of the
	/// contract (monotonic bucketing depends on it).
	pub allocations: Vec<Allocation>,
	/// Subject attribute fed into the bucket hash.
	#[serde(default = "default_bucket_by")]
	pub bucket_by: String,
	/// Optional hash seed; lets operators rebucket a flag deliberately.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub seed: Option<u64>,
	/// When set, the first computed assignment is persisted and reused.
	#[serde(default)]
	pub sticky: bool,
	/// Lifetime of sticky assignments in seconds; `None` means no expiry.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sticky_ttl_secs: Option<u64>,
}

fn default_bucket_by() -> String {
	"user_key".to_string()
}

impl RolloutConfig {
	/// Effective seed for bucket hashing.
	pub fn seed(&self) -> u64 {
		self.seed.unwrap_or(0)
	}
}

/// Targeting configuration: ordered rules, referenced segments, optional
/// rollout. Absent config means the flag always returns its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingConfig {
	/// Evaluated in order; first match wins.
	#[serde(default)]
	pub rules: Vec<TargetingRule>,
	/// Checked after rules, in order.
	#[serde(default)]
	pub segments: Vec<SegmentMatch>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rollout: Option<RolloutConfig>,
}

impl TargetingConfig {
	/// True when no rule, segment or rollout is configured.
	pub fn is_empty(&self) -> bool {
		self.rules.is_empty() && self.segments.is_empty() && self.rollout.is_none()
	}
}

/// A feature flag, scoped to a (project, key, environment) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
	pub id: FlagId,
	pub project: String,
	pub key: String,
	pub environment: String,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub kind: FlagKind,
	pub enabled: bool,
	/// Value returned when the flag is disabled or nothing targets the
	/// subject. Opaque JSON.
	pub default_value: serde_json::Value,
	#[serde(default)]
	pub variations: Vec<Variation>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub targeting: Option<TargetingConfig>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	/// Tombstone. Archived flags propagate as `delete` updates.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub archived_at: Option<DateTime<Utc>>,
}

impl Flag {
	/// Creates a disabled flag with a `false`/empty default for its kind.
	pub fn new(
		project: impl Into<String>,
		key: impl Into<String>,
		environment: impl Into<String>,
		kind: FlagKind,
	) -> Self {
		let now = Utc::now();
		let key = key.into();
		Flag {
			id: FlagId::new(),
			project: project.into(),
			name: key.clone(),
			key,
			environment: environment.into(),
			description: None,
			kind,
			enabled: false,
			default_value: match kind {
				FlagKind::Boolean => serde_json::Value::Bool(false),
				FlagKind::String | FlagKind::Variant => serde_json::Value::String(String::new()),
				FlagKind::Number => serde_json::json!(0),
				FlagKind::Json => serde_json::json!({}),
			},
			variations: Vec::new(),
			targeting: None,
			created_at: now,
			updated_at: now,
			archived_at: None,
		}
	}

	pub fn is_archived(&self) -> bool {
		self.archived_at.is_some()
	}

	/// True when any rule, segment or rollout is configured. Precomputed
	/// into the edge cache so the hot path can skip targeting entirely.
	pub fn has_targeting(&self) -> bool {
		self.targeting.as_ref().is_some_and(|t| !t.is_empty())
	}

	/// Looks up a variation by id.
	pub fn variation(&self, id: &str) -> Option<&Variation> {
		self.variations.iter().find(|v| v.id == id)
	}

	/// Validates the flag key format.
	///
	/// Valid keys:
	/// - Start with a lowercase letter
	/// - Lowercase alphanumeric with `_`, `.`, `-`
	/// - 3-100 characters
	pub fn validate_key(key: &str) -> bool {
		if key.len() < 3 || key.len() > 100 {
			return false;
		}

		let mut chars = key.chars();
		match chars.next() {
			Some(c) if c.is_ascii_lowercase() => {}
			_ => return false,
		}

		chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'))
	}

	/// Validates structural invariants: unique variation ids, variation
	/// references from targeting, and rollout weight sums.
	pub fn validate(&self) -> Result<()> {
		if !Self::validate_key(&self.key) {
			return Err(FlagError::invalid("key", "malformed flag key"));
		}

		let mut seen = HashSet::new();
		for variation in &self.variations {
			if !seen.insert(variation.id.as_str()) {
				return Err(FlagError::invalid(
					"variations",
					format!("duplicate variation id '{}'", variation.id),
				));
			}
			if variation.weight > 100 {
				return Err(FlagError::invalid(
					"variations",
					format!("variation '{}' weight exceeds 100", variation.id),
				));
			}
		}

		let Some(targeting) = &self.targeting else {
			return Ok(());
		};

		for rule in &targeting.rules {
			if self.variation(&rule.variation_id).is_none() {
				return Err(FlagError::invalid(
					"rules",
					format!(
						"rule '{}' references unknown variation '{}'",
						rule.id, rule.variation_id
					),
				));
			}
		}

		for segment in &targeting.segments {
			if self.variation(&segment.variation_id).is_none() {
				return Err(FlagError::invalid(
					"segments",
					format!(
						"segment '{}' references unknown variation '{}'",
						segment.segment_key, segment.variation_id
					),
				));
			}
		}

		if let Some(rollout) = &targeting.rollout {
			if rollout.allocations.is_empty() {
				return Err(FlagError::invalid("rollout", "rollout has no allocations"));
			}
			let total: u32 = rollout.allocations.iter().map(|a| a.weight).sum();
			if total != 100 {
				return Err(FlagError::invalid(
					"rollout",
					format!("allocation weights sum to {total}, expected 100"),
				));
			}
			for allocation in &rollout.allocations {
				if self.variation(&allocation.variation_id).is_none() {
					return Err(FlagError::invalid(
						"rollout",
						format!(
							"allocation references unknown variation '{}'",
							allocation.variation_id
						),
					));
				}
			}
		}

		Ok(())
	}
}
