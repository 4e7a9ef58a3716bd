// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Segments: reusable named predicates over subject attributes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{FlagError, Result};
use crate::flag::{Flag, TargetingRule};

/// Unique identifier for a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub Uuid);

impl SegmentId {
	pub fn new() -> Self {
		SegmentId(Uuid::new_v4())
	}
}

impl Default for SegmentId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for SegmentId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// A named predicate shared across flags, scoped to a project. Rules use
/// the same grammar as flag targeting rules; a subject matches the segment
/// when any rule matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
	pub id: SegmentId,
	pub project: String,
	pub key: String,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	/// Checked in order; any match means the subject is in the segment.
	#[serde(default)]
	pub rules: Vec<TargetingRule>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub archived_at: Option<DateTime<Utc>>,
}

impl Segment {
	pub fn new(project: impl Into<String>, key: impl Into<String>) -> Self {
		let now = Utc::now();
		let key = key.into();
		Segment {
			id: SegmentId::new(),
			project: project.into(),
			name: key.clone(),
			key,
			description: None,
			rules: Vec::new(),
			created_at: now,
			updated_at: now,
			archived_at: None,
		}
	}

	pub fn is_archived(&self) -> bool {
		self.archived_at.is_some()
	}

	/// Segment keys use the same grammar as flag keys.
	pub fn validate_key(key: &str) -> bool {
		Flag::validate_key(key)
	}

	pub fn validate(&self) -> Result<()> {
		if !Self::validate_key(&self.key) {
			return Err(FlagError::invalid("key", "malformed segment key"));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::operator::Operator;

	#[test]
	fn segment_serde_roundtrip() {
		let mut segment = Segment::new("web", "beta-testers");
		segment.rules.push(TargetingRule {
			id: "r1".to_string(),
			attribute: "beta".to_string(),
			operator: Operator::Eq,
			values: vec![serde_json::json!(true)],
			variation_id: String::new(),
			description: None,
		});

		let json = serde_json::to_string(&segment).unwrap();
		let parsed: Segment = serde_json::from_str(&json).unwrap();
		assert_eq!(segment, parsed);
	}

	#[test]
	fn validate_rejects_bad_key() {
		let segment = Segment::new("web", "X");
		assert!(segment.validate().is_err());
	}
}
