// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::subject::Subject;

/// Why an evaluation produced its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalReason {
	RuleMatch,
	SegmentMatch,
	PercentageRollout,
	Default,
	FlagDisabled,
	Error,
}

/// Where an evaluation response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
	EdgeCache,
	ResponseCache,
	Hub,
	Default,
}

/// A single flag evaluation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub project: Option<String>,
	pub flag_key: String,
	pub user_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_key: Option<String>,
	#[serde(default)]
	pub attributes: HashMap<String, Value>,
	/// Overrides the server's default environment when present.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub environment: Option<String>,
}

impl EvaluationRequest {
	/// Builds the subject this request evaluates.
	pub fn subject(&self) -> Subject {
		Subject {
			id: self.user_id.clone(),
			key: self.user_key.clone(),
			attributes: self.attributes.clone(),
		}
	}

	/// Stable fingerprint for response memoization: SHA-256 over the flag
	/// key, environment, subject identity and sorted attributes, truncated
	/// to 32 hex chars. Identical requests within a memo window hash to
	/// the same entry.
	pub fn fingerprint(&self, environment: &str) -> String {
		let mut hasher = Sha256::new();
		hasher.update(self.flag_key.as_bytes());
		hasher.update(b"\x1f");
		hasher.update(environment.as_bytes());
		hasher.update(b"\x1f");
		hasher.update(self.user_id.as_bytes());
		hasher.update(b"\x1f");
		if let Some(key) = &self.user_key {
			hasher.update(key.as_bytes());
		}

		let mut attrs: Vec<(&String, &Value)> = self.attributes.iter().collect();
		attrs.sort_by(|a, b| a.0.cmp(b.0));
		for (name, value) in attrs {
			hasher.update(b"\x1f");
			hasher.update(name.as_bytes());
			hasher.update(b"=");
			hasher.update(value.to_string().as_bytes());
		}

		let digest = hasher.finalize();
		hex::encode(&digest[..16])
	}
}

/// The outcome of evaluating one flag for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResponse {
	pub flag_key: String,
	pub value: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub variation_id: Option<String>,
	pub reason: EvalReason,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rule_id: Option<String>,
	/// True whenever the returned value is the flag's default.
	pub default: bool,
	pub timestamp: DateTime<Utc>,
	pub eval_time_ms: f64,
	pub source: ResponseSource,
}

impl EvaluationResponse {
	/// A default-valued response with the given reason.
	pub fn default_value(flag_key: &str, value: Value, reason: EvalReason) -> Self {
		EvaluationResponse {
			flag_key: flag_key.to_string(),
			value,
			variation_id: None,
			reason,
			rule_id: None,
			default: true,
			timestamp: Utc::now(),
			eval_time_ms: 0.0,
			source: ResponseSource::Default,
		}
	}
}

/// Batch evaluation result: one entry per requested flag, where each entry
/// is either a response or an isolated per-flag error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchEntry {
	Ok(EvaluationResponse),
	Err { error: String },
}

/// Response envelope for `POST /evaluate/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEvaluationResponse {
	pub results: HashMap<String, BatchEntry>,
	pub evaluation_time_ms: f64,
	pub flags_evaluated: usize,
}
