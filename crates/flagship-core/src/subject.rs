// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The subject of an evaluation: a user (or other entity) identified by id
//! and optional stable key, plus free-form attributes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Entity a flag is evaluated for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subject {
	/// Primary identifier (e.g. a user id).
	pub id: String,
	/// Stable bucketing key; falls back to `id` when absent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub key: Option<String>,
	/// Attributes read by targeting rules. Lookup is case-sensitive.
	#[serde(default)]
	pub attributes: HashMap<String, Value>,
}

impl Subject {
	pub fn new(id: impl Into<String>) -> Self {
		Subject {
			id: id.into(),
			key: None,
			attributes: HashMap::new(),
		}
	}

	pub fn with_key(mut self, key: impl Into<String>) -> Self {
		self.key = Some(key.into());
		self
	}

	pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
		self.attributes.insert(name.into(), value);
		self
	}

	/// Reads a targeting attribute. `user_id` and `user_key` resolve to the
	/// identity fields so rules can target them without duplication into
	/// the attribute map.
	pub fn attribute(&self, name: &str) -> Option<Value> {
		match name {
			"user_id" => Some(Value::String(self.id.clone())),
			"user_key" => self
				.key
				.as_ref()
				.map(|k| Value::String(k.clone()))
				.or_else(|| Some(Value::String(self.id.clone()))),
			_ => self.attributes.get(name).cloned(),
		}
	}

	/// Resolves the bucket key for a rollout's `bucket_by` attribute,
	/// falling back to the subject key, then the id.
	pub fn bucket_key(&self, bucket_by: &str) -> String {
		if let Some(value) = self.attributes.get(bucket_by) {
			if let Some(text) = value_text(value) {
				return text;
			}
		}
		if bucket_by == "user_key" || self.attributes.get(bucket_by).is_none() {
			if let Some(key) = &self.key {
				return key.clone();
			}
		}
		self.id.clone()
	}
}

fn value_text(value: &Value) -> Option<String> {
	match value {
		Value::String(s) => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn bucket_key_prefers_named_attribute() {
		let subject = Subject::new("u1")
			.with_key("alice")
			.with_attribute("tenant", json!("acme"));
		assert_eq!(subject.bucket_key("tenant"), "acme");
	}

	#[test]
	fn bucket_key_falls_back_to_key_then_id() {
		let with_key = Subject::new("u1").with_key("alice");
		assert_eq!(with_key.bucket_key("user_key"), "alice");

		let without_key = Subject::new("u1");
		assert_eq!(without_key.bucket_key("user_key"), "u1");
		assert_eq!(without_key.bucket_key("missing_attr"), "u1");
	}

	#[test]
	fn attribute_exposes_identity_fields() {
		let subject = Subject::new("u1").with_key("alice");
		assert_eq!(subject.attribute("user_id"), Some(json!("u1")));
		assert_eq!(subject.attribute("user_key"), Some(json!("alice")));
		assert_eq!(subject.attribute("plan"), None);
	}
}
