// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sticky assignments: persisted pins mapping a subject to a variation for
//! a rollout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted variation pin. At most one live assignment exists per
/// (flag, environment, subject key); a later put replaces an earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StickyAssignment {
	pub flag_key: String,
	pub environment: String,
	pub subject_key: String,
	pub variation_id: String,
	/// The attribute value that was hashed when the assignment was made.
	pub bucket_key: String,
	pub assigned_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_at: Option<DateTime<Utc>>,
}

impl StickyAssignment {
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.expires_at.is_some_and(|exp| exp <= now)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;

	#[test]
	fn expiry_check() {
		let now = Utc::now();
		let mut assignment = StickyAssignment {
			flag_key: "exp.flag".to_string(),
			environment: "prod".to_string(),
			subject_key: "bob".to_string(),
			variation_id: "a".to_string(),
			bucket_key: "bob".to_string(),
			assigned_at: now,
			expires_at: None,
		};
		assert!(!assignment.is_expired(now));

		assignment.expires_at = Some(now + Duration::hours(1));
		assert!(!assignment.is_expired(now));
		assert!(assignment.is_expired(now + Duration::hours(2)));
	}
}
