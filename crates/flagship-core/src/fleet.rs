// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fleet records: the hub's view of connected edge servers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Health of an edge's stream connection, derived from ping recency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeLiveness {
	Connected,
	Unhealthy,
	Disconnected,
}

/// One connected (or recently connected) edge server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeServerRecord {
	pub server_id: String,
	/// Project scope, or "all".
	pub project: String,
	pub environment: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub region: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub remote_addr: Option<String>,
	pub connected_at: DateTime<Utc>,
	pub last_ping: DateTime<Utc>,
	pub liveness: EdgeLiveness,
}

impl EdgeServerRecord {
	/// Liveness derived from ping age: unhealthy past 2x the keepalive
	/// period, disconnected past 4x.
	pub fn derived_liveness(&self, now: DateTime<Utc>, heartbeat: Duration) -> EdgeLiveness {
		let silence = now - self.last_ping;
		if silence > heartbeat * 4 {
			EdgeLiveness::Disconnected
		} else if silence > heartbeat * 2 {
			EdgeLiveness::Unhealthy
		} else {
			EdgeLiveness::Connected
		}
	}

	/// True once a disconnected record has aged past the eviction window.
	pub fn evictable(&self, now: DateTime<Utc>, retention: Duration) -> bool {
		self.liveness == EdgeLiveness::Disconnected && now - self.last_ping > retention
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(last_ping_ago: Duration) -> EdgeServerRecord {
		let now = Utc::now();
		EdgeServerRecord {
			server_id: "edge-1".to_string(),
			project: "all".to_string(),
			environment: "prod".to_string(),
			region: Some("eu-west".to_string()),
			version: None,
			remote_addr: None,
			connected_at: now - last_ping_ago,
			last_ping: now - last_ping_ago,
			liveness: EdgeLiveness::Connected,
		}
	}

	#[test]
	fn liveness_thresholds() {
		let now = Utc::now();
		let heartbeat = Duration::seconds(30);

		assert_eq!(
			record(Duration::seconds(10)).derived_liveness(now, heartbeat),
			EdgeLiveness::Connected
		);
		assert_eq!(
			record(Duration::seconds(90)).derived_liveness(now, heartbeat),
			EdgeLiveness::Unhealthy
		);
		assert_eq!(
			record(Duration::seconds(200)).derived_liveness(now, heartbeat),
			EdgeLiveness::Disconnected
		);
	}

	#[test]
	fn eviction_requires_disconnected_and_age() {
		let now = Utc::now();
		let retention = Duration::hours(1);

		let mut rec = record(Duration::hours(2));
		assert!(!rec.evictable(now, retention));

		rec.liveness = EdgeLiveness::Disconnected;
		assert!(rec.evictable(now, retention));

		let mut fresh = record(Duration::minutes(5));
		fresh.liveness = EdgeLiveness::Disconnected;
		assert!(!fresh.evictable(now, retention));
	}
}
