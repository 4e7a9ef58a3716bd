// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Edge configuration, loaded once at boot from environment variables with
//! explicit defaults. No mutable globals; everything downstream receives
//! this by constructor injection.

use std::time::Duration;
use uuid::Uuid;

/// Which stream transport the sync client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
	/// Bidirectional upgrade on top of HTTP.
	WebSocket,
	/// One-directional server-push stream with line-oriented framing.
	Sse,
}

impl SyncType {
	pub fn as_str(&self) -> &'static str {
		match self {
			SyncType::WebSocket => "websocket",
			SyncType::Sse => "sse",
		}
	}
}

impl std::str::FromStr for SyncType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"websocket" | "ws" => Ok(SyncType::WebSocket),
			"sse" => Ok(SyncType::Sse),
			other => Err(format!("unknown sync type '{other}'")),
		}
	}
}

/// Runtime configuration for an edge server.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
	/// Base URL of the hub, e.g. `http://hub.internal:8080`.
	pub hub_url: String,
	/// API key presented to the hub for sync and streaming.
	pub api_key: String,
	/// Address this edge's HTTP server binds to.
	pub host: String,
	pub port: u16,
	/// Environment this edge serves.
	pub environment: String,
	/// Project scope, or "all".
	pub project: String,
	/// Stable identifier sent in the stream handshake.
	pub server_id: String,
	pub region: Option<String>,
	/// Response-memo TTL.
	pub cache_ttl: Duration,
	pub max_flags: usize,
	pub max_api_keys: usize,
	pub max_responses: usize,
	/// Tick for cache sweeps and sticky expiry.
	pub cleanup_interval: Duration,
	pub sync_type: SyncType,
	/// Base delay between reconnect attempts.
	pub reconnect_interval: Duration,
	/// Expected hub ping cadence; three missed pings force a reconnect.
	pub heartbeat_interval: Duration,
	/// Reconnect attempts before giving up; 0 means retry forever.
	pub max_retries: u32,
	/// Capacity of the update channel between stream and cache worker.
	pub buffer_size: usize,
	/// Default tracing filter when RUST_LOG is unset.
	pub log_level: String,
}

impl Default for EdgeConfig {
	fn default() -> Self {
		EdgeConfig {
			hub_url: "http://localhost:8080".to_string(),
			api_key: String::new(),
			host: "0.0.0.0".to_string(),
			port: 8081,
			environment: "production".to_string(),
			project: "all".to_string(),
			server_id: format!("edge-{}", Uuid::new_v4()),
			region: None,
			cache_ttl: Duration::from_secs(30),
			max_flags: 10_000,
			max_api_keys: 1_000,
			max_responses: 10_000,
			cleanup_interval: Duration::from_secs(30),
			sync_type: SyncType::WebSocket,
			reconnect_interval: Duration::from_secs(30),
			heartbeat_interval: Duration::from_secs(30),
			max_retries: 0,
			buffer_size: 1_000,
			log_level: "info".to_string(),
		}
	}
}

impl EdgeConfig {
	/// Loads configuration from the environment, falling back to defaults.
	pub fn from_env() -> Self {
		let defaults = EdgeConfig::default();
		EdgeConfig {
			hub_url: env_var("HUB_URL").unwrap_or(defaults.hub_url),
			api_key: env_var("EDGE_API_KEY").unwrap_or(defaults.api_key),
			host: env_var("EDGE_HOST").unwrap_or(defaults.host),
			port: env_parsed("EDGE_PORT").unwrap_or(defaults.port),
			environment: env_var("EDGE_ENVIRONMENT").unwrap_or(defaults.environment),
			project: env_var("EDGE_PROJECT").unwrap_or(defaults.project),
			server_id: env_var("EDGE_SERVER_ID").unwrap_or(defaults.server_id),
			region: env_var("EDGE_REGION"),
			cache_ttl: env_parsed("CACHE_TTL")
				.map(Duration::from_secs)
				.unwrap_or(defaults.cache_ttl),
			max_flags: env_parsed("MAX_FLAGS").unwrap_or(defaults.max_flags),
			max_api_keys: env_parsed("MAX_API_KEYS").unwrap_or(defaults.max_api_keys),
			max_responses: env_parsed("MAX_RESPONSES").unwrap_or(defaults.max_responses),
			cleanup_interval: env_parsed("CLEANUP_INTERVAL")
				.map(Duration::from_secs)
				.unwrap_or(defaults.cleanup_interval),
			sync_type: env_parsed("SYNC_TYPE").unwrap_or(defaults.sync_type),
			reconnect_interval: env_parsed("RECONNECT_INTERVAL")
				.map(Duration::from_secs)
				.unwrap_or(defaults.reconnect_interval),
			heartbeat_interval: env_parsed("HEARTBEAT_INTERVAL")
				.map(Duration::from_secs)
				.unwrap_or(defaults.heartbeat_interval),
			max_retries: env_parsed("MAX_RETRIES").unwrap_or(defaults.max_retries),
			buffer_size: env_parsed("BUFFER_SIZE").unwrap_or(defaults.buffer_size),
			log_level: env_var("LOG_LEVEL").unwrap_or(defaults.log_level),
		}
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
	env_var(name).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_documented_values() {
		let config = EdgeConfig::default();
		assert_eq!(config.cache_ttl, Duration::from_secs(30));
		assert_eq!(config.reconnect_interval, Duration::from_secs(30));
		assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
		assert_eq!(config.buffer_size, 1_000);
		assert_eq!(config.cleanup_interval, Duration::from_secs(30));
	}

	#[test]
	fn sync_type_parses() {
		assert_eq!("websocket".parse::<SyncType>(), Ok(SyncType::WebSocket));
		assert_eq!("SSE".parse::<SyncType>(), Ok(SyncType::Sse));
		assert!("carrier-pigeon".parse::<SyncType>().is_err());
	}
}
