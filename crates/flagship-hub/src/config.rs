// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Hub configuration, loaded once at boot from environment variables with
//! explicit defaults.

use std::time::Duration;

/// Runtime configuration for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
	/// Address the HTTP server binds to.
	pub host: String,
	pub port: u16,
	/// SQLite connection string, e.g. `sqlite:./flagship.db`.
	pub database_url: String,
	/// Keepalive period for edge streams. Unhealthy past 2x, disconnected
	/// past 4x.
	pub heartbeat_interval: Duration,
	/// Outbound queue capacity per connected edge.
	pub edge_queue_size: usize,
	/// How long disconnected fleet records are retained before eviction.
	pub fleet_retention: Duration,
	/// Environment assumed when an evaluation request carries none.
	pub default_environment: String,
	/// Static bearer token accepted on admin routes. The admin UI's real
	/// token service is an external collaborator; this is its contract
	/// surface.
	pub admin_token: Option<String>,
	/// Default tracing filter when RUST_LOG is unset.
	pub log_level: String,
}

impl Default for HubConfig {
	fn default() -> Self {
		HubConfig {
			host: "0.0.0.0".to_string(),
			port: 8080,
			database_url: "sqlite:./flagship.db".to_string(),
			heartbeat_interval: Duration::from_secs(30),
			edge_queue_size: 1024,
			fleet_retention: Duration::from_secs(3600),
			default_environment: "production".to_string(),
			admin_token: None,
			log_level: "info".to_string(),
		}
	}
}

impl HubConfig {
	/// Loads configuration from the environment, falling back to defaults.
	pub fn from_env() -> Self {
		let defaults = HubConfig::default();
		HubConfig {
			host: env_var("HUB_HOST").unwrap_or(defaults.host),
			port: env_parsed("HUB_PORT").unwrap_or(defaults.port),
			database_url: env_var("DATABASE_URL").unwrap_or(defaults.database_url),
			heartbeat_interval: env_parsed("HEARTBEAT_INTERVAL")
				.map(Duration::from_secs)
				.unwrap_or(defaults.heartbeat_interval),
			edge_queue_size: env_parsed("BUFFER_SIZE").unwrap_or(defaults.edge_queue_size),
			fleet_retention: env_parsed("FLEET_RETENTION")
				.map(Duration::from_secs)
				.unwrap_or(defaults.fleet_retention),
			default_environment: env_var("DEFAULT_ENVIRONMENT")
				.unwrap_or(defaults.default_environment),
			admin_token: env_var("ADMIN_TOKEN"),
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
		let config = HubConfig::default();
		assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
		assert_eq!(config.edge_queue_size, 1024);
		assert_eq!(config.fleet_retention, Duration::from_secs(3600));
	}
}
