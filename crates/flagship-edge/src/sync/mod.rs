// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Hub synchronization: bulk catch-up plus a persistent update stream.
//!
//! Two collaborating tasks keep the cache fresh:
//!
//! - the **stream loop** runs the configured transport forever,
//!   reconnecting with backoff and re-running a full sync after each
//!   reconnect to close any gap (delivery is at-least-once; applying
//!   updates is idempotent because each carries the full flag state);
//! - the **worker** drains the bounded update channel into the cache.
//!
//! Shutdown cancels the stream loop; the worker drains what is left and
//! exits when the channel closes.

pub mod sse;
pub mod ws;

pub use sse::SseTransport;
pub use ws::WsTransport;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use flagship_core::{EdgeHello, Flag, StreamEvent, SyncSnapshot};

use crate::cache::EdgeCache;
use crate::config::{EdgeConfig, SyncType};
use crate::error::{EdgeError, Result};

/// Cap on the exponential reconnect backoff.
const MAX_BACKOFF: std::time::Duration = std::time::Duration::from_secs(300);

/// A stream transport. One `run` call is one connection: handshake,
/// forward decoded events into the channel, and return when the stream
/// ends, errors, or goes silent past the ping deadline.
#[async_trait]
pub trait SyncTransport: Send + Sync {
	async fn run(&self, events: &mpsc::Sender<StreamEvent>) -> Result<()>;
	fn is_connected(&self) -> bool;
	fn last_event_time(&self) -> Option<DateTime<Utc>>;
	fn name(&self) -> &'static str;
}

/// Connection state shared by both transport implementations.
#[derive(Default)]
pub(crate) struct TransportState {
	connected: AtomicBool,
	last_event: std::sync::RwLock<Option<DateTime<Utc>>>,
}

impl TransportState {
	pub(crate) fn set_connected(&self, connected: bool) {
		self.connected.store(connected, Ordering::SeqCst);
	}

	pub(crate) fn connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}

	pub(crate) fn stamp_event(&self) {
		if let Ok(mut last) = self.last_event.write() {
			*last = Some(Utc::now());
		}
	}

	pub(crate) fn last_event(&self) -> Option<DateTime<Utc>> {
		self.last_event.read().ok().and_then(|v| *v)
	}
}

/// Sync status surfaced through the edge's health endpoint.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SyncStatus {
	pub connected: bool,
	pub transport: String,
	pub last_sync: Option<DateTime<Utc>>,
	pub last_event: Option<DateTime<Utc>>,
}

/// Owns the transport, the update channel and the background tasks.
pub struct SyncClient {
	config: Arc<EdgeConfig>,
	cache: Arc<EdgeCache>,
	transport: Arc<dyn SyncTransport>,
	http: reqwest::Client,
	last_sync: RwLock<Option<DateTime<Utc>>>,
	/// Cleared after the first `connected` ack so boot does not double
	/// sync; every later ack means a reconnect and triggers catch-up.
	first_connect: AtomicBool,
	handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SyncClient {
	pub fn new(config: Arc<EdgeConfig>, cache: Arc<EdgeCache>) -> Self {
		let hello = EdgeHello {
			server_id: config.server_id.clone(),
			region: config.region.clone(),
			version: Some(env!("CARGO_PKG_VERSION").to_string()),
			project: config.project.clone(),
			environment: config.environment.clone(),
		};

		let transport: Arc<dyn SyncTransport> = match config.sync_type {
			SyncType::Sse => Arc::new(SseTransport::new(&config, hello)),
			SyncType::WebSocket => Arc::new(WsTransport::new(&config, hello)),
		};

		SyncClient {
			transport,
			http: reqwest::Client::new(),
			cache,
			config,
			last_sync: RwLock::new(None),
			first_connect: AtomicBool::new(true),
			handles: std::sync::Mutex::new(Vec::new()),
		}
	}

	/// One-shot bulk catch-up: fetch the snapshot, swap each environment's
	/// flags, and reload the API-key records.
	pub async fn full_sync(&self) -> Result<()> {
		let url = format!("{}/edge/sync", self.config.hub_url);
		let response = self
			.http
			.get(&url)
			.header("X-API-Key", &self.config.api_key)
			.timeout(std::time::Duration::from_secs(30))
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(EdgeError::HubStatus {
				status: response.status().as_u16(),
				message: response.text().await.unwrap_or_default(),
			});
		}

		let snapshot: SyncSnapshot = response.json().await?;
		let flag_count = snapshot.flags.len();
		let key_count = snapshot.api_keys.len();

		let mut by_environment: HashMap<String, Vec<Flag>> = HashMap::new();
		for flag in snapshot.flags {
			by_environment
				.entry(flag.environment.clone())
				.or_default()
				.push(flag);
		}
		for (environment, flags) in by_environment {
			self.cache.flags.bulk_replace(&environment, flags).await;
		}

		self.cache.api_keys.set_records(snapshot.api_keys).await;
		*self.last_sync.write().await = Some(Utc::now());

		info!(flags = flag_count, api_keys = key_count, "full sync complete");
		Ok(())
	}

	/// Starts the worker and the stream loop. Call once.
	pub async fn start(self: &Arc<Self>) {
		// Boot-time catch-up; a failure here is not fatal, the stream
		// loop will retry and re-sync.
		if let Err(e) = self.full_sync().await {
			warn!(error = %e, "initial full sync failed, continuing with empty cache");
		}

		let (events_tx, events_rx) = mpsc::channel(self.config.buffer_size);

		let worker = tokio::spawn(Self::worker_loop(self.clone(), events_rx));
		let stream = tokio::spawn(Self::stream_loop(self.clone(), events_tx));

		let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
		handles.push(worker);
		handles.push(stream);
	}

	/// Cancels the stream loop and lets the worker drain then exit.
	pub async fn stop(&self) {
		let handles: Vec<JoinHandle<()>> = {
			let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
			guard.drain(..).collect()
		};
		for handle in &handles {
			handle.abort();
		}
		for handle in handles {
			let _ = handle.await;
		}
	}

	pub async fn status(&self) -> SyncStatus {
		SyncStatus {
			connected: self.transport.is_connected(),
			transport: self.transport.name().to_string(),
			last_sync: *self.last_sync.read().await,
			last_event: self.transport.last_event_time(),
		}
	}

	/// Applies streamed events to the cache. Runs until the channel
	/// closes; on shutdown the remaining buffered updates still land.
	async fn worker_loop(client: Arc<SyncClient>, mut events: mpsc::Receiver<StreamEvent>) {
		while let Some(event) = events.recv().await {
			match event {
				StreamEvent::FlagUpdate(update) => {
					debug!(
						flag_key = %update.flag_key,
						action = ?update.action,
						"applying flag update"
					);
					client.cache.apply_update(&update).await;
				}
				StreamEvent::Connected { server_id, .. } => {
					info!(server_id = %server_id, "stream connected");
					// Each reconnect re-syncs to close the gap the stream
					// was down for.
					if !client.first_connect.swap(false, Ordering::SeqCst) {
						if let Err(e) = client.full_sync().await {
							warn!(error = %e, "post-reconnect full sync failed");
						}
					}
				}
				StreamEvent::Resync { .. } => {
					warn!("hub requested resync (queue overflow)");
					if let Err(e) = client.full_sync().await {
						warn!(error = %e, "requested resync failed");
					}
				}
				StreamEvent::Ping { .. } => {}
			}
		}
		debug!("update worker drained and stopped");
	}

	/// Runs the transport forever with exponential backoff between
	/// attempts.
	async fn stream_loop(client: Arc<SyncClient>, events: mpsc::Sender<StreamEvent>) {
		let mut consecutive_failures: u32 = 0;

		loop {
			info!(transport = client.transport.name(), "connecting update stream");

			match client.transport.run(&events).await {
				Ok(()) => {
					debug!("stream ended normally");
					consecutive_failures = 0;
				}
				Err(e) => {
					error!(error = %e, "stream error");
					consecutive_failures += 1;
				}
			}

			if client.config.max_retries > 0 && consecutive_failures >= client.config.max_retries {
				error!(
					attempts = consecutive_failures,
					"max reconnect attempts reached, stopping sync"
				);
				break;
			}

			let factor = 2u32.saturating_pow(consecutive_failures.min(6));
			let delay = client
				.config
				.reconnect_interval
				.saturating_mul(factor.max(1))
				.min(MAX_BACKOFF);

			warn!(
				delay_ms = delay.as_millis() as u64,
				attempts = consecutive_failures,
				"reconnecting update stream"
			);
			tokio::time::sleep(delay).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use flagship_core::{ApiKey, FlagKind, FlagUpdate, Permission, UpdateOp};
	use wiremock::matchers::{header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn config(hub_url: String) -> Arc<EdgeConfig> {
		Arc::new(EdgeConfig {
			hub_url,
			api_key: "fsk_production_testkey".to_string(),
			environment: "production".to_string(),
			..EdgeConfig::default()
		})
	}

	fn snapshot() -> SyncSnapshot {
		let mut flag = Flag::new("web", "dark-mode", "production", FlagKind::Boolean);
		flag.enabled = true;
		let mut staging = Flag::new("web", "dark-mode", "staging", FlagKind::Boolean);
		staging.enabled = false;

		SyncSnapshot {
			flags: vec![flag, staging],
			api_keys: vec![ApiKey {
				id: flagship_core::ApiKeyId::new(),
				project: "web".to_string(),
				environment: "production".to_string(),
				name: "edge".to_string(),
				key_hash: "$argon2id$stub".to_string(),
				key_prefix: "fsk_producti".to_string(),
				permissions: vec![Permission::Read],
				active: true,
				expires_at: None,
				created_at: Utc::now(),
				last_used_at: None,
			}],
			timestamp: Utc::now(),
		}
	}

	#[tokio::test]
	async fn full_sync_populates_all_layers() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/edge/sync"))
			.and(header("X-API-Key", "fsk_production_testkey"))
			.respond_with(ResponseTemplate::new(200).set_body_json(snapshot()))
			.mount(&server)
			.await;

		let config = config(server.uri());
		let cache = Arc::new(EdgeCache::new(&config));
		let client = SyncClient::new(config, cache.clone());

		client.full_sync().await.unwrap();

		assert!(cache.flags.get("dark-mode", "production").await.is_some());
		assert!(cache.flags.get("dark-mode", "staging").await.is_some());
		assert_eq!(cache.flags.len().await, 2);
		assert!(client.status().await.last_sync.is_some());
	}

	#[tokio::test]
	async fn full_sync_replaces_per_environment() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/edge/sync"))
			.respond_with(ResponseTemplate::new(200).set_body_json(snapshot()))
			.mount(&server)
			.await;

		let config = config(server.uri());
		let cache = Arc::new(EdgeCache::new(&config));
		// A flag the hub no longer has must vanish after catch-up.
		cache
			.flags
			.bulk_replace(
				"production",
				vec![Flag::new("web", "stale.flag", "production", FlagKind::Boolean)],
			)
			.await;

		let client = SyncClient::new(config, cache.clone());
		client.full_sync().await.unwrap();

		assert!(cache.flags.get("stale.flag", "production").await.is_none());
		assert!(cache.flags.get("dark-mode", "production").await.is_some());
	}

	#[tokio::test]
	async fn full_sync_propagates_auth_failure() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/edge/sync"))
			.respond_with(ResponseTemplate::new(401))
			.mount(&server)
			.await;

		let config = config(server.uri());
		let cache = Arc::new(EdgeCache::new(&config));
		let client = SyncClient::new(config, cache);

		assert!(matches!(
			client.full_sync().await,
			Err(EdgeError::HubStatus { status: 401, .. })
		));
	}

	#[tokio::test]
	async fn worker_applies_updates_and_flushes_memos() {
		let config = config("http://unreachable.invalid".to_string());
		let cache = Arc::new(EdgeCache::new(&config));
		let client = Arc::new(SyncClient::new(config, cache.clone()));

		let mut flag = Flag::new("web", "worker.flag", "production", FlagKind::Boolean);
		flag.enabled = true;
		cache
			.responses
			.put("fp".to_string(), "worker.flag".to_string(), vec![1])
			.await;

		let (tx, rx) = mpsc::channel(8);
		let worker = tokio::spawn(SyncClient::worker_loop(client, rx));

		let update = FlagUpdate::update(flag);
		assert_eq!(update.action, UpdateOp::Update);
		tx.send(StreamEvent::FlagUpdate(update)).await.unwrap();
		drop(tx);
		worker.await.unwrap();

		assert!(cache.flags.get("worker.flag", "production").await.is_some());
		assert!(cache.responses.get("fp").await.is_none());
	}
}
