// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSE stream transport.
//!
//! One-directional server push: the handshake rides in the query string
//! and the hub's periodic pings double as the liveness signal. Three
//! missed pings (no event past the idle deadline) abort the connection so
//! the client reconnects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use flagship_core::{EdgeHello, StreamEvent};

use crate::config::EdgeConfig;
use crate::error::{EdgeError, Result};
use crate::sync::{SyncTransport, TransportState};

/// Server-push transport over `GET /edge/stream/sse`.
pub struct SseTransport {
	hub_url: String,
	api_key: String,
	hello: EdgeHello,
	idle_timeout: Duration,
	http: reqwest::Client,
	state: Arc<TransportState>,
}

impl SseTransport {
	pub fn new(config: &EdgeConfig, hello: EdgeHello) -> Self {
		SseTransport {
			hub_url: config.hub_url.clone(),
			api_key: config.api_key.clone(),
			hello,
			// Three silent heartbeat periods mean the hub is gone.
			idle_timeout: config.heartbeat_interval * 3,
			http: reqwest::Client::new(),
			state: Arc::new(TransportState::default()),
		}
	}
}

#[async_trait]
impl SyncTransport for SseTransport {
	async fn run(&self, events: &mpsc::Sender<StreamEvent>) -> Result<()> {
		let url = format!("{}/edge/stream/sse", self.hub_url);
		let mut query: Vec<(&str, &str)> = vec![
			("server_id", &self.hello.server_id),
			("project", &self.hello.project),
		];
		if let Some(region) = &self.hello.region {
			query.push(("region", region));
		}
		if let Some(version) = &self.hello.version {
			query.push(("version", version));
		}

		let response = self
			.http
			.get(&url)
			.query(&query)
			.header("X-API-Key", &self.api_key)
			.header("Accept", "text/event-stream")
			.header("Cache-Control", "no-cache")
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(EdgeError::HubStatus {
				status: response.status().as_u16(),
				message: response.text().await.unwrap_or_default(),
			});
		}

		self.state.set_connected(true);
		let result = self.pump(response, events).await;
		self.state.set_connected(false);
		result
	}

	fn is_connected(&self) -> bool {
		self.state.connected()
	}

	fn last_event_time(&self) -> Option<DateTime<Utc>> {
		self.state.last_event()
	}

	fn name(&self) -> &'static str {
		"sse"
	}
}

impl SseTransport {
	async fn pump(
		&self,
		response: reqwest::Response,
		events: &mpsc::Sender<StreamEvent>,
	) -> Result<()> {
		let mut stream = response.bytes_stream().eventsource();

		loop {
			let next = tokio::time::timeout(self.idle_timeout, stream.next()).await;
			let event = match next {
				Err(_) => {
					return Err(EdgeError::HubUnreachable(
						"stream idle past ping deadline".to_string(),
					));
				}
				Ok(None) => return Ok(()),
				Ok(Some(Err(e))) => return Err(EdgeError::HubUnreachable(e.to_string())),
				Ok(Some(Ok(event))) => event,
			};

			self.state.stamp_event();

			if event.data.is_empty() {
				continue;
			}

			let stream_event: StreamEvent = match serde_json::from_str(&event.data) {
				Ok(parsed) => parsed,
				Err(e) => {
					warn!(data = %event.data, error = %e, "unparseable stream event");
					continue;
				}
			};

			debug!(event_type = stream_event.event_type(), "stream event");
			if events.send(stream_event).await.is_err() {
				// Receiver gone: the client is shutting down.
				return Ok(());
			}
		}
	}
}
