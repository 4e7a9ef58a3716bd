// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! WebSocket stream transport.
//!
//! Bidirectional: the edge opens the upgrade with its API key, sends a
//! hello frame, then pings every heartbeat interval so the hub can track
//! liveness. Hub events arrive as JSON text frames.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use flagship_core::{EdgeHello, EdgeMessage, StreamEvent};

use crate::config::EdgeConfig;
use crate::error::{EdgeError, Result};
use crate::sync::{SyncTransport, TransportState};

/// Bidirectional transport over `GET /edge/stream/ws`.
pub struct WsTransport {
	ws_url: String,
	api_key: String,
	hello: EdgeHello,
	heartbeat: Duration,
	idle_timeout: Duration,
	state: Arc<TransportState>,
}

impl WsTransport {
	pub fn new(config: &EdgeConfig, hello: EdgeHello) -> Self {
		WsTransport {
			ws_url: ws_url(&config.hub_url),
			api_key: config.api_key.clone(),
			hello,
			heartbeat: config.heartbeat_interval,
			idle_timeout: config.heartbeat_interval * 3,
			state: Arc::new(TransportState::default()),
		}
	}
}

/// Derives the websocket endpoint from the hub's base URL.
fn ws_url(hub_url: &str) -> String {
	let base = hub_url.trim_end_matches('/');
	let converted = if let Some(rest) = base.strip_prefix("https://") {
		format!("wss://{rest}")
	} else if let Some(rest) = base.strip_prefix("http://") {
		format!("ws://{rest}")
	} else {
		base.to_string()
	};
	format!("{converted}/edge/stream/ws")
}

#[async_trait]
impl SyncTransport for WsTransport {
	async fn run(&self, events: &mpsc::Sender<StreamEvent>) -> Result<()> {
		let mut request = self
			.ws_url
			.as_str()
			.into_client_request()
			.map_err(|e| EdgeError::Internal(format!("invalid websocket url: {e}")))?;
		request.headers_mut().insert(
			"x-api-key",
			self.api_key
				.parse()
				.map_err(|_| EdgeError::Internal("api key is not a valid header value".to_string()))?,
		);

		let (socket, _) = connect_async(request)
			.await
			.map_err(|e| EdgeError::HubUnreachable(e.to_string()))?;
		let (mut write, mut read) = socket.split();

		// Handshake first; the hub registers us only after the hello.
		let hello = serde_json::to_string(&EdgeMessage::Hello(self.hello.clone()))?;
		write
			.send(Message::Text(hello))
			.await
			.map_err(|e| EdgeError::HubUnreachable(e.to_string()))?;

		self.state.set_connected(true);

		let mut ping = tokio::time::interval_at(
			tokio::time::Instant::now() + self.heartbeat,
			self.heartbeat,
		);
		ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		let result = loop {
			tokio::select! {
				_ = ping.tick() => {
					let ping_msg = EdgeMessage::Ping { timestamp: Utc::now() };
					let Ok(json) = serde_json::to_string(&ping_msg) else {
						continue;
					};
					if let Err(e) = write.send(Message::Text(json)).await {
						break Err(EdgeError::HubUnreachable(e.to_string()));
					}
				}
				next = tokio::time::timeout(self.idle_timeout, read.next()) => {
					match next {
						Err(_) => {
							break Err(EdgeError::HubUnreachable(
								"stream idle past ping deadline".to_string(),
							));
						}
						Ok(None) => break Ok(()),
						Ok(Some(Err(e))) => break Err(EdgeError::HubUnreachable(e.to_string())),
						Ok(Some(Ok(Message::Text(text)))) => {
							self.state.stamp_event();
							let stream_event: StreamEvent = match serde_json::from_str(&text) {
								Ok(parsed) => parsed,
								Err(e) => {
									warn!(error = %e, "unparseable stream frame");
									continue;
								}
							};
							debug!(event_type = stream_event.event_type(), "stream event");
							if events.send(stream_event).await.is_err() {
								break Ok(());
							}
						}
						Ok(Some(Ok(Message::Ping(data)))) => {
							self.state.stamp_event();
							if let Err(e) = write.send(Message::Pong(data)).await {
								break Err(EdgeError::HubUnreachable(e.to_string()));
							}
						}
						Ok(Some(Ok(Message::Close(_)))) => break Ok(()),
						Ok(Some(Ok(_))) => {}
					}
				}
			}
		};

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
		"websocket"
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ws_url_converts_schemes() {
		assert_eq!(
			ws_url("http://hub.internal:8080"),
			"ws://hub.internal:8080/edge/stream/ws"
		);
		assert_eq!(
			ws_url("https://hub.example.com/"),
			"wss://hub.example.com/edge/stream/ws"
		);
	}
}
