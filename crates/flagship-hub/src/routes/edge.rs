// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Edge synchronization endpoints: bulk snapshot, the two stream
//! transports, key validation and fleet observability.
//!
//! Both transports speak [`StreamEvent`]s. The websocket is bidirectional
//! (edges send pings the hub uses for liveness); SSE is one-directional,
//! so the hub stamps liveness as long as it can still push pings to the
//! edge.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::Stream;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flagship_core::{
	ApiKey, ApiKeyScope, EdgeHello, EdgeMessage, Permission, StreamEvent, SyncSnapshot,
};

use crate::auth::authenticate;
use crate::auth_middleware::RequireApiKey;
use crate::dispatcher::{Dispatcher, EdgeServerInfo};
use crate::error::{HubError, Result};
use crate::state::AppState;

/// How long a websocket may stay silent before the handshake is abandoned.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Queue between the connection tasks and the socket writer.
const SOCKET_QUEUE: usize = 64;

fn require_read(key: &ApiKey) -> Result<()> {
	if key.has_permission(Permission::Read) {
		Ok(())
	} else {
		Err(HubError::Forbidden)
	}
}

/// `GET /edge/sync` - one-shot bulk snapshot scoped by the API key.
#[tracing::instrument(skip(state, key), fields(project = %key.project, environment = %key.environment))]
pub async fn sync(
	RequireApiKey(key): RequireApiKey,
	State(state): State<AppState>,
) -> Result<Json<SyncSnapshot>> {
	require_read(&key)?;
	let snapshot = state.service.snapshot(&key.project, &key.environment).await?;
	info!(
		flags = snapshot.flags.len(),
		api_keys = snapshot.api_keys.len(),
		"bulk sync served"
	);
	Ok(Json(snapshot))
}

/// Body for `POST /edge/auth`.
#[derive(Debug, Deserialize)]
pub struct AuthRequest {
	pub api_key: String,
}

/// `POST /edge/auth` - validates a key on behalf of an edge populating its
/// key cache. Returns the key's scope or 401.
#[tracing::instrument(skip(state, body))]
pub async fn auth(
	State(state): State<AppState>,
	Json(body): Json<AuthRequest>,
) -> Result<Json<ApiKeyScope>> {
	match authenticate(state.repo.as_ref(), &body.api_key).await? {
		Some(key) => Ok(Json(ApiKeyScope::from(&key))),
		None => Err(HubError::Unauthorized),
	}
}

/// Response for `GET /edge/servers`.
#[derive(Debug, serde::Serialize, Deserialize)]
pub struct ServersResponse {
	pub servers: Vec<EdgeServerInfo>,
	pub dropped_updates: u64,
}

/// `GET /edge/servers` - fleet observability.
pub async fn servers(
	RequireApiKey(key): RequireApiKey,
	State(state): State<AppState>,
) -> Result<Json<ServersResponse>> {
	require_read(&key)?;
	Ok(Json(ServersResponse {
		servers: state.dispatcher.servers().await,
		dropped_updates: state.dispatcher.dropped(),
	}))
}

/// Query parameters for the SSE transport. The handshake rides in the
/// query string because SSE carries no client frames.
#[derive(Debug, Deserialize)]
pub struct SseParams {
	#[serde(default)]
	pub server_id: Option<String>,
	#[serde(default)]
	pub region: Option<String>,
	#[serde(default)]
	pub version: Option<String>,
	#[serde(default)]
	pub project: Option<String>,
}

/// Marks the edge disconnected when its stream is dropped.
struct DisconnectGuard {
	dispatcher: Arc<Dispatcher>,
	server_id: String,
}

impl Drop for DisconnectGuard {
	fn drop(&mut self) {
		let Ok(handle) = tokio::runtime::Handle::try_current() else {
			return;
		};
		let dispatcher = self.dispatcher.clone();
		let server_id = std::mem::take(&mut self.server_id);
		handle.spawn(async move {
			dispatcher.disconnect(&server_id).await;
		});
	}
}

fn sse_event(event: &StreamEvent) -> Event {
	let data = serde_json::to_string(event).unwrap_or_else(|e| {
		warn!(error = %e, "failed to serialize stream event");
		String::new()
	});
	Event::default().event(event.event_type()).data(data)
}

/// `GET /edge/stream/sse` - one-directional server-push transport.
#[tracing::instrument(skip(state, key, params), fields(environment = %key.environment))]
pub async fn stream_sse(
	RequireApiKey(key): RequireApiKey,
	Query(params): Query<SseParams>,
	State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
	require_read(&key)?;

	let project = params.project.unwrap_or_else(|| key.project.clone());
	if !key.covers_project(&project) {
		return Err(HubError::Forbidden);
	}

	let hello = EdgeHello {
		server_id: params
			.server_id
			.unwrap_or_else(|| format!("edge-{}", Uuid::new_v4())),
		region: params.region,
		version: params.version,
		project,
		environment: key.environment.clone(),
	};

	let mut rx = state.dispatcher.register(&hello, None).await;
	let dispatcher = state.dispatcher.clone();
	let heartbeat = state.config.heartbeat_interval;
	let server_id = hello.server_id;

	let stream = async_stream::stream! {
		let _guard = DisconnectGuard {
			dispatcher: dispatcher.clone(),
			server_id: server_id.clone(),
		};
		// First ping one full period after connect; the connected ack is
		// already queued and goes out first.
		let mut ping =
			tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
		ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		loop {
			let event = tokio::select! {
				event = rx.recv() => match event {
					Some(event) => sse_event(&event),
					None => break,
				},
				_ = ping.tick() => {
					// SSE edges cannot ping back; a deliverable ping is
					// the liveness signal.
					dispatcher.ping(&server_id).await;
					sse_event(&StreamEvent::ping())
				}
			};
			yield Ok::<_, Infallible>(event);
		}
	};

	Ok(Sse::new(stream))
}

/// `GET /edge/stream/ws` - bidirectional transport.
pub async fn stream_ws(
	RequireApiKey(key): RequireApiKey,
	ws: WebSocketUpgrade,
	State(state): State<AppState>,
) -> Result<impl IntoResponse> {
	require_read(&key)?;
	Ok(ws.on_upgrade(move |socket| handle_ws(socket, key, state)))
}

async fn handle_ws(socket: WebSocket, key: ApiKey, state: AppState) {
	let (mut sender, mut receiver) = socket.split();

	// Handshake: the first frame must be a hello scoped within the key.
	let hello = match read_hello(&mut receiver).await {
		Some(hello) => hello,
		None => {
			let _ = sender.close().await;
			return;
		}
	};

	if !key.covers_project(&hello.project) || key.environment != hello.environment {
		warn!(
			server_id = %hello.server_id,
			project = %hello.project,
			environment = %hello.environment,
			"websocket hello out of key scope"
		);
		let _ = sender.close().await;
		return;
	}

	let mut rx = state.dispatcher.register(&hello, None).await;
	let dispatcher = state.dispatcher.clone();
	let server_id = hello.server_id.clone();

	let (socket_tx, mut socket_rx) = mpsc::channel::<Message>(SOCKET_QUEUE);

	let send_task = tokio::spawn(async move {
		while let Some(msg) = socket_rx.recv().await {
			if let Err(e) = sender.send(msg).await {
				debug!(error = %e, "websocket send failed");
				break;
			}
		}
	});

	// Forward dispatcher events and periodic hub pings to the socket.
	let forward_tx = socket_tx.clone();
	let heartbeat = state.config.heartbeat_interval;
	let forward_task = tokio::spawn(async move {
		let mut ping =
			tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
		ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		loop {
			let event = tokio::select! {
				event = rx.recv() => match event {
					Some(event) => event,
					None => break,
				},
				_ = ping.tick() => StreamEvent::ping(),
			};
			let Ok(json) = serde_json::to_string(&event) else {
				continue;
			};
			if forward_tx.send(Message::Text(json.into())).await.is_err() {
				break;
			}
		}
	});

	// Reader: edge pings stamp liveness; everything else is ignored.
	while let Some(msg) = receiver.next().await {
		match msg {
			Ok(Message::Text(text)) => match serde_json::from_str::<EdgeMessage>(&text) {
				Ok(EdgeMessage::Ping { .. }) => dispatcher.ping(&server_id).await,
				Ok(EdgeMessage::Hello(_)) => {
					debug!(server_id = %server_id, "duplicate hello ignored");
				}
				Err(e) => debug!(error = %e, "unparseable edge message"),
			},
			Ok(Message::Ping(data)) => {
				let _ = socket_tx.send(Message::Pong(data)).await;
			}
			Ok(Message::Close(_)) | Err(_) => break,
			Ok(_) => {}
		}
	}

	info!(server_id = %server_id, "websocket closed");
	dispatcher.disconnect(&server_id).await;
	forward_task.abort();
	send_task.abort();
}

async fn read_hello(
	receiver: &mut futures::stream::SplitStream<WebSocket>,
) -> Option<EdgeHello> {
	let deadline = tokio::time::sleep(HANDSHAKE_TIMEOUT);
	tokio::pin!(deadline);

	loop {
		tokio::select! {
			() = &mut deadline => {
				warn!("websocket handshake timeout");
				return None;
			}
			msg = receiver.next() => {
				match msg? {
					Ok(Message::Text(text)) => {
						return match serde_json::from_str::<EdgeMessage>(&text) {
							Ok(EdgeMessage::Hello(hello)) => Some(hello),
							_ => {
								warn!("first websocket frame was not a hello");
								None
							}
						};
					}
					Ok(Message::Close(_)) | Err(_) => return None,
					Ok(_) => continue,
				}
			}
		}
	}
}
