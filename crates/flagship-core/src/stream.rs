// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sync stream wire types shared by the hub dispatcher and the edge sync
//! client.
//!
//! # Events
//!
//! - `connected` - handshake acknowledgement
//! - `ping` - keep-alive (every heartbeat interval)
//! - `flag_update` - a flag was created, updated or deleted
//! - `resync` - the edge fell behind (queue overflow) and must full-sync
//!
//! Updates carry the full new flag state (or a delete tombstone), so
//! applying the same event twice is idempotent and at-least-once delivery
//! is sufficient.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api_key::ApiKey;
use crate::flag::Flag;

/// What happened to a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOp {
	Create,
	Update,
	Delete,
}

/// A single flag change, fanned out to every subscribed edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagUpdate {
	pub action: UpdateOp,
	pub flag_key: String,
	pub project_id: String,
	pub environment: String,
	/// Full new flag state; absent for deletes.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub flag: Option<Flag>,
	pub timestamp: DateTime<Utc>,
}

impl FlagUpdate {
	pub fn create(flag: Flag) -> Self {
		Self::with_op(UpdateOp::Create, flag)
	}

	pub fn update(flag: Flag) -> Self {
		Self::with_op(UpdateOp::Update, flag)
	}

	pub fn delete(project: &str, flag_key: &str, environment: &str) -> Self {
		FlagUpdate {
			action: UpdateOp::Delete,
			flag_key: flag_key.to_string(),
			project_id: project.to_string(),
			environment: environment.to_string(),
			flag: None,
			timestamp: Utc::now(),
		}
	}

	fn with_op(action: UpdateOp, flag: Flag) -> Self {
		FlagUpdate {
			action,
			flag_key: flag.key.clone(),
			project_id: flag.project.clone(),
			environment: flag.environment.clone(),
			timestamp: flag.updated_at,
			flag: Some(flag),
		}
	}
}

/// Events sent hub to edge over either stream transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
	/// Handshake acknowledgement.
	Connected {
		server_id: String,
		timestamp: DateTime<Utc>,
	},
	/// Keep-alive.
	Ping { timestamp: DateTime<Utc> },
	/// A flag changed.
	FlagUpdate(FlagUpdate),
	/// The edge's queue overflowed; it must run a full sync.
	Resync { timestamp: DateTime<Utc> },
}

impl StreamEvent {
	/// The wire event name, used as the SSE `event:` field.
	pub fn event_type(&self) -> &'static str {
		match self {
			StreamEvent::Connected { .. } => "connected",
			StreamEvent::Ping { .. } => "ping",
			StreamEvent::FlagUpdate(_) => "flag_update",
			StreamEvent::Resync { .. } => "resync",
		}
	}

	pub fn connected(server_id: impl Into<String>) -> Self {
		StreamEvent::Connected {
			server_id: server_id.into(),
			timestamp: Utc::now(),
		}
	}

	pub fn ping() -> Self {
		StreamEvent::Ping {
			timestamp: Utc::now(),
		}
	}

	pub fn resync() -> Self {
		StreamEvent::Resync {
			timestamp: Utc::now(),
		}
	}
}

/// Stream handshake sent by the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeHello {
	pub server_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub region: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	/// Project scope, or "all".
	pub project: String,
	pub environment: String,
}

/// Messages the hub reads back from an edge on the bidirectional transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeMessage {
	Hello(EdgeHello),
	Ping { timestamp: DateTime<Utc> },
}

/// One-shot bulk snapshot served by `GET /edge/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
	pub flags: Vec<Flag>,
	pub api_keys: Vec<ApiKey>,
	pub timestamp: DateTime<Utc>,
}
