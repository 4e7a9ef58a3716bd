// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The Flagship hub: authoritative flag store and sync fan-out.
//!
//! The hub persists flags, segments and API keys in SQLite, serves the
//! evaluation and admin APIs, and streams flag changes to edge servers
//! over websocket or SSE. The administrative write path is the only
//! component that mutates authoritative state; every change follows
//! validate -> persist -> dispatch.
//!
//! # Architecture
//!
//! - `repository` - typed accessors over SQLite
//! - `service` - the write path (validate, persist, dispatch)
//! - `dispatcher` - fleet registry and per-edge bounded queues
//! - `auth` / `auth_middleware` - Argon2 API-key authentication
//! - `routes` - evaluation, edge sync and admin HTTP surface
//! - `sticky` - durable sticky-assignment store

pub mod api;
pub mod auth;
pub mod auth_middleware;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod repository;
pub mod routes;
pub mod service;
pub mod state;
pub mod sticky;

pub use api::create_router;
pub use config::HubConfig;
pub use dispatcher::{Dispatcher, EdgeServerInfo};
pub use error::{HubError, Result};
pub use repository::{HubRepository, SqliteRepository};
pub use service::FlagService;
pub use state::AppState;
pub use sticky::SqliteStickyStore;

use std::sync::Arc;

use flagship_engine::Evaluator;

/// Wires up state for a hub instance over the given pool.
pub fn build_state(pool: sqlx::SqlitePool, config: HubConfig) -> AppState {
	let repo: Arc<dyn HubRepository> = Arc::new(SqliteRepository::new(pool.clone()));
	let dispatcher = Arc::new(Dispatcher::new(
		config.edge_queue_size,
		config.heartbeat_interval,
		config.fleet_retention,
	));
	let evaluator = Arc::new(Evaluator::new(Arc::new(SqliteStickyStore::new(pool))));
	AppState::new(repo, dispatcher, evaluator, config)
}
