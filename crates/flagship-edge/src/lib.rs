// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The Flagship edge server: local cache and sub-millisecond evaluation.
//!
//! An edge preloads every flag for its environment from the hub, keeps
//! them fresh over a persistent stream (websocket or SSE, selected by
//! configuration), and answers evaluation requests entirely from memory.
//! The hub is consulted only on a flag miss or an unknown API key.
//!
//! # Architecture
//!
//! - `cache` - three layers: flags, API-key scopes, memoized responses
//! - `sync` - bulk catch-up plus streaming updates with auto-reconnect
//! - `routes` - the evaluation HTTP surface
//! - `config` - env-var configuration with explicit defaults

pub mod cache;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod sync;

pub use cache::{CacheStats, EdgeCache};
pub use config::{EdgeConfig, SyncType};
pub use error::{EdgeError, Result};
pub use routes::create_router;
pub use state::EdgeState;
pub use sync::{SyncClient, SyncStatus, SyncTransport};
