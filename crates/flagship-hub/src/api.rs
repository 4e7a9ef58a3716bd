// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Router assembly.

use axum::routing::{delete, get, post};
use axum::Router;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::routes::{admin_api_keys, admin_flags, admin_segments, edge, evaluate, health};
use crate::state::AppState;

/// Bound on request handling; streams produce their response head
/// immediately and are unaffected.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the hub's HTTP router.
pub fn create_router(state: AppState) -> Router {
	let cors = CorsLayer::new()
		.allow_origin(Any)
		.allow_methods(Any)
		.allow_headers(Any);

	Router::new()
		.route("/health", get(health::health))
		// Evaluation
		.route("/evaluate", post(evaluate::evaluate))
		.route("/evaluate/batch", post(evaluate::evaluate_batch))
		// The hub carries no response-memo layer, so the ultra path is
		// plain evaluation here; edges serve the memoized variant.
		.route("/evaluate/ultra", post(evaluate::evaluate))
		// Edge sync
		.route("/edge/sync", get(edge::sync))
		.route("/edge/auth", post(edge::auth))
		.route("/edge/servers", get(edge::servers))
		.route("/edge/stream/sse", get(edge::stream_sse))
		.route("/edge/stream/ws", get(edge::stream_ws))
		// Admin
		.route(
			"/api/admin/flags",
			get(admin_flags::list_flags).post(admin_flags::create_flag),
		)
		.route(
			"/api/admin/flags/{project}/{environment}/{key}",
			get(admin_flags::get_flag)
				.put(admin_flags::update_flag)
				.delete(admin_flags::delete_flag),
		)
		.route(
			"/api/admin/segments",
			get(admin_segments::list_segments).post(admin_segments::create_segment),
		)
		.route(
			"/api/admin/segments/{project}/{key}",
			get(admin_segments::get_segment)
				.put(admin_segments::update_segment)
				.delete(admin_segments::delete_segment),
		)
		.route(
			"/api/admin/api-keys",
			get(admin_api_keys::list_api_keys).post(admin_api_keys::create_api_key),
		)
		.route(
			"/api/admin/api-keys/{id}",
			delete(admin_api_keys::revoke_api_key),
		)
		.layer(TraceLayer::new_for_http())
		.layer(TimeoutLayer::new(REQUEST_TIMEOUT))
		.layer(cors)
		.with_state(state)
}
