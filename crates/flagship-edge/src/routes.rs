// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The edge's evaluation API.
//!
//! Requests are answered from the local cache; the hub is consulted only
//! on a flag miss or an unknown API key. `/evaluate/ultra` serves
//! pre-serialized bytes straight from the response-memo layer.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use flagship_core::{
	ApiKeyScope, BatchEntry, BatchEvaluationResponse, EvaluationRequest, EvaluationResponse,
	ResponseSource,
};
use flagship_engine::NoSegments;

use crate::cache::CacheStats;
use crate::error::{EdgeError, Result};
use crate::state::EdgeState;
use crate::sync::SyncStatus;

/// Bound on request handling, covering hub fallbacks on cache misses.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the edge's HTTP router.
pub fn create_router(state: EdgeState) -> Router {
	let cors = CorsLayer::new()
		.allow_origin(Any)
		.allow_methods(Any)
		.allow_headers(Any);

	Router::new()
		.route("/health", get(health))
		.route("/evaluate", post(evaluate))
		.route("/evaluate/batch", post(evaluate_batch))
		.route("/evaluate/ultra", post(evaluate_ultra))
		.route("/evaluate/cache/stats", get(cache_stats))
		.layer(TraceLayer::new_for_http())
		.layer(TimeoutLayer::new(REQUEST_TIMEOUT))
		.layer(cors)
		.with_state(state)
}

#[derive(Debug, serde::Serialize, Deserialize)]
pub struct HealthResponse {
	pub status: String,
	pub environment: String,
	pub sync: SyncStatus,
	pub flag_count: usize,
}

async fn health(State(state): State<EdgeState>) -> Json<HealthResponse> {
	Json(HealthResponse {
		status: "ok".to_string(),
		environment: state.config.environment.clone(),
		sync: state.sync.status().await,
		flag_count: state.cache.flags.len().await,
	})
}

async fn cache_stats(State(state): State<EdgeState>) -> Json<CacheStats> {
	Json(state.cache.stats().await)
}

/// Validates the caller's API key when one is presented. Absent keys fall
/// through: evaluation is a public-read surface.
async fn check_api_key(state: &EdgeState, headers: &HeaderMap) -> Result<()> {
	let Some(plaintext) = headers
		.get("x-api-key")
		.and_then(|v| v.to_str().ok())
		.map(str::trim)
		.filter(|v| !v.is_empty())
	else {
		return Ok(());
	};

	if state.cache.api_keys.authenticate(plaintext).await.is_some() {
		return Ok(());
	}

	// Unknown locally: ask the hub once and cache the scope.
	let url = format!("{}/edge/auth", state.config.hub_url);
	let response = state
		.http
		.post(&url)
		.json(&serde_json::json!({ "api_key": plaintext }))
		.send()
		.await?;

	match response.status() {
		status if status.is_success() => {
			let scope: ApiKeyScope = response.json().await?;
			state
				.cache
				.api_keys
				.insert(plaintext.to_string(), scope)
				.await;
			Ok(())
		}
		StatusCode::UNAUTHORIZED => Err(EdgeError::Unauthorized),
		status => Err(EdgeError::HubStatus {
			status: status.as_u16(),
			message: "auth endpoint failure".to_string(),
		}),
	}
}

fn environment_for(state: &EdgeState, request: &EvaluationRequest) -> String {
	request
		.environment
		.clone()
		.unwrap_or_else(|| state.config.environment.clone())
}

/// Evaluates one request: local cache first, hub fallback on miss. The
/// serialized response is memoized for the ultra path.
async fn evaluate_one(state: &EdgeState, request: &EvaluationRequest) -> Result<Vec<u8>> {
	let environment = environment_for(state, request);

	let Some(cached) = state.cache.flags.get(&request.flag_key, &environment).await else {
		return hub_fallback(state, request).await;
	};

	let subject = request.subject();
	let mut response = state
		.evaluator
		.evaluate(&cached.flag, &subject, &NoSegments)
		.await;
	response.source = ResponseSource::EdgeCache;

	let bytes = serde_json::to_vec(&response)?;
	state
		.cache
		.responses
		.put(
			request.fingerprint(&environment),
			request.flag_key.clone(),
			bytes.clone(),
		)
		.await;

	Ok(bytes)
}

/// Proxies an evaluation to the hub when the flag is not cached locally.
async fn hub_fallback(state: &EdgeState, request: &EvaluationRequest) -> Result<Vec<u8>> {
	tracing::debug!(flag_key = %request.flag_key, "cache miss, falling back to hub");

	let url = format!("{}/evaluate", state.config.hub_url);
	let response = state.http.post(&url).json(request).send().await?;

	match response.status() {
		status if status.is_success() => {
			let evaluated: EvaluationResponse = response.json().await?;
			Ok(serde_json::to_vec(&evaluated)?)
		}
		StatusCode::NOT_FOUND => Err(EdgeError::NotFound(format!(
			"flag '{}'",
			request.flag_key
		))),
		status => Err(EdgeError::HubStatus {
			status: status.as_u16(),
			message: "hub evaluation failed".to_string(),
		}),
	}
}

fn json_bytes(bytes: Vec<u8>) -> Response {
	(
		StatusCode::OK,
		[(header::CONTENT_TYPE, "application/json")],
		Bytes::from(bytes),
	)
		.into_response()
}

/// `POST /evaluate`
#[tracing::instrument(skip(state, headers, request), fields(flag_key = %request.flag_key))]
pub async fn evaluate(
	State(state): State<EdgeState>,
	headers: HeaderMap,
	Json(request): Json<EvaluationRequest>,
) -> Result<Response> {
	check_api_key(&state, &headers).await?;
	let bytes = evaluate_one(&state, &request).await?;
	Ok(json_bytes(bytes))
}

/// `POST /evaluate/ultra`
///
/// Identical semantics to `/evaluate`, but the response-memo layer is
/// consulted first; a hit returns the stored bytes without re-running the
/// engine, so repeated calls within the memo window are byte-identical.
#[tracing::instrument(skip(state, headers, request), fields(flag_key = %request.flag_key))]
pub async fn evaluate_ultra(
	State(state): State<EdgeState>,
	headers: HeaderMap,
	Json(request): Json<EvaluationRequest>,
) -> Result<Response> {
	check_api_key(&state, &headers).await?;

	let environment = environment_for(&state, &request);
	let fingerprint = request.fingerprint(&environment);

	if let Some(bytes) = state.cache.responses.get(&fingerprint).await {
		return Ok(json_bytes(bytes));
	}

	let bytes = evaluate_one(&state, &request).await?;
	Ok(json_bytes(bytes))
}

/// Body for `POST /evaluate/batch`.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
	pub flag_keys: Vec<String>,
	pub user_id: String,
	#[serde(default)]
	pub user_key: Option<String>,
	#[serde(default)]
	pub attributes: HashMap<String, Value>,
	#[serde(default)]
	pub project: Option<String>,
	#[serde(default)]
	pub environment: Option<String>,
}

/// `POST /evaluate/batch`
///
/// One subject fanned across many flags; failures stay per-flag.
#[tracing::instrument(skip(state, headers, batch), fields(flag_count = batch.flag_keys.len()))]
pub async fn evaluate_batch(
	State(state): State<EdgeState>,
	headers: HeaderMap,
	Json(batch): Json<BatchRequest>,
) -> Result<Json<BatchEvaluationResponse>> {
	check_api_key(&state, &headers).await?;

	let started = Instant::now();
	let mut results = HashMap::with_capacity(batch.flag_keys.len());

	for flag_key in &batch.flag_keys {
		let request = EvaluationRequest {
			project: batch.project.clone(),
			flag_key: flag_key.clone(),
			user_id: batch.user_id.clone(),
			user_key: batch.user_key.clone(),
			attributes: batch.attributes.clone(),
			environment: batch.environment.clone(),
		};

		let entry = match evaluate_one(&state, &request).await {
			Ok(bytes) => match serde_json::from_slice::<EvaluationResponse>(&bytes) {
				Ok(response) => BatchEntry::Ok(response),
				Err(e) => BatchEntry::Err {
					error: e.to_string(),
				},
			},
			Err(e) => BatchEntry::Err {
				error: e.to_string(),
			},
		};
		results.insert(flag_key.clone(), entry);
	}

	let flags_evaluated = results.len();
	Ok(Json(BatchEvaluationResponse {
		results,
		evaluation_time_ms: started.elapsed().as_secs_f64() * 1_000.0,
		flags_evaluated,
	}))
}
