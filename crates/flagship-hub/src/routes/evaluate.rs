// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation endpoints on the hub.
//!
//! The hub evaluates against the repository directly: flags are fetched,
//! segment references materialized, and the engine run. Edges are the fast
//! path; this is the authoritative fallback.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

use flagship_core::{
	BatchEntry, BatchEvaluationResponse, EvaluationRequest, EvaluationResponse, Flag,
	ResponseSource,
};
use flagship_engine::NoSegments;

use crate::error::{HubError, Result};
use crate::state::AppState;

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

async fn resolve_flag(state: &AppState, request: &EvaluationRequest) -> Result<Flag> {
	let environment = request
		.environment
		.clone()
		.unwrap_or_else(|| state.config.default_environment.clone());

	let flag = match &request.project {
		Some(project) => {
			state
				.repo
				.get_flag(project, &request.flag_key, &environment)
				.await?
		}
		None => state.repo.get_flag_by_key(&request.flag_key, &environment).await?,
	};

	// Tombstoned flags are deleted as far as callers are concerned.
	flag.filter(|f| !f.is_archived())
		.ok_or_else(|| HubError::NotFound(format!("flag '{}'", request.flag_key)))
}

async fn evaluate_one(
	state: &AppState,
	request: &EvaluationRequest,
) -> Result<EvaluationResponse> {
	let flag = resolve_flag(state, request).await?;
	let flag = state.service.materialize(flag).await?;
	let subject = request.subject();

	let mut response = state.evaluator.evaluate(&flag, &subject, &NoSegments).await;
	response.source = ResponseSource::Hub;

	// Outcome recording is best-effort and never fails the evaluation.
	if let Err(e) = state.repo.record_evaluation(flag.id, &flag.key).await {
		tracing::warn!(flag_key = %flag.key, error = %e, "failed to record evaluation");
	}

	Ok(response)
}

/// `POST /evaluate`
#[tracing::instrument(skip(state, request), fields(flag_key = %request.flag_key))]
pub async fn evaluate(
	State(state): State<AppState>,
	Json(request): Json<EvaluationRequest>,
) -> Result<Json<EvaluationResponse>> {
	Ok(Json(evaluate_one(&state, &request).await?))
}

/// `POST /evaluate/batch`
///
/// Evaluations are independent; a failure for one flag surfaces in that
/// flag's entry, never as a top-level error.
#[tracing::instrument(skip(state, batch), fields(flag_count = batch.flag_keys.len()))]
pub async fn evaluate_batch(
	State(state): State<AppState>,
	Json(batch): Json<BatchRequest>,
) -> Json<BatchEvaluationResponse> {
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
			Ok(response) => BatchEntry::Ok(response),
			Err(e) => BatchEntry::Err {
				error: e.to_string(),
			},
		};
		results.insert(flag_key.clone(), entry);
	}

	let flags_evaluated = results.len();
	Json(BatchEvaluationResponse {
		results,
		evaluation_time_ms: started.elapsed().as_secs_f64() * 1_000.0,
		flags_evaluated,
	})
}
