// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Admin routes for segments.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use flagship_core::{Segment, TargetingRule};

use crate::auth_middleware::RequireAdmin;
use crate::error::{HubError, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSegmentRequest {
	pub project: String,
	pub key: String,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub rules: Vec<TargetingRule>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSegmentRequest {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub rules: Option<Vec<TargetingRule>>,
}

#[derive(Debug, Deserialize)]
pub struct ListSegmentsQuery {
	pub project: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListSegmentsResponse {
	pub segments: Vec<Segment>,
}

/// `GET /api/admin/segments`
#[tracing::instrument(skip(state))]
pub async fn list_segments(
	_admin: RequireAdmin,
	State(state): State<AppState>,
	Query(query): Query<ListSegmentsQuery>,
) -> Result<Json<ListSegmentsResponse>> {
	let segments = state.repo.list_segments(&query.project).await?;
	Ok(Json(ListSegmentsResponse { segments }))
}

/// `GET /api/admin/segments/{project}/{key}`
#[tracing::instrument(skip(state))]
pub async fn get_segment(
	_admin: RequireAdmin,
	State(state): State<AppState>,
	Path((project, key)): Path<(String, String)>,
) -> Result<Json<Segment>> {
	state
		.repo
		.get_segment(&project, &key)
		.await?
		.filter(|s| !s.is_archived())
		.map(Json)
		.ok_or_else(|| HubError::NotFound(format!("segment '{key}'")))
}

/// `POST /api/admin/segments`
#[tracing::instrument(skip(state, payload), fields(segment_key = %payload.key))]
pub async fn create_segment(
	_admin: RequireAdmin,
	State(state): State<AppState>,
	Json(payload): Json<CreateSegmentRequest>,
) -> Result<(StatusCode, Json<Segment>)> {
	let mut segment = Segment::new(payload.project, payload.key);
	if let Some(name) = payload.name {
		segment.name = name;
	}
	segment.description = payload.description;
	segment.rules = payload.rules;

	let segment = state.service.create_segment(segment).await?;
	Ok((StatusCode::CREATED, Json(segment)))
}

/// `PUT /api/admin/segments/{project}/{key}`
#[tracing::instrument(skip(state, payload))]
pub async fn update_segment(
	_admin: RequireAdmin,
	State(state): State<AppState>,
	Path((project, key)): Path<(String, String)>,
	Json(payload): Json<UpdateSegmentRequest>,
) -> Result<Json<Segment>> {
	let mut segment = state
		.repo
		.get_segment(&project, &key)
		.await?
		.filter(|s| !s.is_archived())
		.ok_or_else(|| HubError::NotFound(format!("segment '{key}'")))?;

	if let Some(name) = payload.name {
		segment.name = name;
	}
	if payload.description.is_some() {
		segment.description = payload.description;
	}
	if let Some(rules) = payload.rules {
		segment.rules = rules;
	}

	let segment = state.service.update_segment(segment).await?;
	Ok(Json(segment))
}

/// `DELETE /api/admin/segments/{project}/{key}`
#[tracing::instrument(skip(state))]
pub async fn delete_segment(
	_admin: RequireAdmin,
	State(state): State<AppState>,
	Path((project, key)): Path<(String, String)>,
) -> Result<StatusCode> {
	state.service.delete_segment(&project, &key).await?;
	Ok(StatusCode::NO_CONTENT)
}
