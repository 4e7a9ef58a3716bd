// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Admin routes for flags.
//!
//! All writes go through [`FlagService`](crate::service::FlagService), so
//! every change is validated, persisted and then fanned out to edges.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use flagship_core::{Flag, FlagKind, TargetingConfig, Variation};

use crate::auth_middleware::RequireAdmin;
use crate::error::{HubError, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateFlagRequest {
	pub project: String,
	pub key: String,
	pub environment: String,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	pub kind: FlagKind,
	#[serde(default)]
	pub enabled: bool,
	pub default_value: Value,
	#[serde(default)]
	pub variations: Vec<Variation>,
	#[serde(default)]
	pub targeting: Option<TargetingConfig>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFlagRequest {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub enabled: Option<bool>,
	#[serde(default)]
	pub default_value: Option<Value>,
	#[serde(default)]
	pub variations: Option<Vec<Variation>>,
	#[serde(default)]
	pub targeting: Option<TargetingConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ListFlagsQuery {
	#[serde(default)]
	pub project: Option<String>,
	pub environment: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListFlagsResponse {
	pub flags: Vec<Flag>,
}

/// `GET /api/admin/flags`
#[tracing::instrument(skip(state))]
pub async fn list_flags(
	_admin: RequireAdmin,
	State(state): State<AppState>,
	Query(query): Query<ListFlagsQuery>,
) -> Result<Json<ListFlagsResponse>> {
	let flags = match &query.project {
		Some(project) => {
			state
				.repo
				.list_flags_by_project(project, &query.environment)
				.await?
		}
		None => state.repo.list_flags(&query.environment).await?,
	};
	Ok(Json(ListFlagsResponse { flags }))
}

/// `GET /api/admin/flags/{project}/{environment}/{key}`
#[tracing::instrument(skip(state))]
pub async fn get_flag(
	_admin: RequireAdmin,
	State(state): State<AppState>,
	Path((project, environment, key)): Path<(String, String, String)>,
) -> Result<Json<Flag>> {
	state
		.repo
		.get_flag(&project, &key, &environment)
		.await?
		.filter(|f| !f.is_archived())
		.map(Json)
		.ok_or_else(|| HubError::NotFound(format!("flag '{key}'")))
}

/// `POST /api/admin/flags`
#[tracing::instrument(skip(state, payload), fields(flag_key = %payload.key))]
pub async fn create_flag(
	_admin: RequireAdmin,
	State(state): State<AppState>,
	Json(payload): Json<CreateFlagRequest>,
) -> Result<(StatusCode, Json<Flag>)> {
	let mut flag = Flag::new(payload.project, payload.key, payload.environment, payload.kind);
	if let Some(name) = payload.name {
		flag.name = name;
	}
	flag.description = payload.description;
	flag.enabled = payload.enabled;
	flag.default_value = payload.default_value;
	flag.variations = payload.variations;
	flag.targeting = payload.targeting;

	let flag = state.service.create_flag(flag).await?;
	Ok((StatusCode::CREATED, Json(flag)))
}

/// `PUT /api/admin/flags/{project}/{environment}/{key}`
#[tracing::instrument(skip(state, payload))]
pub async fn update_flag(
	_admin: RequireAdmin,
	State(state): State<AppState>,
	Path((project, environment, key)): Path<(String, String, String)>,
	Json(payload): Json<UpdateFlagRequest>,
) -> Result<Json<Flag>> {
	let mut flag = state
		.repo
		.get_flag(&project, &key, &environment)
		.await?
		.filter(|f| !f.is_archived())
		.ok_or_else(|| HubError::NotFound(format!("flag '{key}'")))?;

	if let Some(name) = payload.name {
		flag.name = name;
	}
	if payload.description.is_some() {
		flag.description = payload.description;
	}
	if let Some(enabled) = payload.enabled {
		flag.enabled = enabled;
	}
	if let Some(default_value) = payload.default_value {
		flag.default_value = default_value;
	}
	if let Some(variations) = payload.variations {
		flag.variations = variations;
	}
	if let Some(targeting) = payload.targeting {
		flag.targeting = Some(targeting);
	}

	let flag = state.service.update_flag(flag).await?;
	Ok(Json(flag))
}

/// `DELETE /api/admin/flags/{project}/{environment}/{key}`
#[tracing::instrument(skip(state))]
pub async fn delete_flag(
	_admin: RequireAdmin,
	State(state): State<AppState>,
	Path((project, environment, key)): Path<(String, String, String)>,
) -> Result<StatusCode> {
	state.service.delete_flag(&project, &key, &environment).await?;
	Ok(StatusCode::NO_CONTENT)
}
