// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Admin routes for API keys.
//!
//! Creation returns the plaintext exactly once; afterwards only the hash
//! exists.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flagship_core::{ApiKey, ApiKeyId, Permission};

use crate::auth_middleware::RequireAdmin;
use crate::error::{HubError, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
	pub name: String,
	pub project: String,
	pub environment: String,
	pub permissions: Vec<Permission>,
	#[serde(default)]
	pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateApiKeyResponse {
	pub api_key: ApiKey,
	/// Shown exactly once.
	pub plaintext: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListApiKeysResponse {
	pub api_keys: Vec<ApiKey>,
}

/// `POST /api/admin/api-keys`
#[tracing::instrument(skip(state, payload), fields(name = %payload.name))]
pub async fn create_api_key(
	_admin: RequireAdmin,
	State(state): State<AppState>,
	Json(payload): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreateApiKeyResponse>)> {
	let (api_key, plaintext) = state
		.service
		.create_api_key(
			&payload.name,
			&payload.project,
			&payload.environment,
			payload.permissions,
			payload.expires_at,
		)
		.await?;

	Ok((
		StatusCode::CREATED,
		Json(CreateApiKeyResponse { api_key, plaintext }),
	))
}

/// `GET /api/admin/api-keys`
#[tracing::instrument(skip(state))]
pub async fn list_api_keys(
	_admin: RequireAdmin,
	State(state): State<AppState>,
) -> Result<Json<ListApiKeysResponse>> {
	Ok(Json(ListApiKeysResponse {
		api_keys: state.repo.list_api_keys().await?,
	}))
}

/// `DELETE /api/admin/api-keys/{id}` - revokes (deactivates) a key.
#[tracing::instrument(skip(state))]
pub async fn revoke_api_key(
	_admin: RequireAdmin,
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<StatusCode> {
	let id = id
		.parse()
		.map(ApiKeyId)
		.map_err(|_| HubError::invalid("id", "malformed API key id"))?;

	if state.repo.revoke_api_key(id).await? {
		Ok(StatusCode::NO_CONTENT)
	} else {
		Err(HubError::NotFound("api key".to_string()))
	}
}
