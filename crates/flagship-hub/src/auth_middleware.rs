// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request authentication extractors.
//!
//! Callers present either `X-API-Key: <plaintext>` (programmatic use) or
//! `Authorization: Bearer <token>` (admin UI). Token issuance lives outside
//! this service; the hub only checks the configured admin token. Endpoints
//! without an extractor are public-read.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use flagship_core::{ApiKey, Permission};

use crate::auth::authenticate;
use crate::error::HubError;
use crate::state::AppState;

/// Header carrying the API key plaintext.
pub const API_KEY_HEADER: &str = "x-api-key";

fn api_key_header(parts: &Parts) -> Option<String> {
	parts
		.headers
		.get(API_KEY_HEADER)
		.and_then(|v| v.to_str().ok())
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty())
}

fn bearer_token(parts: &Parts) -> Option<String> {
	parts
		.headers
		.get(axum::http::header::AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Bearer "))
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty())
}

/// Requires a valid API key. Rejects with 401 when the header is missing
/// or nothing verifies.
pub struct RequireApiKey(pub ApiKey);

impl FromRequestParts<AppState> for RequireApiKey {
	type Rejection = HubError;

	async fn from_request_parts(
		parts: &mut Parts,
		state: &AppState,
	) -> Result<Self, Self::Rejection> {
		let Some(plaintext) = api_key_header(parts) else {
			return Err(HubError::Unauthorized);
		};

		match authenticate(state.repo.as_ref(), &plaintext).await? {
			Some(key) => Ok(RequireApiKey(key)),
			None => Err(HubError::Unauthorized),
		}
	}
}

/// Requires admin access: either the configured bearer token or an API key
/// carrying the admin permission.
#[derive(Debug)]
pub struct RequireAdmin;

impl FromRequestParts<AppState> for RequireAdmin {
	type Rejection = HubError;

	async fn from_request_parts(
		parts: &mut Parts,
		state: &AppState,
	) -> Result<Self, Self::Rejection> {
		if let Some(token) = bearer_token(parts) {
			match &state.config.admin_token {
				Some(expected) if *expected == token => return Ok(RequireAdmin),
				_ => return Err(HubError::Unauthorized),
			}
		}

		if let Some(plaintext) = api_key_header(parts) {
			return match authenticate(state.repo.as_ref(), &plaintext).await? {
				Some(key) if key.has_permission(Permission::Admin) => Ok(RequireAdmin),
				Some(_) => Err(HubError::Forbidden),
				None => Err(HubError::Unauthorized),
			};
		}

		Err(HubError::Unauthorized)
	}
}
