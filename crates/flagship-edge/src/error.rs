// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Edge error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors raised by edge components.
#[derive(Debug, Error)]
pub enum EdgeError {
	/// Flag or key missing, locally and on the hub. Maps to 404.
	#[error("not found: {0}")]
	NotFound(String),

	/// Authentication failed. Maps to 401.
	#[error("unauthorized")]
	Unauthorized,

	/// Malformed request. Maps to 400 naming the field.
	#[error("invalid {field}: {message}")]
	Invalid { field: String, message: String },

	/// The hub could not be reached. Sync retries; evaluation falls back
	/// to cached state.
	#[error("hub unreachable: {0}")]
	HubUnreachable(String),

	/// The hub answered with an unexpected status.
	#[error("hub returned {status}: {message}")]
	HubStatus { status: u16, message: String },

	/// JSON (de)serialization failure.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// Anything else; maps to 500, the process stays up.
	#[error("internal error: {0}")]
	Internal(String),
}

impl From<reqwest::Error> for EdgeError {
	fn from(e: reqwest::Error) -> Self {
		EdgeError::HubUnreachable(e.to_string())
	}
}

/// JSON error body mirroring the hub's.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorBody {
	pub error: String,
	pub message: String,
}

impl IntoResponse for EdgeError {
	fn into_response(self) -> Response {
		let (status, error) = match &self {
			EdgeError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
			EdgeError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
			EdgeError::Invalid { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
			EdgeError::HubUnreachable(_) | EdgeError::HubStatus { .. } => {
				(StatusCode::BAD_GATEWAY, "hub_unavailable")
			}
			EdgeError::Serialization(_) | EdgeError::Internal(_) => {
				tracing::error!(error = %self, "internal error");
				(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
			}
		};

		let message = match &self {
			EdgeError::Serialization(_) | EdgeError::Internal(_) => "internal error".to_string(),
			other => other.to_string(),
		};

		(
			status,
			Json(ErrorBody {
				error: error.to_string(),
				message,
			}),
		)
			.into_response()
	}
}

/// Result alias for edge operations.
pub type Result<T> = std::result::Result<T, EdgeError>;
