// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Hub error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use flagship_core::FlagError;

/// Errors raised by hub components.
#[derive(Debug, Error)]
pub enum HubError {
	/// A field failed validation. Maps to 400 naming the field.
	#[error("invalid {field}: {message}")]
	Invalid { field: String, message: String },

	/// Entity missing. Maps to 404, never a 5xx.
	#[error("not found: {0}")]
	NotFound(String),

	/// Authentication failed. Maps to 401 with a short string.
	#[error("unauthorized")]
	Unauthorized,

	/// Authenticated but not allowed. Maps to 403.
	#[error("forbidden")]
	Forbidden,

	/// The write would violate a uniqueness constraint. Maps to 409.
	#[error("conflict: {0}")]
	Conflict(String),

	/// Database failure. Maps to 500; the process stays up.
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	/// JSON (de)serialization failure while mapping rows.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// Anything else that should surface as a 500 with context logged.
	#[error("internal error: {0}")]
	Internal(String),
}

impl HubError {
	pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
		HubError::Invalid {
			field: field.into(),
			message: message.into(),
		}
	}
}

impl From<FlagError> for HubError {
	fn from(err: FlagError) -> Self {
		match err {
			FlagError::Invalid { field, message } => HubError::Invalid { field, message },
			FlagError::NotFound(what) => HubError::NotFound(what),
			FlagError::Serialization(e) => HubError::Serialization(e),
		}
	}
}

/// JSON error body: `{"error": "...", "message": "..."}`.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorBody {
	pub error: String,
	pub message: String,
}

impl IntoResponse for HubError {
	fn into_response(self) -> Response {
		let (status, error) = match &self {
			HubError::Invalid { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
			HubError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
			HubError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
			HubError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
			HubError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
			HubError::Database(_) | HubError::Serialization(_) | HubError::Internal(_) => {
				tracing::error!(error = %self, error_debug = ?self, "internal error");
				(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
			}
		};

		let message = match &self {
			// Internal detail stays in the logs.
			HubError::Database(_) | HubError::Serialization(_) | HubError::Internal(_) => {
				"internal error".to_string()
			}
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

/// Result alias for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn validation_error_names_the_field() {
		let err = HubError::invalid("rollout", "weights must sum to 100");
		assert_eq!(err.to_string(), "invalid rollout: weights must sum to 100");
	}

	#[test]
	fn core_errors_convert() {
		let err: HubError = FlagError::invalid("key", "malformed").into();
		assert!(matches!(err, HubError::Invalid { field, .. } if field == "key"));
	}
}
