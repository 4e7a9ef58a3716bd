// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types shared across the Flagship crates.

use thiserror::Error;

/// Errors raised by the core model.
#[derive(Debug, Error)]
pub enum FlagError {
	/// A field failed validation. The field name is surfaced to callers
	/// so HTTP layers can produce a 400 naming the offending field.
	#[error("invalid {field}: {message}")]
	Invalid { field: String, message: String },

	/// A referenced entity does not exist.
	#[error("not found: {0}")]
	NotFound(String),

	/// JSON (de)serialization failure.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl FlagError {
	/// Shorthand for a validation failure on a named field.
	pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
		FlagError::Invalid {
			field: field.into(),
			message: message.into(),
		}
	}
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, FlagError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn invalid_names_the_field() {
		let err = FlagError::invalid("variations", "weights must sum to 100");
		assert_eq!(
			err.to_string(),
			"invalid variations: weights must sum to 100"
		);
	}
}
