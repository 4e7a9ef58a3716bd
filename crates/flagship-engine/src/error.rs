// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Engine error types.

use thiserror::Error;

/// Errors from the sticky-assignment store. Evaluation itself never fails;
/// these surface only through the store trait and its background sweeps.
#[derive(Debug, Error)]
pub enum EngineError {
	/// The backing store rejected or failed an operation.
	#[error("sticky store error: {0}")]
	Store(String),
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
