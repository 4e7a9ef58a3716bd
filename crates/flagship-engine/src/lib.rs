// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deterministic flag evaluation for Flagship.
//!
//! The engine resolves a flag to a value for a subject: targeting rules
//! first, then segments, then the rollout, then the default. Evaluation is
//! side-effect free except for sticky-assignment reads and writes, and it
//! never fails: a rule that cannot be evaluated is skipped, a store error
//! degrades to a freshly computed assignment.
//!
//! Both the hub and the edge embed this engine; they differ only in where
//! flags and segments come from.
//!
//! # Example
//!
//! ```
//! use flagship_core::{Flag, FlagKind, Subject};
//! use flagship_engine::{Evaluator, InMemoryStickyStore, NoSegments};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let evaluator = Evaluator::new(Arc::new(InMemoryStickyStore::new()));
//! let flag = Flag::new("web", "dark-mode", "prod", FlagKind::Boolean);
//! let subject = Subject::new("user-1");
//!
//! let response = evaluator.evaluate(&flag, &subject, &NoSegments).await;
//! assert!(response.default);
//! # });
//! ```

pub mod error;
pub mod evaluate;
pub mod sticky;

pub use error::{EngineError, Result};
pub use evaluate::{matches_rules, Evaluator, MapSegments, NoSegments, SegmentSource};
pub use sticky::{InMemoryStickyStore, StickyStore};
