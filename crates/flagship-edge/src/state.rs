// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared edge state, constructor-injected into every route.

use std::sync::Arc;

use flagship_engine::{Evaluator, InMemoryStickyStore};

use crate::cache::EdgeCache;
use crate::config::EdgeConfig;
use crate::sync::SyncClient;

/// State threaded through the axum router. Cheap to clone.
#[derive(Clone)]
pub struct EdgeState {
	pub cache: Arc<EdgeCache>,
	pub evaluator: Arc<Evaluator>,
	pub sync: Arc<SyncClient>,
	pub sticky: Arc<InMemoryStickyStore>,
	pub config: Arc<EdgeConfig>,
	pub http: reqwest::Client,
}

impl EdgeState {
	pub fn new(config: EdgeConfig) -> Self {
		let config = Arc::new(config);
		let cache = Arc::new(EdgeCache::new(&config));
		let sticky = Arc::new(InMemoryStickyStore::new());
		EdgeState {
			evaluator: Arc::new(Evaluator::new(sticky.clone())),
			sync: Arc::new(SyncClient::new(config.clone(), cache.clone())),
			cache,
			sticky,
			config,
			http: reqwest::Client::new(),
		}
	}
}
