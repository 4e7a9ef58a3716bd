// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared application state, constructor-injected into every route.

use std::sync::Arc;

use flagship_engine::Evaluator;

use crate::config::HubConfig;
use crate::dispatcher::Dispatcher;
use crate::repository::HubRepository;
use crate::service::FlagService;

/// State threaded through the axum router. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
	pub repo: Arc<dyn HubRepository>,
	pub service: FlagService,
	pub dispatcher: Arc<Dispatcher>,
	pub evaluator: Arc<Evaluator>,
	pub config: Arc<HubConfig>,
}

impl AppState {
	pub fn new(
		repo: Arc<dyn HubRepository>,
		dispatcher: Arc<Dispatcher>,
		evaluator: Arc<Evaluator>,
		config: HubConfig,
	) -> Self {
		AppState {
			service: FlagService::new(repo.clone(), dispatcher.clone()),
			repo,
			dispatcher,
			evaluator,
			config: Arc::new(config),
		}
	}
}
