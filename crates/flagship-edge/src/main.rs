// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flagship edge server binary.

use clap::Parser;
use flagship_engine::StickyStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Flagship edge - local flag cache and evaluation server.
#[derive(Parser, Debug)]
#[command(name = "flagship-edge", about = "Flagship feature flag edge server", version)]
struct Args {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let _args = Args::parse();

	// Load .env file if present
	dotenvy::dotenv().ok();

	let config = flagship_edge::EdgeConfig::from_env();

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.log_level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	tracing::info!(
		hub = %config.hub_url,
		environment = %config.environment,
		sync_type = config.sync_type.as_str(),
		server_id = %config.server_id,
		"starting flagship-edge"
	);

	let bind_addr = format!("{}:{}", config.host, config.port);
	let cleanup_interval = config.cleanup_interval;
	let state = flagship_edge::EdgeState::new(config);

	// Full sync then streaming updates.
	state.sync.start().await;

	// Periodic cache sweep plus sticky expiry.
	state.cache.clone().start_sweeper(cleanup_interval);
	let sticky = state.sticky.clone();
	tokio::spawn(async move {
		let mut tick = tokio::time::interval(cleanup_interval);
		tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		loop {
			tick.tick().await;
			if let Err(e) = sticky.delete_expired().await {
				tracing::warn!(error = %e, "sticky sweep failed");
			}
		}
	});

	let router = flagship_edge::create_router(state);
	let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
	tracing::info!(addr = %bind_addr, "edge listening");

	axum::serve(listener, router).await?;
	Ok(())
}
