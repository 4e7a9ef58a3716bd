// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flagship hub server binary.

use clap::Parser;
use flagship_engine::StickyStore;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Flagship hub - authoritative flag store and sync fan-out.
#[derive(Parser, Debug)]
#[command(name = "flagship-hub", about = "Flagship feature flag hub", version)]
struct Args {}

/// Interval between sweeps of expired sticky assignments.
const STICKY_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let _args = Args::parse();

	// Load .env file if present
	dotenvy::dotenv().ok();

	let config = flagship_hub::HubConfig::from_env();

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.log_level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	tracing::info!(
		host = %config.host,
		port = config.port,
		database = %config.database_url,
		"starting flagship-hub"
	);

	let pool = flagship_hub::db::create_pool(&config.database_url).await?;
	flagship_hub::db::run_migrations(&pool).await?;

	let bind_addr = format!("{}:{}", config.host, config.port);
	let state = flagship_hub::build_state(pool.clone(), config);

	// Fleet health sweeper.
	state
		.dispatcher
		.clone()
		.start_sweeper(Duration::from_secs(30));

	// Hourly sweep of expired sticky assignments.
	let sticky = flagship_hub::SqliteStickyStore::new(pool);
	tokio::spawn(async move {
		let mut tick = tokio::time::interval(STICKY_SWEEP_INTERVAL);
		tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		loop {
			tick.tick().await;
			match sticky.delete_expired().await {
				Ok(swept) if swept > 0 => {
					tracing::info!(swept, "expired sticky assignments removed");
				}
				Ok(_) => {}
				Err(e) => tracing::warn!(error = %e, "sticky sweep failed"),
			}
		}
	});

	let router = flagship_hub::create_router(state);
	let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
	tracing::info!(addr = %bind_addr, "hub listening");

	axum::serve(listener, router).await?;
	Ok(())
}
