// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Sidequest orchestrator server binary.

use clap::{Parser, Subcommand};
use std::time::Duration;
use tower_http::{
	cors::{Any, CorsLayer},
	trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sidequest_server::{build_app_state, create_router};

/// Sidequest - multi-pipeline job orchestrator for local git repositories.
#[derive(Parser, Debug)]
#[command(name = "sidequest-server", about = "Sidequest job orchestrator", version)]
struct Args {
	/// Path to the TOML configuration file.
	#[arg(long, env = "SIDEQUEST_CONFIG")]
	config: Option<std::path::PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version information.
	Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("sidequest-server {}", env!("CARGO_PKG_VERSION"));
		return Ok(());
	}

	// Load .env file if present
	dotenvy::dotenv().ok();

	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
			tracing_subscriber::EnvFilter::new("info,sidequest=debug")
		}))
		.with(tracing_subscriber::fmt::layer())
		.init();

	if let Some(path) = &args.config {
		std::env::set_var("SIDEQUEST_CONFIG", path);
	}
	let config = sidequest_config::load_config()?;

	let pool = sidequest_db::create_pool(&config.database.url).await?;
	sidequest_db::migrate(&pool).await?;

	let state = build_app_state(&config, pool);

	// Jobs left running by a crashed process are unowned now; surface them
	// as failed before any pipeline dispatches.
	match state.store.sweep_abandoned().await {
		Ok(0) => {}
		Ok(swept) => warn!(swept, "abandoned jobs marked failed at startup"),
		Err(e) => warn!(error = %e, "startup sweep failed"),
	}

	// Periodic retention cleanup.
	{
		let store = state.store.clone();
		let retention_days = config.runtime.job_retention_days;
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
			loop {
				ticker.tick().await;
				match store.delete_old_jobs(retention_days).await {
					Ok(0) => {}
					Ok(deleted) => info!(deleted, retention_days, "old jobs cleaned up"),
					Err(e) => warn!(error = %e, "job retention cleanup failed"),
				}
			}
		});
	}

	let registry = state.registry.clone();
	let router = create_router(state)
		.layer(TraceLayer::new_for_http())
		.layer(
			CorsLayer::new()
				.allow_origin(Any)
				.allow_methods(Any)
				.allow_headers(Any),
		);

	let addr = config.socket_addr();
	let listener = tokio::net::TcpListener::bind(&addr).await?;
	info!(addr = %addr, "sidequest server listening");

	axum::serve(listener, router)
		.with_graceful_shutdown(shutdown_signal())
		.await?;

	registry.shutdown_all().await;
	info!("server stopped");
	Ok(())
}

async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
	info!("shutdown signal received");
}
