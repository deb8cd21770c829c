//! Mandrake Server
//!
//! Accepts jobs over HTTP, builds each job's delivered context into a
//! container image, runs it and keeps the captured output for the client.
//!
//! Architecture:
//! - Repository: in-memory job registry
//! - Executor: bounded worker pool running build/run pipelines
//! - Runtime: container runtime driven through its CLI
//! - Service/API: job operations exposed over HTTP

pub mod api;
pub mod config;
pub mod executor;
pub mod repository;
pub mod runtime;
pub mod service;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::config::Config;
use crate::executor::Executor;
use crate::repository::JobRegistry;
use crate::runtime::CliRuntime;

#[derive(Parser)]
#[command(name = "mandrake-server")]
#[command(about = "Builds and runs delivered job contexts in containers", long_about = None)]
struct Args {
    /// Path to the server configuration file
    #[arg(env = "MANDRAKE_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mandrake_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Mandrake Server...");

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    tracing::info!(
        "Loaded configuration: context_dir={}, workers={}, runtime={}",
        config.context_dir.display(),
        config.workers,
        config.runtime_binary
    );

    tokio::fs::create_dir_all(&config.context_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create context directory {}",
                config.context_dir.display()
            )
        })?;

    let runtime = CliRuntime::new(config.runtime_binary.clone(), config.runtime_url.clone());
    if let Err(e) = runtime.check_available().await {
        tracing::warn!("Container runtime check failed, builds will fail: {}", e);
    }

    let registry = Arc::new(JobRegistry::new(config.context_dir.clone()));
    let cancel = CancellationToken::new();

    let (executor, dispatcher) = Executor::start(
        Arc::clone(&registry),
        Arc::new(runtime),
        config.executor_settings(),
        cancel.clone(),
    );

    // Build router with all API endpoints
    let app = api::create_router(AppState { registry, executor });

    tracing::info!("Listening on {}", config.bind);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Err(e) = dispatcher.await {
        tracing::warn!("Executor dispatcher panicked: {}", e);
    }

    tracing::info!("Mandrake Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C and tells the executor to stop
async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }

    tracing::info!("Shutdown requested");
    cancel.cancel();
}
