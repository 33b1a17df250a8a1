//! `vault` — encrypted file service entry point.
//!
//! Startup sequence:
//! 1. Parse the command line and load [`Config`] from YAML plus environment.
//! 2. Initialise structured JSON logging.
//! 3. Build the S3 client and the encryption [`Connection`].
//! 4. Create the bucket if it does not exist.
//! 5. Build the Axum router and serve until Ctrl-C.

mod config;
mod server;
mod store;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use config::Config;
use server::state::AppState;
use store::{Connection, PartLimits, S3Store};

/// Encrypts uploads with AES-256-GCM and stores them in an S3-compatible bucket.
#[derive(Debug, Parser)]
#[command(name = "vault", version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "CONFIG_FILE", default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cli = Cli::parse();
    let cfg = Config::load(&cli.config).map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.service.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        endpoint = %cfg.minio.endpoint,
        bucket = %cfg.minio.bucket,
        "vault starting"
    );

    // -----------------------------------------------------------------------
    // 3. Object store + encryption
    // -----------------------------------------------------------------------
    let s3 = S3Store::connect(&cfg.minio).await;
    let conn = Connection::new(Arc::new(s3), cfg.aes_key()?, PartLimits::default());
    let chunk_size = cfg.chunk_size()?;
    info!(
        chunk_size,
        mode = if chunk_size == 0 { "whole" } else { "chunked" },
        "encryption configured"
    );

    // -----------------------------------------------------------------------
    // 4. Bucket
    // -----------------------------------------------------------------------
    conn.create_bucket_if_not_exists(&cfg.minio.bucket)
        .await
        .with_context(|| format!("failed to prepare bucket {:?}", cfg.minio.bucket))?;

    // -----------------------------------------------------------------------
    // 5. HTTP server
    // -----------------------------------------------------------------------
    let state = AppState::new(
        conn,
        cfg.minio.bucket.clone(),
        chunk_size,
        cfg.max_upload_size()?,
    );
    let router = server::router::build(state);

    let addr = cfg.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("vault stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, draining connections");
}
