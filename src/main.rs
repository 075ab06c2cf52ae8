// QuotaGuard - Main Entry Point
//
// Loads the YAML service config, assembles the quota service with the
// in-memory bucket factory and a tracing event listener, and runs the
// admin HTTP server until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use quotaguard::bucket::MemoryBucketFactory;
use quotaguard::events::Listener;
use quotaguard::{Event, QuotaService, ServiceConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// QuotaGuard: namespaced token-bucket quota service
#[derive(Parser, Debug)]
#[command(name = "quotaguard")]
#[command(version)]
#[command(about = "Namespaced token-bucket quota service", long_about = None)]
struct Args {
    /// Path to the YAML service configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Port for the admin HTTP server
    #[arg(short, long, default_value_t = 8090)]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(filter.into())
                .from_env_lossy(),
        )
        .init();

    info!("QuotaGuard starting...");

    let config =
        ServiceConfig::from_file(&args.config).context("Failed to load configuration")?;

    let listener: Listener = Arc::new(|event: &Event| {
        tracing::info!(
            event = ?event.event_type,
            namespace = %event.namespace,
            bucket = %event.bucket_name,
            dynamic = event.dynamic,
            tokens = event.num_tokens,
            waited_ms = event.wait_time.as_millis() as u64,
            "engine event"
        );
    });

    let service = Arc::new(
        QuotaService::start(config, Arc::new(MemoryBucketFactory::new()), listener)
            .context("Failed to start quota service")?,
    );

    let admin = service.clone();
    let port = args.port;
    let server = tokio::spawn(async move {
        if let Err(e) = quotaguard::admin::start_admin_server(admin, port).await {
            tracing::error!("Admin server failed: {e:#}");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    server.abort();
    service.shutdown().await;

    Ok(())
}
