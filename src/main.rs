//! S3 Content Gateway - metadata REST API over S3

use clap::Parser;
use s3_content_gateway::{config::Config, metrics::server::MetricsServer, server::Server};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// S3 Content Gateway - file and folder API backed by an S3 bucket
#[derive(Parser, Debug)]
#[command(name = "s3-content-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Starting S3 Content Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = if args.config.exists() {
        let config = Config::load(&args.config)?;
        info!("Loaded configuration from {:?}", args.config);
        config
    } else {
        warn!("No configuration at {:?}, using defaults", args.config);
        Config::default()
    };

    let mut metrics_server = if config.metrics.enabled {
        let mut metrics_server = MetricsServer::new(config.metrics.address.clone());
        metrics_server.start().await?;
        Some(metrics_server)
    } else {
        None
    };

    let mut server = Server::from_config(&config)?;
    server.run().await?;

    if let Some(metrics_server) = metrics_server.as_mut() {
        metrics_server.shutdown().await;
    }

    Ok(())
}
