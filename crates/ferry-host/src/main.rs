//! Ferry Host - TCP broker server for a shared JSON document.

use anyhow::Result;
use clap::Parser;
use ferry_core::{Broker, RetryPolicy};
use ferry_host::{DocumentStore, HostConfig, HostServer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "ferry-host")]
#[command(about = "Serve a JSON document to ferry clients over TCP")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = HostConfig::DEFAULT_HOST)]
    host: String,

    /// JSON document to serve (defaults to an empty object)
    #[arg(long)]
    document: Option<PathBuf>,

    /// Attempts for handler setup calls (enables retries)
    #[arg(long)]
    retry_limit: Option<u32>,

    /// Wait between retry attempts, in milliseconds
    #[arg(long, default_value = "500")]
    retry_interval_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Ferry host");

    let store = match &args.document {
        Some(path) => {
            info!("Serving document {}", path.display());
            DocumentStore::load(path)?
        }
        None => DocumentStore::new(serde_json::json!({})),
    };

    let mut builder = Broker::builder().handlers(Arc::new(store));
    if let Some(limit) = args.retry_limit {
        builder = builder.retry(RetryPolicy::new(
            limit,
            Duration::from_millis(args.retry_interval_ms),
        ));
    }
    let broker = builder.build()?;

    let mut handle =
        HostServer::start(broker.clone(), &format!("{}:{}", args.host, args.port)).await?;

    // Read by the parent process to find the port
    println!("FERRY_PORT={}", handle.port);

    info!("Ferry host running on {}", handle.addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    handle.shutdown();
    broker.close();

    Ok(())
}
