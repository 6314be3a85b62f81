// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use dotenv::dotenv;
use oracle_resolution::config::ResolutionNodeConfig;
use oracle_resolution::node::run_resolution_node;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version)]
struct Args {
    /// Port for the /metrics and /health endpoints
    #[clap(long, default_value_t = 9184)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ResolutionNodeConfig::from_env()?;
    let prometheus_registry = prometheus::Registry::new();

    let (handles, cancel) =
        run_resolution_node(config, args.metrics_port, prometheus_registry).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, cancelling tasks");
    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
