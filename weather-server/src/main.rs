//! Binary crate for the weather distribution server.
//!
//! This crate focuses on:
//! - Parsing the command line (just the listen port)
//! - Setting up logging
//! - Running the server until Ctrl-C, then shutting it down cleanly

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_core=info,weather_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cmd = cli::Cli::parse();
    cmd.run().await
}
