use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use weather_core::{
    Config, DistributionServer, provider::default_provider_from_config, server::DEFAULT_PORT,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "weather-server",
    version,
    about = "Pushes location-specific weather to connected TCP clients"
)]
pub struct Cli {
    /// Port to listen on; anything that is not a valid port falls back to 8080.
    #[arg(allow_hyphen_values = true)]
    pub port: Option<String>,
}

impl Cli {
    /// The requested port, or the default when it is missing or unusable.
    pub fn port(&self) -> u16 {
        let Some(raw) = self.port.as_deref() else {
            return DEFAULT_PORT;
        };

        match raw.trim().parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => {
                tracing::warn!(
                    port = raw,
                    default = DEFAULT_PORT,
                    "Invalid port number; using default"
                );
                DEFAULT_PORT
            }
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let port = self.port();

        let config = Config::load()
            .and_then(Config::with_env_overrides)
            .context("Failed to load configuration")?;
        let provider = default_provider_from_config(&config)?;

        if provider.is_available().await {
            tracing::info!(provider = %provider.id(), "Serving live data");
        } else {
            tracing::info!(provider = %provider.id(), "Serving simulated data");
        }

        let server = DistributionServer::new(provider, config.server.clone());
        serve_until(server, port, shutdown_signal()).await
    }
}

/// Serve on `port` until `shutdown` resolves, then run the full stop sequence.
async fn serve_until(
    server: Arc<DistributionServer>,
    port: u16,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let serving = Arc::clone(&server).start(port);
    tokio::pin!(serving);

    tokio::select! {
        result = &mut serving => {
            result.with_context(|| format!("Server on port {port} failed"))?;
        }
        () = shutdown => {
            server.stop().await;
            serving.await?;
        }
    }

    tracing::info!("Server shut down");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
///
/// A handler that cannot be installed is logged and simply never fires, so
/// the server keeps running instead of shutting down at once.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => tracing::info!("SIGINT received; shutting down"),
        () = terminate => tracing::info!("SIGTERM received; shutting down"),
    }
}
