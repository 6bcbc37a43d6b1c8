//! pwnhub agent binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use pwnhub_agent::{Agent, AgentConfig};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// pwnhub-agent - registers this device with a pwnhub hub
#[derive(Parser, Debug)]
#[command(name = "pwnhub-agent")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PWNHUB_AGENT_CONFIG",
        default_value = "/etc/pwnhub/agent.toml"
    )]
    config: String,

    /// Check that the hub is reachable and exit
    #[arg(long)]
    check: bool,
}

/// Layer the optional TOML file under `PWNHUB_AGENT_*` environment variables.
fn load_config(path: &str) -> Result<AgentConfig> {
    let mut figment = Figment::new();
    if Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    }

    let config: AgentConfig = figment
        .merge(Env::prefixed("PWNHUB_AGENT_").split("__"))
        .extract()
        .context("failed to load configuration (is hub_url set?)")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pwnhub_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(load_config(&args.config)?);
    let agent = Agent::new(config).context("failed to create hub client")?;

    if args.check {
        agent
            .client()
            .health()
            .await
            .with_context(|| format!("hub at {} is not healthy", agent.client().base_url()))?;
        println!("hub at {} is healthy", agent.client().base_url());
        return Ok(());
    }

    if let Err(e) = agent.client().health().await {
        tracing::warn!(error = %e, "Hub health check failed, continuing");
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    agent.run(cancel).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
