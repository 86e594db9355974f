//! Hostwatch agent - host telemetry and threat detection
//!
//! This binary runs on each monitored host, collecting system metrics,
//! logs and security events and shipping them to the collector.

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration first, so a bad environment fails before anything
    // else starts.
    let config = config::AgentConfig::load()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(fmt::layer().json())
        .init();

    info!(
        server_id = %config.server_id,
        channel = %config.channel,
        version = %config.agent_version,
        "starting hostwatch-agent"
    );

    let agent = orchestrator::Agent::new(config)?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let run = {
        let agent_shutdown = shutdown_tx.clone();
        async move { agent.run(agent_shutdown).await }
    };

    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received, shutting down");
            let _ = shutdown_tx.send(());
            run.await?;
        }
    }

    Ok(())
}
