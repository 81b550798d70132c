// =============================================================================
// fleetwatch — real-time monitor service for broker-managed accounts
// =============================================================================
//
// `start` and `websocket` run the service in the foreground until Ctrl+C.
// The query subcommands (add, remove, snapshot, exposure, stats) talk to a
// running service over its own push channel.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod alerts;
mod broker;
mod client;
mod config;
mod export;
mod monitor;
mod server;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::broker::{BrokerApi, ManagerClient};
use crate::config::RmsConfig;
use crate::monitor::engine::MonitorEngine;
use crate::server::protocol::ClientCommand;
use crate::server::ServerState;

#[derive(Parser)]
#[command(
    name = "fleetwatch",
    about = "Real-time monitor service for broker-managed trading accounts",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor engine without the push channel.
    Start {
        /// Update interval in seconds.
        #[arg(short, long)]
        interval: Option<u64>,
        /// Account ids to monitor from the start.
        #[arg(short, long, num_args = 1..)]
        accounts: Vec<u64>,
    },
    /// Run the monitor engine plus the WebSocket push channel.
    Websocket {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Add an account to a running service.
    Add { login_id: u64 },
    /// Remove an account from a running service.
    Remove { login_id: u64 },
    /// Print an account snapshot (or the whole fleet) from a running service.
    Snapshot {
        #[arg(short, long)]
        login_id: Option<u64>,
    },
    /// Print per-symbol exposure (or one symbol's positions) from a running service.
    Exposure {
        #[arg(short, long)]
        symbol: Option<String>,
    },
    /// Print engine statistics from a running service.
    Stats,
    /// Refresh once and write the monitoring picture to a JSON file.
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Account ids to refresh before exporting.
        #[arg(short, long, num_args = 1..)]
        accounts: Vec<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = RmsConfig::from_env();

    match cli.command {
        Command::Start { interval, accounts } => {
            if let Some(interval) = interval {
                config.update_interval = interval;
            }
            config.validate()?;

            let engine = build_engine(config);
            for login_id in &accounts {
                engine.add_account(*login_id);
            }
            engine.clone().start().await?;
            info!(
                accounts = accounts.len(),
                interval_secs = engine.config().update_interval,
                "monitoring started, press Ctrl+C to stop"
            );

            tokio::signal::ctrl_c().await?;
            warn!("shutdown signal received, stopping");
            engine.stop().await;
        }

        Command::Websocket { host, port } => {
            if let Some(host) = host {
                config.ws_host = host;
            }
            if let Some(port) = port {
                config.ws_port = port;
            }
            config.validate()?;

            let engine = build_engine(config.clone());
            engine.clone().start().await?;

            let state = Arc::new(ServerState::new(engine.clone()));
            let ws_host = config.ws_host.clone();
            let ws_port = config.ws_port;
            tokio::spawn(async move {
                if let Err(e) = server::ws::serve(state, &ws_host, ws_port).await {
                    error!(error = %e, "push channel server failed");
                }
            });

            tokio::signal::ctrl_c().await?;
            warn!("shutdown signal received, stopping");
            engine.stop().await;
        }

        Command::Add { login_id } => {
            client::run_command(&config, ClientCommand::AddAccount { login_id }).await?;
        }
        Command::Remove { login_id } => {
            client::run_command(&config, ClientCommand::RemoveAccount { login_id }).await?;
        }
        Command::Snapshot { login_id } => {
            client::run_command(&config, ClientCommand::GetSnapshot { login_id }).await?;
        }
        Command::Exposure { symbol } => {
            client::run_command(&config, ClientCommand::GetExposure { symbol }).await?;
        }
        Command::Stats => {
            client::run_command(&config, ClientCommand::GetStats).await?;
        }

        Command::Export { output, accounts } => {
            config.validate()?;

            let broker: Arc<dyn BrokerApi> = Arc::new(ManagerClient::new(
                config.manager_base_url.clone(),
                config.manager_api_key.clone(),
                config.manager_api_secret.clone(),
            ));
            broker
                .ping()
                .await
                .context("broker manager handshake failed")?;

            let engine = Arc::new(MonitorEngine::new(broker, config));
            for login_id in accounts {
                engine.add_account(login_id);
            }
            engine.tick().await;

            let path = output.unwrap_or_else(|| {
                PathBuf::from(format!("rms_export_{}.json", chrono::Utc::now().timestamp()))
            });
            export::export_data(&engine, &path)?;
        }
    }

    Ok(())
}

fn build_engine(config: RmsConfig) -> Arc<MonitorEngine> {
    let broker: Arc<dyn BrokerApi> = Arc::new(ManagerClient::new(
        config.manager_base_url.clone(),
        config.manager_api_key.clone(),
        config.manager_api_secret.clone(),
    ));
    Arc::new(MonitorEngine::new(broker, config))
}
