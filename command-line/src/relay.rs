//! Command line entry point for the ServiDesk relay.
//!
//! # Configuration
//!
//! Scaffold a config file, then edit it (admin token, TLS paths,
//! timeouts):
//!
//! ```no_run
//! servidesk-relay init-config relay.toml
//! ```
//!
//! # Server
//!
//! ```no_run
//! servidesk-relay start relay.toml
//! ```

mod commands;

mod cli {
    use anyhow::Result;
    use clap::{Parser, Subcommand};
    use std::path::PathBuf;

    use super::commands;

    #[derive(Parser, Debug)]
    #[clap(author, version, about, long_about = None)]
    pub struct RelayCli {
        #[clap(subcommand)]
        cmd: Command,
    }

    #[derive(Debug, Subcommand)]
    pub enum Command {
        /// Write a default configuration file to start from.
        InitConfig {
            /// Force overwrite if the file exists.
            #[clap(short, long)]
            force: bool,

            /// Write the scaffolded config to this file.
            file: PathBuf,
        },

        /// Start the relay's WebSocket and HTTP surface.
        Start {
            /// Override the configured bind address (`host:port`).
            #[clap(long)]
            bind: Option<String>,

            /// Override the configured heartbeat interval in milliseconds.
            #[clap(long)]
            heartbeat_interval_ms: Option<u64>,

            /// Override the configured active-session idle timeout in
            /// milliseconds.
            #[clap(long)]
            session_timeout_ms: Option<u64>,

            /// Config file to load.
            config: PathBuf,
        },
    }

    pub(super) async fn run() -> Result<()> {
        let args = RelayCli::parse();
        match args.cmd {
            Command::InitConfig { file, force } => commands::init_config::run(file, force).await,
            Command::Start {
                bind,
                heartbeat_interval_ms,
                session_timeout_ms,
                config,
            } => commands::start::run(config, bind, heartbeat_interval_ms, session_timeout_ms).await,
        }
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "servidesk=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    if let Err(err) = cli::run().await {
        tracing::error!("{err}");
        std::process::exit(1);
    }

    Ok(())
}
