//! CAT relay client entry point.
//!
//! Connects to a relay server, sends every line read from stdin and prints
//! every message received from the server to stdout.  Log output goes to
//! stderr so stdout carries protocol text only.
//!
//! # Usage
//!
//! ```text
//! cat-relay-client [OPTIONS]
//!
//! Options:
//!   --config <PATH>           Config file [default: platform config dir]
//!   --profile <NAME>          Connection profile from the config file
//!   --host <HOST>             Server host [default: profile or 127.0.0.1]
//!   --port <PORT>             Server port [default: profile or 5002]
//!   --connect-timeout <SECS>  Give up connecting after SECS seconds
//! ```
//!
//! The client stops on Ctrl-C, at the end of stdin, or when the server
//! closes the connection.  `RUST_LOG` wins over the profile's `log_level`,
//! which in turn defaults to the file's `[server]` level.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ RelayClient::connect()      -- single attempt, no reconnect
//!  └─ event printer (Tokio task)  -- ClientEvent::Message -> stdout
//!  └─ stdin loop                  -- each line -> RelayClient::send()
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cat_relay_client::{ClientConfig, RelayClient};
use cat_relay_core::config::{self, ConfigError};
use cat_relay_core::{ClientEvent, RelayConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Line-oriented client for a CAT relay server.
#[derive(Debug, Parser)]
#[command(
    name = "cat-relay-client",
    about = "Line-oriented client for a CAT relay server",
    version
)]
struct Cli {
    /// Path of the TOML config file.
    #[arg(long, env = "CAT_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Name of a `[[profiles]]` entry in the config file.
    #[arg(long, env = "CAT_RELAY_PROFILE")]
    profile: Option<String>,

    /// Host name or IP address of the relay server.
    #[arg(long, env = "CAT_RELAY_HOST")]
    host: Option<String>,

    /// TCP port of the relay server.
    #[arg(long, env = "CAT_RELAY_PORT")]
    port: Option<u16>,

    /// Give up connecting after this many seconds.
    #[arg(long)]
    connect_timeout: Option<u64>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<RelayConfig> {
        match &self.config {
            Some(path) => config::load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => match config::load_config() {
                Ok(cfg) => Ok(cfg),
                Err(ConfigError::NoPlatformConfigDir) => Ok(RelayConfig::default()),
                Err(e) => Err(e).context("failed to load default config"),
            },
        }
    }

    /// Resolves the connection settings: profile first, then CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if `--profile` names a profile the config lacks.
    fn client_config(&self, file: &RelayConfig) -> anyhow::Result<ClientConfig> {
        let mut cfg = match &self.profile {
            Some(name) => ClientConfig::from(file.profile(name)?),
            None => ClientConfig::default(),
        };
        if let Some(host) = &self.host {
            cfg.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(secs) = self.connect_timeout {
            cfg.connect_timeout = Some(Duration::from_secs(secs));
        }
        Ok(cfg)
    }

    /// Fallback log filter: the selected profile's level, else the file's.
    fn log_level<'a>(&self, file: &'a RelayConfig) -> &'a str {
        self.profile
            .as_deref()
            .and_then(|name| file.profile(name).ok())
            .and_then(|profile| profile.log_level.as_deref())
            .unwrap_or(file.server.log_level.as_str())
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = cli.load_config()?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level(&file))),
        )
        .init();

    let (client, events) = RelayClient::new(cli.client_config(&file)?);
    client
        .connect()
        .await
        .with_context(|| format!("could not connect to {}", client.config().target()))?;

    let printer = tokio::spawn(print_events(events));
    tokio::pin!(printer);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("shutdown signal received");
                break;
            }
            _ = &mut printer => break,
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(line) => {
                    if let Err(e) = client.send(&line) {
                        warn!("{e}");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    client.clean_up();
    Ok(())
}

/// Prints messages until the server goes away.
async fn print_events(mut events: mpsc::Receiver<ClientEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Message(text) => println!("{}", text.trim_end_matches(['\r', '\n'])),
            ClientEvent::Error(detail) => {
                error!("connection failed: {detail}");
                break;
            }
            ClientEvent::Disconnected => {
                info!("server closed the connection");
                break;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
