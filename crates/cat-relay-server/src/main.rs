//! CAT relay server entry point.
//!
//! Starts a [`RelayServer`] and either logs every event it produces or, with
//! `--echo`, answers each `;`-terminated command with itself.
//!
//! # Usage
//!
//! ```text
//! cat-relay-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>        Config file [default: platform config dir]
//!   --bind <ADDR>          Listener IP address [default: from config, 0.0.0.0]
//!   --port <PORT>          Listener port [default: from config, 5002]
//!   --backlog <N>          Listen backlog [default: from config, 5]
//!   --restart-identities   Restart numbering at 1 whenever no client is connected
//!   --echo                 Answer every command with itself
//!   --init-config          Write the effective configuration and exit
//! ```
//!
//! Command-line values override the `[server]` section of the config file;
//! `RUST_LOG` overrides its `log_level`.  `--init-config` saves the merged
//! result, which is a quick way to start a config file.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load RelayConfig (TOML)
//!  └─ RelayServer::start()         -- accept task + per-connection tasks
//!  └─ event consumer (Tokio task)
//!       ├─ CommandDispatcher<EchoInterpreter>   (--echo)
//!       └─ event logger                         (default)
//!  └─ wait for Ctrl-C, then RelayServer::close()
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cat_relay_core::config::{self, ConfigError};
use cat_relay_core::{IdentityPolicy, RelayConfig, ServerEvent, ServerSection};
use cat_relay_server::{CommandDispatcher, EchoInterpreter, RelayServer, ServerConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Multi-client TCP relay for textual CAT protocol peers.
#[derive(Debug, Parser)]
#[command(
    name = "cat-relay-server",
    about = "Multi-client TCP relay for textual CAT protocol peers",
    version
)]
struct Cli {
    /// Path of the TOML config file.
    ///
    /// When omitted the platform config directory is used; a missing file
    /// means built-in defaults.
    #[arg(long, env = "CAT_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the listener to.
    #[arg(long, env = "CAT_RELAY_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "CAT_RELAY_PORT")]
    port: Option<u16>,

    /// Listen backlog.
    #[arg(long)]
    backlog: Option<u32>,

    /// Restart identity numbering at 1 whenever no client is connected.
    #[arg(long)]
    restart_identities: bool,

    /// Answer every `;`-terminated command with itself.
    #[arg(long)]
    echo: bool,

    /// Write the effective configuration to the config file and exit.
    #[arg(long)]
    init_config: bool,
}

impl Cli {
    /// Loads the config file named by `--config`, or the default one.
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

    /// Saves `file` to the path named by `--config`, or the default one,
    /// and returns where it was written.
    fn save_config(&self, file: &RelayConfig) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => {
                config::save_config_to(path, file)
                    .with_context(|| format!("failed to write config to {}", path.display()))?;
                Ok(path.clone())
            }
            None => {
                config::save_config(file).context("failed to write default config")?;
                Ok(config::config_file_path()?)
            }
        }
    }

    /// Applies command-line overrides to the `[server]` section.
    fn apply_overrides(&self, mut section: ServerSection) -> ServerSection {
        if let Some(bind) = &self.bind {
            section.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            section.port = port;
        }
        if let Some(backlog) = self.backlog {
            section.backlog = backlog;
        }
        if self.restart_identities {
            section.identity_policy = IdentityPolicy::RestartWhenEmpty;
        }
        section
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut file = cli.load_config()?;
    file.server = cli.apply_overrides(file.server);
    let section = &file.server;

    // Initialise structured logging.  `RUST_LOG` wins over the config file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&section.log_level)),
        )
        .init();

    if cli.init_config {
        let path = cli.save_config(&file)?;
        info!("configuration written to {}", path.display());
        return Ok(());
    }

    let server_config = ServerConfig::from_section(section)?;
    let (server, events) = RelayServer::start(server_config)
        .await
        .context("failed to start relay server")?;
    let server = Arc::new(server);

    // ── Event consumer ────────────────────────────────────────────────────────
    if cli.echo {
        let dispatcher = CommandDispatcher::new(Arc::new(EchoInterpreter), server.clone());
        tokio::spawn(dispatcher.run(events));
        info!("echo interpreter attached");
    } else {
        tokio::spawn(log_events(events));
    }

    info!(
        "CAT relay ready on {}.  Press Ctrl-C to exit.",
        server.local_addr()
    );

    // ── Ctrl-C ────────────────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");

    server.close();
    info!("CAT relay stopped");
    Ok(())
}

async fn log_events(mut events: tokio::sync::mpsc::Receiver<ServerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::ClientConnected { identity, peer } => {
                info!("client {identity} connected from {peer}");
            }
            ServerEvent::Message { text, identity } => {
                info!("{identity} -> {text:?}");
            }
            ServerEvent::ClientDisconnected { identity, reason } => {
                info!("client {identity} gone: {reason}");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_leave_config_untouched() {
        // Arrange
        let cli = Cli::parse_from(["cat-relay-server"]);

        // Act
        let section = cli.apply_overrides(ServerSection::default());

        // Assert
        assert_eq!(section, ServerSection::default());
        assert!(!cli.echo);
    }

    #[test]
    fn test_cli_port_override() {
        let cli = Cli::parse_from(["cat-relay-server", "--port", "4532"]);
        let section = cli.apply_overrides(ServerSection::default());
        assert_eq!(section.port, 4532);
    }

    #[test]
    fn test_cli_bind_and_backlog_override() {
        let cli = Cli::parse_from([
            "cat-relay-server",
            "--bind",
            "127.0.0.1",
            "--backlog",
            "32",
        ]);

        let section = cli.apply_overrides(ServerSection::default());

        assert_eq!(section.bind_address, "127.0.0.1");
        assert_eq!(section.backlog, 32);
    }

    #[test]
    fn test_cli_restart_identities_flag_sets_policy() {
        let cli = Cli::parse_from(["cat-relay-server", "--restart-identities"]);
        let section = cli.apply_overrides(ServerSection::default());
        assert_eq!(section.identity_policy, IdentityPolicy::RestartWhenEmpty);
    }

    #[test]
    fn test_cli_overrides_take_precedence_over_file_values() {
        let file_section = ServerSection {
            port: 7000,
            log_level: "debug".to_string(),
            ..ServerSection::default()
        };
        let cli = Cli::parse_from(["cat-relay-server", "--port", "7001"]);

        let section = cli.apply_overrides(file_section);

        assert_eq!(section.port, 7001);
        // Values without a CLI override come from the file.
        assert_eq!(section.log_level, "debug");
    }

    #[test]
    fn test_overridden_section_builds_server_config() {
        let cli = Cli::parse_from(["cat-relay-server", "--bind", "127.0.0.1", "--port", "0"]);
        let section = cli.apply_overrides(ServerSection::default());

        let cfg = ServerConfig::from_section(&section).unwrap();

        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:0");
    }

    #[test]
    fn test_init_config_writes_overridden_section() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("cat_relay_init_{}", std::process::id()));
        let path = dir.join("config.toml");
        let path_arg = path.to_string_lossy().into_owned();
        let cli = Cli::parse_from([
            "cat-relay-server",
            "--config",
            path_arg.as_str(),
            "--port",
            "4532",
            "--init-config",
        ]);
        let mut file = cli.load_config().unwrap();
        file.server = cli.apply_overrides(file.server);

        // Act
        let written = cli.save_config(&file).unwrap();

        // Assert
        assert!(cli.init_config);
        assert_eq!(written, path);
        let reloaded = config::load_config_from(&path).unwrap();
        assert_eq!(reloaded.server.port, 4532);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_bind_override_is_rejected() {
        let cli = Cli::parse_from(["cat-relay-server", "--bind", "not.an.ip"]);
        let section = cli.apply_overrides(ServerSection::default());

        assert!(ServerConfig::from_section(&section).is_err());
    }

    #[test]
    fn test_load_config_from_missing_explicit_path_uses_defaults() {
        let cli = Cli::parse_from([
            "cat-relay-server",
            "--config",
            "/nonexistent/cat-relay/config.toml",
        ]);

        let cfg = cli.load_config().unwrap();

        assert_eq!(cfg, RelayConfig::default());
    }
}
