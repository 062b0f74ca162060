//! Relay settings file shared by `cat-relay-server` and `cat-relay-client`.
//!
//! The server reads its listener settings from `[server]`; the client picks a
//! named `[[profiles]]` entry.  The file lives in:
//! - Windows:  `%APPDATA%\CatRelay\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/cat-relay/config.toml` or `~/.config/cat-relay/config.toml`
//! - macOS:    `~/Library/Application Support/CatRelay/config.toml`
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 5002
//! backlog = 5
//! identity_policy = "monotonic"
//!
//! [[profiles]]
//! name = "shack"
//! host = "192.168.1.20"
//! port = 5002
//! connect_timeout_secs = 5
//! log_level = "debug"
//! ```
//!
//! Every field has a serde default: an empty file, a partial file and no
//! file at all all yield a usable configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::registry::IdentityPolicy;
use crate::DEFAULT_PORT;

/// Failures while locating, reading or writing the relay settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `APPDATA` nor `HOME`/`XDG_CONFIG_HOME` is set, so there is no
    /// default settings file; pass `--config` instead.
    #[error("no default relay config location (set HOME or pass --config)")]
    NoPlatformConfigDir,

    #[error("cannot access relay config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("relay config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot encode relay config as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No connection profile with the requested name exists.
    #[error("no connection profile named '{0}'")]
    UnknownProfile(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level relay configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub profiles: Vec<ConnectionProfile>,
}

/// Listener settings for `cat-relay-server`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// IP address to bind.  `"0.0.0.0"` accepts peers on every interface.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen backlog passed to the OS.
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Identity numbering after every client has disconnected.
    #[serde(default)]
    pub identity_policy: IdentityPolicy,
    /// Capacity of the server event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// A named endpoint the client can connect to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionProfile {
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for the single connect attempt; absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    /// Client log level; absent means the `[server]` level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_backlog() -> u32 {
    5
}
fn default_event_capacity() -> usize {
    256
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            backlog: default_backlog(),
            identity_policy: IdentityPolicy::default(),
            event_capacity: default_event_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl ConnectionProfile {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            connect_timeout_secs: None,
            log_level: None,
        }
    }
}

impl RelayConfig {
    /// Looks up a connection profile by name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProfile`] if no profile has that name.
    pub fn profile(&self, name: &str) -> Result<&ConnectionProfile, ConfigError> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    /// Inserts `profile`, replacing any existing profile with the same name.
    pub fn upsert_profile(&mut self, profile: ConnectionProfile) {
        match self.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
    }

    /// Removes the named profile; returns whether one was removed.
    pub fn remove_profile(&mut self, name: &str) -> bool {
        let before = self.profiles.len();
        self.profiles.retain(|p| p.name != name);
        self.profiles.len() != before
    }
}

// ── Settings file ─────────────────────────────────────────────────────────────

/// Directory holding the relay's `config.toml`.
///
/// # Errors
///
/// [`ConfigError::NoPlatformConfigDir`] when the environment names no home
/// or application-data directory.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    relay_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Path both binaries read when `--config` is not given.
///
/// # Errors
///
/// See [`config_dir`].
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Reads the relay settings from [`config_file_path`].
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Reads the relay settings from `path`.  A missing file is not an error:
/// the relay then runs on its defaults.
///
/// # Errors
///
/// [`ConfigError::Io`] when the file exists but cannot be read, and
/// [`ConfigError::Parse`] when it is not valid TOML for [`RelayConfig`].
pub fn load_config_from(path: &Path) -> Result<RelayConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RelayConfig::default()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Ok(toml::from_str(&content)?)
}

/// Writes `config` to [`config_file_path`] (`cat-relay-server --init-config`).
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &RelayConfig) -> Result<(), ConfigError> {
    save_config_to(&config_file_path()?, config)
}

/// Writes `config` to `path` as pretty TOML.  Missing parent directories
/// are created first.
///
/// # Errors
///
/// [`ConfigError::Io`] naming the directory or file that could not be
/// written, or [`ConfigError::Serialize`].
pub fn save_config_to(path: &Path, config: &RelayConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// `CatRelay` under `%APPDATA%` or `~/Library/Application Support`,
/// `cat-relay` under the XDG config home elsewhere.
fn relay_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("CatRelay"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("cat-relay"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("CatRelay")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
