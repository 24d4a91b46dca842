//! Server configuration: TOML file + CLI overrides.

use pghoney_core::{AuthMode, HoneyError, HoneyResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub hpfeeds: HpfeedsSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds a connection may live, measured from accept.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Seconds to wait for in-flight sessions on shutdown. Unbounded if unset.
    #[serde(default)]
    pub shutdown_grace: Option<u64>,
    #[serde(default)]
    pub debug: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            connection_timeout: default_connection_timeout(),
            shutdown_grace: None,
            debug: false,
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    /// Usernames that are offered a password challenge.
    #[serde(default = "default_users")]
    pub users: Vec<String>,
    /// Ask for a cleartext password instead of an MD5 hash.
    #[serde(default)]
    pub cleartext: bool,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            users: default_users(),
            cleartext: false,
        }
    }
}

/// `[hpfeeds]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct HpfeedsSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_hpfeeds_host")]
    pub host: String,
    #[serde(default = "default_hpfeeds_port")]
    pub port: u16,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_ident")]
    pub ident: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for HpfeedsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_hpfeeds_host(),
            port: default_hpfeeds_port(),
            channel: default_channel(),
            ident: default_ident(),
            secret: String::new(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5432
}
fn default_connection_timeout() -> u64 {
    10
}
fn default_users() -> Vec<String> {
    vec!["postgres".to_string()]
}
fn default_hpfeeds_host() -> String {
    "127.0.0.1".to_string()
}
fn default_hpfeeds_port() -> u16 {
    10000
}
fn default_channel() -> String {
    "pghoney.events".to_string()
}
fn default_ident() -> String {
    "pghoney".to_string()
}
fn default_queue_capacity() -> usize {
    1024
}

/// Resolved hpfeeds settings.
#[derive(Debug, Clone)]
pub struct HpfeedsConfig {
    pub host: String,
    pub port: u16,
    pub channel: String,
    pub ident: String,
    pub secret: String,
    pub queue_capacity: usize,
}

/// Resolved server configuration (CLI overrides applied, values validated).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub users: Vec<String>,
    pub auth_mode: AuthMode,
    pub connection_timeout: Duration,
    pub shutdown_grace: Option<Duration>,
    pub debug: bool,
    /// `None` when telemetry is disabled.
    pub hpfeeds: Option<HpfeedsConfig>,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_address: Option<&str>,
        cli_port: Option<u16>,
        cli_debug: bool,
    ) -> HoneyResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse_file(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, cli_address, cli_port, cli_debug)
    }

    pub fn parse_file(content: &str) -> HoneyResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| HoneyError::Config(format!("config parse error: {e}")))
    }

    /// Merge CLI overrides into a parsed file and validate the result.
    pub fn resolve(
        file: ConfigFile,
        cli_address: Option<&str>,
        cli_port: Option<u16>,
        cli_debug: bool,
    ) -> HoneyResult<Self> {
        if file.server.connection_timeout == 0 {
            return Err(HoneyError::Config(
                "server.connection_timeout must be at least 1 second".into(),
            ));
        }

        let hpfeeds = if file.hpfeeds.enabled {
            let hp = file.hpfeeds;
            if hp.queue_capacity == 0 {
                return Err(HoneyError::Config(
                    "hpfeeds.queue_capacity must be at least 1".into(),
                ));
            }
            if hp.ident.len() > u8::MAX as usize || hp.channel.len() > u8::MAX as usize {
                return Err(HoneyError::Config(
                    "hpfeeds.ident and hpfeeds.channel are limited to 255 bytes".into(),
                ));
            }
            Some(HpfeedsConfig {
                host: hp.host,
                port: hp.port,
                channel: hp.channel,
                ident: hp.ident,
                secret: hp.secret,
                queue_capacity: hp.queue_capacity,
            })
        } else {
            None
        };

        let auth_mode = if file.auth.cleartext {
            AuthMode::Cleartext
        } else {
            AuthMode::Md5
        };

        Ok(Self {
            address: cli_address
                .map(|s| s.to_string())
                .unwrap_or(file.server.address),
            port: cli_port.unwrap_or(file.server.port),
            users: file.auth.users,
            auth_mode,
            connection_timeout: Duration::from_secs(file.server.connection_timeout),
            shutdown_grace: file.server.shutdown_grace.map(Duration::from_secs),
            debug: cli_debug || file.server.debug,
            hpfeeds,
        })
    }

    /// `address:port` suitable for binding.
    pub fn listen_addr(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
