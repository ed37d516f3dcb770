//! Configuration system for the rendezvous relay.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/rendezvous-relay/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

/// Log level used when neither `--log-level` nor `RENDEZVOUS_LOG` is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
    relay: RelayFileConfig,
}

/// `[server]` section: where to listen and whom to notify.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    room_server: Option<String>,
}

/// `[relay]` section: room table limits.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayFileConfig {
    register_timeout_secs: Option<u64>,
    max_queue_size: Option<usize>,
    outbound_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug)]
#[command(version, about = "Rendezvous signaling relay")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "RENDEZVOUS_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/rendezvous-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base URL of the room server notified when a client leaves.
    /// An empty string disables notifications.
    #[arg(long, env = "RENDEZVOUS_ROOM_SERVER")]
    pub room_server: Option<String>,

    /// Seconds an unbound client is kept before eviction.
    #[arg(long)]
    pub register_timeout: Option<u64>,

    /// Maximum messages a client may hold for its absent peer.
    #[arg(long)]
    pub max_queue_size: Option<usize>,

    /// Frames buffered per connection before delivery fails.
    #[arg(long)]
    pub outbound_buffer: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "RENDEZVOUS_LOG")]
    pub log_level: String,
}

impl Default for RelayCliArgs {
    fn default() -> Self {
        Self {
            bind: None,
            config: None,
            room_server: None,
            register_timeout: None,
            max_queue_size: None,
            outbound_buffer: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:8089`).
    pub bind_addr: String,
    /// Room server base URL for bye notifications; empty disables them.
    pub room_server: String,
    /// Grace period, in seconds, before an unbound client is evicted.
    pub register_timeout_secs: u64,
    /// Maximum number of queued messages per client.
    pub max_queue_size: usize,
    /// Frames buffered per connection.
    pub outbound_buffer: usize,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8089".to_string(),
            room_server: "http://127.0.0.1:8080".to_string(),
            register_timeout_secs: 10,
            max_queue_size: 1024,
            outbound_buffer: 2048,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            room_server: cli
                .room_server
                .clone()
                .or_else(|| file.server.room_server.clone())
                .unwrap_or(defaults.room_server),
            register_timeout_secs: cli
                .register_timeout
                .or(file.relay.register_timeout_secs)
                .unwrap_or(defaults.register_timeout_secs),
            max_queue_size: cli
                .max_queue_size
                .or(file.relay.max_queue_size)
                .unwrap_or(defaults.max_queue_size),
            outbound_buffer: cli
                .outbound_buffer
                .or(file.relay.outbound_buffer)
                .unwrap_or(defaults.outbound_buffer),
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(RelayConfigFile::default());
    };
    let path = config_dir.join("rendezvous-relay").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
