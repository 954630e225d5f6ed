//! Configuration system for the lanferry CLI.

use anyhow::Context;
use lanferry_core::TransferConfig;
use lanferry_core::config::MAX_CHUNK_SIZE;
use lanferry_files::CollisionPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// lanferry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferSettings,
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address the receiver binds
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Seconds the sender waits for the TCP connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Attempts per file
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per read/write deadline in seconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
    /// Deadline for the receiver's verdict in seconds
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,
    /// How long the receiver waits for the key line or the next file, in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Largest batch accepted by `send`
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Directory for encrypted artifacts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    /// `overwrite` or `rename`
    #[serde(default = "default_collision")]
    pub collision: String,
    /// Keep files that failed verification
    #[serde(default)]
    pub keep_rejected: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Folder for received files
    #[serde(default = "default_receive_dir")]
    pub receive_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_listen_addr() -> String {
    "0.0.0.0:47520".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_chunk_size() -> usize {
    lanferry_files::DEFAULT_CHUNK_SIZE
}

fn default_max_retries() -> u32 {
    lanferry_core::config::DEFAULT_MAX_RETRIES
}

fn default_io_timeout() -> u64 {
    30
}

fn default_ack_timeout() -> u64 {
    120
}

fn default_idle_timeout() -> u64 {
    lanferry_core::config::DEFAULT_IDLE_TIMEOUT.as_secs()
}

fn default_max_files() -> usize {
    lanferry_core::config::DEFAULT_MAX_FILES
}

fn default_collision() -> String {
    CollisionPolicy::default().to_string()
}

fn default_receive_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("lanferry/received")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
            io_timeout_secs: default_io_timeout(),
            ack_timeout_secs: default_ack_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            max_files: default_max_files(),
            temp_dir: None,
            collision: default_collision(),
            keep_rejected: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            receive_dir: default_receive_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("lanferry/config.toml")
    }

    /// Load config from `path`, creating it with defaults if missing
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Load config from the default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        Self::load_or_create(Self::default_path())
    }

    /// Parse listen address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.network
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", self.network.listen_addr))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_listen_addr()?;

        if self.network.connect_timeout_secs == 0 {
            anyhow::bail!("Connect timeout must be at least 1 second");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!("Chunk size must be between 1 and 16MB");
        }

        if self.transfer.max_files == 0 || self.transfer.max_files > 1000 {
            anyhow::bail!("Max files must be between 1 and 1000");
        }

        if self.transfer.io_timeout_secs == 0
            || self.transfer.ack_timeout_secs == 0
            || self.transfer.idle_timeout_secs == 0
        {
            anyhow::bail!("Timeouts must be at least 1 second");
        }

        self.collision_policy()?;
        self.to_transfer_config().validate()?;

        Ok(())
    }

    /// Parsed collision policy
    ///
    /// # Errors
    ///
    /// Returns an error for anything but `overwrite` or `rename`.
    pub fn collision_policy(&self) -> anyhow::Result<CollisionPolicy> {
        self.transfer
            .collision
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
    }

    /// Engine settings derived from this file.
    ///
    /// An unparseable collision policy falls back to the default; call
    /// [`Config::validate`] first to reject it.
    #[must_use]
    pub fn to_transfer_config(&self) -> TransferConfig {
        let t = &self.transfer;
        TransferConfig {
            chunk_size: t.chunk_size,
            max_retries: t.max_retries,
            io_timeout: Duration::from_secs(t.io_timeout_secs),
            ack_timeout: Duration::from_secs(t.ack_timeout_secs),
            idle_timeout: Duration::from_secs(t.idle_timeout_secs),
            max_files: t.max_files,
            temp_dir: t.temp_dir.clone(),
            collision: self.collision_policy().unwrap_or_default(),
            keep_rejected: t.keep_rejected,
        }
    }
}
