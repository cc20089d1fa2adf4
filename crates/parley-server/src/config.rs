//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`parley.toml`)
//! - Environment variables (`PARLEY__SECTION__KEY`, plus `PARLEY_HOST` and
//!   `PARLEY_PORT`)

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat, FileSourceFile, Source};
use parley_core::{HubConfig, RegistryConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Message retention.
    #[serde(default)]
    pub messages: MessagesConfig,

    /// Session behaviour.
    #[serde(default)]
    pub session: SessionConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum number of topics.
    #[serde(default = "default_max_topics")]
    pub max_topics: usize,

    /// Maximum members per topic.
    #[serde(default = "default_max_members")]
    pub max_members_per_topic: usize,

    /// Maximum retained messages per topic.
    #[serde(default = "default_max_retained")]
    pub max_retained_messages: usize,

    /// Maximum chat message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum length of usernames and topic names.
    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,

    /// Frames queued per member before it is evicted.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// Message retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    /// Seconds a message is retained after it is published.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

/// Session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Close sessions idle for this many seconds. Zero disables the timeout.
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("PARLEY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("PARLEY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_topics() -> usize {
    RegistryConfig::default().max_topics
}

fn default_max_members() -> usize {
    RegistryConfig::default().max_members_per_topic
}

fn default_max_retained() -> usize {
    RegistryConfig::default().max_retained_messages
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_name_length() -> usize {
    RegistryConfig::default().max_name_length
}

fn default_outbound_buffer() -> usize {
    parley_core::member::DEFAULT_OUTBOUND_BUFFER
}

fn default_ttl_secs() -> u64 {
    30
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            messages: MessagesConfig::default(),
            session: SessionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_topics: default_max_topics(),
            max_members_per_topic: default_max_members(),
            max_retained_messages: default_max_retained(),
            max_message_size: default_max_message_size(),
            max_name_length: default_max_name_length(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

/// Environment overrides, e.g. `PARLEY__LIMITS__MAX_TOPICS=50`.
fn environment() -> Environment {
    Environment::with_prefix("PARLEY")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

impl Config {
    /// Load configuration from the first config file found, with environment
    /// overrides layered on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "parley.toml",
            "/etc/parley/parley.toml",
            "~/.config/parley/parley.toml",
        ];

        let found = config_paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).into_owned()))
            .find(|path| path.exists());

        match found {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading config file");
                let file = File::from(path.as_path()).format(FileFormat::Toml);
                Self::layered(Some(file), environment())
            }
            None => Self::layered(None::<File<FileSourceFile, FileFormat>>, environment()),
        }
    }

    fn layered<S>(file: Option<S>, env: Environment) -> Result<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(file);
        }

        builder
            .add_source(env)
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the address to bind to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Hub settings derived from this configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            message_ttl: Duration::from_secs(self.messages.ttl_secs),
            registry: RegistryConfig {
                max_topics: self.limits.max_topics,
                max_members_per_topic: self.limits.max_members_per_topic,
                max_retained_messages: self.limits.max_retained_messages,
                max_name_length: self.limits.max_name_length,
            },
            outbound_buffer: self.limits.outbound_buffer,
            max_message_size: self.limits.max_message_size,
            idle_timeout: match self.session.idle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}
