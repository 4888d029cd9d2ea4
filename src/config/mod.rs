//! Configuration management for channels-core
//!
//! Handles loading, defaults, and validation for the client runtime,
//! the durable message log, and logging. Mirrors the teacher's pattern
//! of `#[serde(default = "...")]` per-field defaults plus a hand-written
//! `Default` impl, loadable from either JSON or TOML.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for a channels client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base directory for all channel storage (`channels_client/channels/...`).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Mailbox account credentials used to listen for inbound messages.
    pub mailbox_account: MailboxAccountConfig,

    /// Durable message log configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: Option<LoggingConfig>,

    /// Bounded queue depth between the listener and the dispatcher.
    #[serde(default = "default_queue_depth")]
    pub dispatch_queue_depth: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/channels")
}

fn default_queue_depth() -> usize {
    256
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            mailbox_account: MailboxAccountConfig::default(),
            storage: StorageConfig::default(),
            logging: None,
            dispatch_queue_depth: default_queue_depth(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a JSON file.
    pub fn from_json_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn to_json_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Mailbox account credentials (base URL(s) plus account token).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MailboxAccountConfig {
    /// Base URL of the mailbox server used to create the account.
    pub base_url: String,
    /// Account identifier returned by `create account`.
    pub account_id: String,
    /// Account token used to authenticate `listen`.
    pub account_token: String,
}

/// Durable message log storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Number of messages per page file.
    #[serde(default = "default_messages_per_file")]
    pub messages_per_file: usize,

    /// Minimum number of pages kept resident in the in-memory tail cache.
    #[serde(default = "default_min_resident_pages")]
    pub min_resident_pages: usize,

    /// Backend used for the pluggable stream store.
    #[serde(default)]
    pub backend: StorageBackend,
}

fn default_messages_per_file() -> usize {
    100
}

fn default_min_resident_pages() -> usize {
    1
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            messages_per_file: default_messages_per_file(),
            min_resident_pages: default_min_resident_pages(),
            backend: StorageBackend::default(),
        }
    }
}

/// Which `StreamStore` implementation backs the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Files on disk under `ClientConfig::data_dir`.
    #[default]
    Filesystem,
    /// Process-local in-memory store (tests, ephemeral clients).
    InMemory,
}

/// Logging configuration. The embedding application is expected to build
/// a `tracing_subscriber::EnvFilter` from `filter`/`json_format` and
/// install it once at process startup; a library crate installing a
/// global subscriber itself would conflict with the host application's own.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Explicit filter string (e.g. `"info"`, `"channels_core=debug"`).
    /// `RUST_LOG` always takes precedence when set.
    pub filter: Option<String>,

    /// Emit JSON-formatted logs instead of the human-readable default.
    #[serde(default)]
    pub json_format: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_storage_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.storage.messages_per_file, 100);
        assert_eq!(config.storage.backend, StorageBackend::Filesystem);
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let mut config = ClientConfig::default();
        config.mailbox_account.base_url = "https://mailbox.example.com".to_string();
        let json = serde_json::to_string(&config).unwrap();
        let restored: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.mailbox_account.base_url, config.mailbox_account.base_url);
    }
}
