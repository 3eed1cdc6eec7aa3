//! Configuration management for fedchain

use crate::crypto::{public_key_from_hex, KeyPair, PublicKeyBytes};
use crate::error::{ChainError, Result};
use crate::primitives::Hash;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const MAIN_NETWORK_ID: u32 = 0xFA92_E5A2;
pub const TEST_NETWORK_ID: u32 = 0xFA92_E5A3;
pub const LOCAL_NETWORK_ID: u32 = 0xFA92_E5A4;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub federated: Vec<ServerEntry>,
    #[serde(default)]
    pub audit: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Server identity, 64 hex characters.
    pub identity: String,
    /// secp256k1 secret key, 64 hex characters.
    pub secret_key: String,
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub custom_network_id: Option<u32>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Network {
    Main,
    Test,
    #[default]
    Local,
    Custom,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_directory_block_seconds")]
    pub directory_block_seconds: u64,
    /// How many times an undecidable message is retried before it is dropped.
    #[serde(default = "default_max_validation_retries")]
    pub max_validation_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Evidence count at which a federated server is reported as faulted.
    #[serde(default = "default_fault_threshold")]
    pub fault_threshold: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_repeat_cache_size")]
    pub repeat_cache_size: usize,
    /// How far past a lane's filled slots an ack may point.
    #[serde(default = "default_ack_window")]
    pub ack_window: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            directory_block_seconds: default_directory_block_seconds(),
            max_validation_retries: default_max_validation_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            fault_threshold: default_fault_threshold(),
            queue_capacity: default_queue_capacity(),
            repeat_cache_size: default_repeat_cache_size(),
            ack_window: default_ack_window(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub kind: DatabaseKind,
    #[serde(default = "default_data_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: DatabaseKind::default(),
            path: default_data_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    pub identity: String,
    pub public_key: String,
}

impl ServerEntry {
    pub fn parse(&self) -> Result<(Hash, PublicKeyBytes)> {
        let id = Hash::from_hex(&self.identity)
            .map_err(|e| ChainError::ConfigError(format!("bad server identity {}: {}", self.identity, e)))?;
        let key = public_key_from_hex(&self.public_key)
            .map_err(|e| ChainError::ConfigError(format!("bad public key for {}: {}", self.identity, e)))?;
        Ok((id, key))
    }
}

impl Config {
    pub fn network_id(&self) -> Result<u32> {
        match self.node.network {
            Network::Main => Ok(MAIN_NETWORK_ID),
            Network::Test => Ok(TEST_NETWORK_ID),
            Network::Local => Ok(LOCAL_NETWORK_ID),
            Network::Custom => self.node.custom_network_id.ok_or_else(|| {
                ChainError::ConfigError("node.custom_network_id must be set for CUSTOM".to_string())
            }),
        }
    }

    pub fn identity(&self) -> Result<Hash> {
        Hash::from_hex(&self.node.identity)
            .map_err(|e| ChainError::ConfigError(format!("node.identity: {}", e)))
    }

    pub fn key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_secret_hex(&self.node.secret_key)
            .map_err(|e| ChainError::ConfigError(format!("node.secret_key: {}", e)))
    }

    /// Checks the values the node cannot start without.
    pub fn validate(&self) -> Result<()> {
        self.identity()?;
        self.key_pair()?;
        self.network_id()?;
        if self.federated.is_empty() {
            return Err(ChainError::ConfigError(
                "at least one [[federated]] server must be configured".to_string(),
            ));
        }
        for entry in self.federated.iter().chain(self.audit.iter()) {
            entry.parse()?;
        }
        if self.consensus.directory_block_seconds < 10 {
            return Err(ChainError::ConfigError(
                "consensus.directory_block_seconds must be at least 10".to_string(),
            ));
        }
        if self.consensus.max_validation_retries == 0 {
            return Err(ChainError::ConfigError(
                "consensus.max_validation_retries must be positive".to_string(),
            ));
        }
        if self.consensus.queue_capacity == 0 {
            return Err(ChainError::ConfigError(
                "consensus.queue_capacity must be positive".to_string(),
            ));
        }
        if self.consensus.ack_window == 0 {
            return Err(ChainError::ConfigError(
                "consensus.ack_window must be positive".to_string(),
            ));
        }
        if self.database.kind == DatabaseKind::Sqlite && self.database.path.is_empty() {
            return Err(ChainError::ConfigError(
                "database.path must be set for sqlite".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn parse_config(config_str: &str) -> Result<Config> {
    let config: Config = toml::from_str(config_str)?;
    config.validate()?;
    Ok(config)
}

/// Loads and validates the TOML configuration at `path`.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path)
        .map_err(|e| ChainError::ConfigError(format!("cannot read {}: {}", path.display(), e)))?;
    parse_config(&config_str)
}

fn default_name() -> String {
    "fednode".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_directory_block_seconds() -> u64 {
    600
}

fn default_max_validation_retries() -> u32 {
    20
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_fault_threshold() -> usize {
    3
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_repeat_cache_size() -> usize {
    4096
}

fn default_ack_window() -> u32 {
    4096
}

fn default_data_path() -> String {
    "./data/fedchain.db".to_string()
}
