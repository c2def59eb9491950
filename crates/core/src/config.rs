//! Configuration management.
//!
//! Loaded from a TOML file, optionally overridden from the environment, and
//! validated once before any component is constructed. A configuration that
//! fails [`Config::validate`] must not be used.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Environment variable overriding [`CacheConfig::db_path`].
pub const ENV_DB_PATH: &str = "PROVENANCE_DB_PATH";
/// Environment variable overriding [`LedgerConfig::contract_address`].
pub const ENV_CONTRACT_ADDRESS: &str = "PROVENANCE_CONTRACT_ADDRESS";
/// Environment variable overriding [`IdentityConfig::key_path`].
pub const ENV_KEY_PATH: &str = "PROVENANCE_KEY_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Path of the persisted JWK. Required to build a node context.
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Address of the contract emitting document events.
    pub contract_address: String,
    /// Block height at which the contract was deployed; first sync starts here.
    #[serde(default)]
    pub deployment_height: u64,
    /// Upper bound on the span of a single event query.
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Fraction of cached records re-verified on each read.
    #[serde(default = "default_sample_fraction")]
    pub sample_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            sample_fraction: default_sample_fraction(),
        }
    }
}

fn default_max_block_range() -> u64 {
    1000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/documents.db")
}

fn default_sample_fraction() -> f64 {
    0.1
}

impl Config {
    #[cfg(feature = "config-file")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| {
            CoreError::Configuration(format!("{}: {}", path.as_ref().display(), e))
        })
    }

    pub fn default_config() -> Self {
        Self {
            identity: IdentityConfig::default(),
            ledger: LedgerConfig {
                contract_address: String::new(),
                deployment_height: 0,
                max_block_range: default_max_block_range(),
            },
            cache: CacheConfig::default(),
        }
    }

    /// Applies `PROVENANCE_*` overrides from the process environment.
    pub fn apply_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.cache.db_path = PathBuf::from(path);
        }
        if let Some(address) = lookup(ENV_CONTRACT_ADDRESS) {
            self.ledger.contract_address = address;
        }
        if let Some(path) = lookup(ENV_KEY_PATH) {
            self.identity.key_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<()> {
        let address = &self.ledger.contract_address;
        if address.is_empty() {
            return Err(CoreError::Configuration(
                "ledger.contract_address is not set".to_string(),
            ));
        }
        let hex_part = address.strip_prefix("0x").ok_or_else(|| {
            CoreError::Configuration(format!("contract address {} lacks 0x prefix", address))
        })?;
        if hex_part.len() != 40 || hex::decode(hex_part).is_err() {
            return Err(CoreError::Configuration(format!(
                "contract address {} is not a 20-byte hex address",
                address
            )));
        }

        if self.ledger.max_block_range == 0 {
            return Err(CoreError::Configuration(
                "ledger.max_block_range must be positive".to_string(),
            ));
        }

        let fraction = self.cache.sample_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(CoreError::Configuration(format!(
                "cache.sample_fraction must be in (0, 1], got {}",
                fraction
            )));
        }

        Ok(())
    }
}
