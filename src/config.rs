use std::{fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::{Result, gateway::DEFAULT_TIMEOUT_MS};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// address at which this node is reachable by its peers
    pub self_uri: String,
    /// store config
    #[serde(default)]
    pub store: StoreConfig,
    /// peer gateway config
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// workflow directory config
    #[serde(default)]
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// store type
    #[serde(default)]
    pub store_type: StoreType,
    /// postgres config
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    #[default]
    Mem,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    /// postgres database url
    pub database_url: String,
    /// pool size, defaults to 16
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    16
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway_type: GatewayType,
    /// timeout of every peer call in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayType {
    #[default]
    Http,
    Local,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_type: GatewayType::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub directory_type: DirectoryType,
    /// base url of the directory service, required for `http`
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryType {
    #[default]
    None,
    Mem,
    Http,
}

impl Config {
    /// Default configuration for a node reachable at `self_uri`.
    pub fn new(self_uri: impl Into<String>) -> Self {
        Self {
            self_uri: self_uri.into(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }

    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str)?;
        Ok(config)
    }
}
