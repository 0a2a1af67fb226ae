use crate::CoreError;
use berth_remote::ClusterConfig;
use berth_runtime::HostCapabilities;
use berth_schema::is_true;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "berth.toml";

/// Overrides `host.unprivileged_only` when set.
pub const UNPRIVILEGED_ONLY_ENV: &str = "BERTH_UNPRIVILEGED_ONLY";

fn default_var_dir() -> PathBuf {
    PathBuf::from("/var/lib/berth")
}

fn default_node_address() -> String {
    "127.0.0.1:8443".to_owned()
}

fn default_runtime() -> String {
    "offline".to_owned()
}

fn default_driver() -> String {
    "dir".to_owned()
}

/// Engine settings, read from `berth.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_var_dir")]
    pub var_dir: PathBuf,
    #[serde(default = "default_node_address")]
    pub node_address: String,
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default)]
    pub host: HostCapabilities,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    pub name: String,
    #[serde(default = "default_driver")]
    pub driver: String,
    pub source: PathBuf,
}

impl PoolConfig {
    /// Driver settings as stored in the catalog.
    pub fn driver_config(&self) -> BTreeMap<String, String> {
        let mut config = BTreeMap::new();
        config.insert(
            "source".to_owned(),
            self.source.to_string_lossy().into_owned(),
        );
        config
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            var_dir: default_var_dir(),
            node_address: default_node_address(),
            runtime: default_runtime(),
            host: HostCapabilities::default(),
            pools: Vec::new(),
            cluster: ClusterConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load `path`, falling back to defaults when it does not exist, then
    /// apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)?;
            Self::from_toml(&content)?
        } else {
            debug!("{} not found, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(std::env::var(UNPRIVILEGED_ONLY_ENV).ok().as_deref());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, CoreError> {
        toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Apply the `BERTH_UNPRIVILEGED_ONLY` value, if any.
    pub fn apply_overrides(&mut self, unprivileged_only: Option<&str>) {
        if let Some(value) = unprivileged_only {
            self.host.unprivileged_only = is_true(value);
        }
    }
}
