use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_scheme() -> String {
    "https".to_owned()
}

/// Credentials and transport settings for talking to other cluster nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            auth_token: None,
            scheme: default_scheme(),
        }
    }
}

impl ClusterConfig {
    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_owned();
        self
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid cluster config: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");

        let config = ClusterConfig::default().with_token("secret123");
        config.save(&path).unwrap();

        let loaded = ClusterConfig::load(&path).unwrap();
        assert_eq!(loaded.auth_token.as_deref(), Some("secret123"));
        assert_eq!(loaded.scheme, "https");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            ClusterConfig::load(&path),
            Err(RemoteError::Config(_))
        ));
    }
}
