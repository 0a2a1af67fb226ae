use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to register a backup of a container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupArgs {
    /// `container/backup`.
    pub name: String,
    pub container_id: i64,
    pub creation_date: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub container_only: bool,
    pub optimized_storage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupRecord {
    pub id: i64,
    pub name: String,
    pub container_id: i64,
    pub creation_date: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub container_only: bool,
    pub optimized_storage: bool,
}

/// Description of a backup archive being imported, read from its index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupInfo {
    /// Name of the container the archive restores.
    pub name: String,
    /// Storage driver that produced the archive.
    pub backend: String,
    /// Pool the container lived on when the backup was taken.
    pub pool: String,
    #[serde(default)]
    pub snapshots: Vec<String>,
    /// Driver-native (optimized) archives embed pool layout and cannot be
    /// retargeted to another pool.
    #[serde(default)]
    pub has_binary_format: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_info_defaults() {
        let info: BackupInfo =
            serde_json::from_str(r#"{"name":"web","backend":"dir","pool":"default"}"#).unwrap();
        assert!(info.snapshots.is_empty());
        assert!(!info.has_binary_format);
    }
}
