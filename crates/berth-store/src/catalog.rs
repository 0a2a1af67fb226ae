use crate::StoreError;
use berth_schema::{
    Architecture, BackupArgs, BackupRecord, ContainerArgs, ContainerRecord, Devices, NodeAddress,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the profile applied when a container names none.
pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub devices: Devices,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoragePoolRecord {
    pub id: i64,
    pub name: String,
    /// Storage driver name, e.g. `dir`.
    pub driver: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRecord {
    pub fingerprint: String,
    pub filename: String,
    pub size: u64,
    pub architecture: Architecture,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_use_date: Option<DateTime<Utc>>,
    /// Cluster nodes holding a copy of the image file.
    #[serde(default)]
    pub nodes: Vec<NodeAddress>,
}

/// Persistent record store for containers, snapshots, and their satellites.
///
/// Every insert is an atomic insert-if-absent: of two concurrent
/// `create_container` calls for the same name exactly one succeeds and the
/// other fails with an error whose `is_already_exists()` is true.
pub trait Catalog: Send + Sync {
    /// Address of the node this catalog answers for.
    fn node_address(&self) -> &NodeAddress;

    fn create_container(&self, args: &ContainerArgs) -> Result<i64, StoreError>;
    fn remove_container(&self, name: &str) -> Result<(), StoreError>;
    fn get_container(&self, name: &str) -> Result<ContainerRecord, StoreError>;
    fn container_name(&self, id: i64) -> Result<String, StoreError>;
    /// Full `parent/snapshot` names of the parent's snapshots, oldest first.
    fn container_snapshots(&self, parent: &str) -> Result<Vec<String>, StoreError>;
    fn set_container_config_key(&self, id: i64, key: &str, value: &str)
        -> Result<(), StoreError>;
    /// Regular containers only, sorted by name.
    fn list_containers(&self) -> Result<Vec<String>, StoreError>;

    fn profiles(&self) -> Result<Vec<String>, StoreError>;
    fn get_profile(&self, name: &str) -> Result<Profile, StoreError>;
    fn put_profile(&self, profile: &Profile) -> Result<(), StoreError>;

    fn storage_pool_id(&self, name: &str) -> Result<i64, StoreError>;
    fn storage_pools(&self) -> Result<Vec<StoragePoolRecord>, StoreError>;
    /// Create or update a pool definition; returns its id.
    fn put_storage_pool(
        &self,
        name: &str,
        driver: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<i64, StoreError>;

    fn get_image(&self, fingerprint: &str) -> Result<ImageRecord, StoreError>;
    fn put_image(&self, image: &ImageRecord) -> Result<(), StoreError>;
    /// `None` when the image file is on this node, otherwise the address of a
    /// node that has it.
    fn locate_image(&self, fingerprint: &str) -> Result<Option<NodeAddress>, StoreError>;
    /// Record that this node now holds a copy of the image.
    fn associate_image_node(&self, fingerprint: &str) -> Result<(), StoreError>;
    fn update_image_last_access(
        &self,
        fingerprint: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    fn create_backup(&self, args: &BackupArgs) -> Result<i64, StoreError>;
    fn get_backup(&self, name: &str) -> Result<BackupRecord, StoreError>;
    fn remove_backup(&self, name: &str) -> Result<(), StoreError>;
}
