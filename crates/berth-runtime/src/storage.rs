use crate::instance::{InstanceIdentity, InstanceStorage};
use crate::StorageError;
use berth_schema::BackupInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Storage backend family. Decides which volume operations are safe while
/// the container is running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Dir,
    Btrfs,
    Lvm,
    Zfs,
    Ceph,
}

impl StorageKind {
    /// Block-backed volumes must be offline to grow their filesystem.
    pub fn can_resize_online(self) -> bool {
        !matches!(self, StorageKind::Lvm)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Dir => "dir",
            StorageKind::Btrfs => "btrfs",
            StorageKind::Lvm => "lvm",
            StorageKind::Zfs => "zfs",
            StorageKind::Ceph => "ceph",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeType {
    Container,
    Image,
    Custom,
}

/// A storage pool driver.
///
/// Container volumes are addressed by instance name; snapshot volumes by
/// their full `parent/snapshot` name.
pub trait StorageDriver: Send + Sync {
    fn storage_type_name(&self) -> &str;

    fn kind(&self) -> StorageKind;

    fn pool_name(&self) -> &str;

    fn create_empty(&self, inst: &dyn InstanceStorage) -> Result<(), StorageError>;

    /// Materialize a volume from an image tarball.
    fn create_from_image(
        &self,
        inst: &dyn InstanceStorage,
        image_file: &Path,
    ) -> Result<(), StorageError>;

    /// Copy `source` into `target`. Unless `container_only`, every snapshot in
    /// `snapshots` (names relative to the parent) is copied as well.
    fn copy(
        &self,
        target: &dyn InstanceStorage,
        source: &dyn InstanceStorage,
        snapshots: &[String],
        container_only: bool,
    ) -> Result<(), StorageError>;

    fn snapshot_create_empty(&self, snapshot: &dyn InstanceStorage) -> Result<(), StorageError>;

    fn snapshot_create(
        &self,
        snapshot: &dyn InstanceStorage,
        source: &dyn InstanceStorage,
    ) -> Result<(), StorageError>;

    fn set_quota(
        &self,
        volume: VolumeType,
        size: u64,
        inst: &dyn InstanceStorage,
    ) -> Result<(), StorageError>;

    /// Export the source volume into `work_dir/container`, and each listed
    /// snapshot into `work_dir/snapshots/<name>`.
    fn backup_create(
        &self,
        work_dir: &Path,
        source: &dyn InstanceStorage,
        snapshots: &[String],
    ) -> Result<(), StorageError>;

    /// Restore an unpacked backup tree into this pool.
    fn backup_load(&self, info: &BackupInfo, unpacked: &Path) -> Result<(), StorageError>;

    /// Make the volume available. Returns `true` if this call mounted it.
    fn start(&self, inst: &dyn InstanceStorage) -> Result<bool, StorageError>;

    /// Returns `true` if this call unmounted the volume.
    fn stop(&self, inst: &dyn InstanceStorage) -> Result<bool, StorageError>;

    fn delete(&self, inst: &dyn InstanceStorage) -> Result<(), StorageError>;

    fn mount_path(&self, inst: &dyn InstanceIdentity) -> PathBuf;
}

/// Registered storage pools by name.
#[derive(Clone, Default)]
pub struct StoragePools {
    pools: BTreeMap<String, Arc<dyn StorageDriver>>,
}

impl StoragePools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<dyn StorageDriver>) {
        self.pools.insert(driver.pool_name().to_owned(), driver);
    }

    pub fn get(&self, pool: &str) -> Option<Arc<dyn StorageDriver>> {
        self.pools.get(pool).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

/// Build a driver for a pool definition.
pub fn open_pool(
    name: &str,
    driver: &str,
    config: &BTreeMap<String, String>,
) -> Result<Arc<dyn StorageDriver>, StorageError> {
    match driver {
        "dir" => {
            let source = config.get("source").ok_or_else(|| {
                StorageError::Failed(format!("pool '{name}' has no \"source\" configured"))
            })?;
            Ok(Arc::new(crate::dir::DirStorage::new(name, source)?))
        }
        other => Err(StorageError::UnknownDriver(other.to_owned())),
    }
}
