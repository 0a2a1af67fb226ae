use crate::archive::{copy_tree, unpack_file};
use crate::instance::{InstanceIdentity, InstanceStorage};
use crate::storage::{StorageDriver, StorageKind, VolumeType};
use crate::StorageError;
use berth_schema::{split_snapshot_name, BackupInfo};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Storage pool backed by plain directories under the pool source.
///
/// Containers live at `<source>/containers/<name>`, snapshots at
/// `<source>/snapshots/<parent>/<snapshot>`. Nothing is mounted; `start`
/// only tracks which volumes are in use.
/// Copy a volume tree, removing whatever was written if the copy fails
/// partway.
fn replicate(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if let Err(e) = copy_tree(src, dst) {
        if dst.exists() {
            let _ = fs::remove_dir_all(dst);
        }
        return Err(e.into());
    }
    Ok(())
}

pub struct DirStorage {
    pool: String,
    source: PathBuf,
    active: Mutex<HashSet<String>>,
}

impl DirStorage {
    pub fn new(pool: impl Into<String>, source: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let source = source.into();
        fs::create_dir_all(source.join("containers"))?;
        fs::create_dir_all(source.join("snapshots"))?;
        Ok(Self {
            pool: pool.into(),
            source,
            active: Mutex::new(HashSet::new()),
        })
    }

    fn volume_path(&self, name: &str) -> PathBuf {
        let (parent, snap, is_snap) = split_snapshot_name(name);
        if is_snap {
            self.source.join("snapshots").join(parent).join(snap)
        } else {
            self.source.join("containers").join(name)
        }
    }

    fn create_volume_dir(&self, name: &str) -> Result<PathBuf, StorageError> {
        let path = self.volume_path(name);
        if path.exists() {
            return Err(StorageError::VolumeExists(name.to_owned()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir(&path)?;
        Ok(path)
    }

    fn existing_volume(&self, name: &str) -> Result<PathBuf, StorageError> {
        let path = self.volume_path(name);
        if !path.is_dir() {
            return Err(StorageError::VolumeNotFound(name.to_owned()));
        }
        Ok(path)
    }

    fn copy_volume(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let src = self.existing_volume(from)?;
        let dst = self.volume_path(to);
        if dst.exists() {
            return Err(StorageError::VolumeExists(to.to_owned()));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        replicate(&src, &dst)
    }

    fn active(&self) -> Result<std::sync::MutexGuard<'_, HashSet<String>>, StorageError> {
        self.active
            .lock()
            .map_err(|e| StorageError::Failed(format!("mutex poisoned: {e}")))
    }
}

impl StorageDriver for DirStorage {
    fn storage_type_name(&self) -> &str {
        "dir"
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Dir
    }

    fn pool_name(&self) -> &str {
        &self.pool
    }

    fn create_empty(&self, inst: &dyn InstanceStorage) -> Result<(), StorageError> {
        let path = self.create_volume_dir(inst.name())?;
        fs::create_dir(path.join("rootfs"))?;
        debug!("dir pool {}: created empty volume {}", self.pool, inst.name());
        Ok(())
    }

    fn create_from_image(
        &self,
        inst: &dyn InstanceStorage,
        image_file: &Path,
    ) -> Result<(), StorageError> {
        let path = self.create_volume_dir(inst.name())?;
        if let Err(e) = unpack_file(image_file, &path) {
            let _ = fs::remove_dir_all(&path);
            return Err(StorageError::Archive(format!(
                "unpacking {}: {e}",
                image_file.display()
            )));
        }
        debug!(
            "dir pool {}: unpacked {} into {}",
            self.pool,
            image_file.display(),
            inst.name()
        );
        Ok(())
    }

    fn copy(
        &self,
        target: &dyn InstanceStorage,
        source: &dyn InstanceStorage,
        snapshots: &[String],
        container_only: bool,
    ) -> Result<(), StorageError> {
        self.copy_volume(source.name(), target.name())?;
        if container_only {
            return Ok(());
        }
        for snap in snapshots {
            let from = format!("{}/{snap}", source.name());
            let to = format!("{}/{snap}", target.name());
            if let Err(e) = self.copy_volume(&from, &to) {
                let _ = fs::remove_dir_all(self.source.join("snapshots").join(target.name()));
                let _ = fs::remove_dir_all(self.volume_path(target.name()));
                return Err(e);
            }
        }
        Ok(())
    }

    fn snapshot_create_empty(&self, snapshot: &dyn InstanceStorage) -> Result<(), StorageError> {
        self.create_volume_dir(snapshot.name())?;
        Ok(())
    }

    fn snapshot_create(
        &self,
        snapshot: &dyn InstanceStorage,
        source: &dyn InstanceStorage,
    ) -> Result<(), StorageError> {
        self.copy_volume(source.name(), snapshot.name())
    }

    fn set_quota(
        &self,
        _volume: VolumeType,
        _size: u64,
        _inst: &dyn InstanceStorage,
    ) -> Result<(), StorageError> {
        Err(StorageError::QuotaUnsupported("dir".to_owned()))
    }

    fn backup_create(
        &self,
        work_dir: &Path,
        source: &dyn InstanceStorage,
        snapshots: &[String],
    ) -> Result<(), StorageError> {
        copy_tree(
            &self.existing_volume(source.name())?,
            &work_dir.join("container"),
        )?;
        for snap in snapshots {
            let from = self.existing_volume(&format!("{}/{snap}", source.name()))?;
            copy_tree(&from, &work_dir.join("snapshots").join(snap))?;
        }
        Ok(())
    }

    fn backup_load(&self, info: &BackupInfo, unpacked: &Path) -> Result<(), StorageError> {
        let container = unpacked.join("container");
        if !container.is_dir() {
            return Err(StorageError::Archive(
                "backup has no container volume".to_owned(),
            ));
        }
        let dst = self.volume_path(&info.name);
        if dst.exists() {
            return Err(StorageError::VolumeExists(info.name.clone()));
        }
        replicate(&container, &dst)?;

        for snap in &info.snapshots {
            let src = unpacked.join("snapshots").join(snap);
            let snap_dst = self.volume_path(&format!("{}/{snap}", info.name));
            if let Err(e) = replicate(&src, &snap_dst) {
                let _ = fs::remove_dir_all(self.source.join("snapshots").join(&info.name));
                let _ = fs::remove_dir_all(&dst);
                return Err(e);
            }
        }
        debug!("dir pool {}: restored backup of {}", self.pool, info.name);
        Ok(())
    }

    fn start(&self, inst: &dyn InstanceStorage) -> Result<bool, StorageError> {
        self.existing_volume(inst.name())?;
        Ok(self.active()?.insert(inst.name().to_owned()))
    }

    fn stop(&self, inst: &dyn InstanceStorage) -> Result<bool, StorageError> {
        Ok(self.active()?.remove(inst.name()))
    }

    fn delete(&self, inst: &dyn InstanceStorage) -> Result<(), StorageError> {
        let path = self.volume_path(inst.name());
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        if !inst.is_snapshot() {
            let snaps = self.source.join("snapshots").join(inst.name());
            if snaps.exists() {
                fs::remove_dir_all(&snaps)?;
            }
        }
        self.active()?.remove(inst.name());
        debug!("dir pool {}: deleted volume {}", self.pool, inst.name());
        Ok(())
    }

    fn mount_path(&self, inst: &dyn InstanceIdentity) -> PathBuf {
        self.volume_path(inst.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::pack_dir;
    use crate::instance::VolumeRef;

    fn pool() -> (tempfile::TempDir, DirStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirStorage::new("default", dir.path().join("pool")).unwrap();
        (dir, storage)
    }

    fn vol(name: &str) -> VolumeRef {
        VolumeRef::new(name, "default")
    }

    #[test]
    fn create_empty_and_delete() {
        let (_dir, storage) = pool();
        storage.create_empty(&vol("web")).unwrap();
        let path = storage.mount_path(&vol("web"));
        assert!(path.join("rootfs").is_dir());

        assert!(matches!(
            storage.create_empty(&vol("web")),
            Err(StorageError::VolumeExists(_))
        ));

        storage.delete(&vol("web")).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn snapshot_paths_are_nested_under_parent() {
        let (dir, storage) = pool();
        storage.create_empty(&vol("web")).unwrap();
        storage
            .snapshot_create(&vol("web/snap0"), &vol("web"))
            .unwrap();
        assert_eq!(
            storage.mount_path(&vol("web/snap0")),
            dir.path().join("pool/snapshots/web/snap0")
        );
        assert!(dir.path().join("pool/snapshots/web/snap0/rootfs").is_dir());

        storage.delete(&vol("web")).unwrap();
        assert!(!dir.path().join("pool/snapshots/web").exists());
    }

    #[test]
    fn copy_includes_snapshots_unless_container_only() {
        let (_dir, storage) = pool();
        storage.create_empty(&vol("web")).unwrap();
        storage
            .snapshot_create(&vol("web/s0"), &vol("web"))
            .unwrap();
        let snaps = vec!["s0".to_owned()];

        storage.copy(&vol("a"), &vol("web"), &snaps, false).unwrap();
        assert!(storage.mount_path(&vol("a/s0")).is_dir());

        storage.copy(&vol("b"), &vol("web"), &snaps, true).unwrap();
        assert!(!storage.mount_path(&vol("b/s0")).exists());
    }

    #[test]
    fn copy_of_missing_source_fails() {
        let (_dir, storage) = pool();
        assert!(matches!(
            storage.copy(&vol("a"), &vol("ghost"), &[], false),
            Err(StorageError::VolumeNotFound(_))
        ));
    }

    #[test]
    fn create_from_image_unpacks_tarball() {
        let (dir, storage) = pool();
        let tree = dir.path().join("image");
        fs::create_dir_all(tree.join("rootfs/etc")).unwrap();
        fs::write(tree.join("rootfs/etc/os-release"), "ID=test\n").unwrap();
        let tarball = dir.path().join("image.tar");
        pack_dir(&tree, &tarball).unwrap();

        storage.create_from_image(&vol("web"), &tarball).unwrap();
        let path = storage.mount_path(&vol("web"));
        assert_eq!(
            fs::read_to_string(path.join("rootfs/etc/os-release")).unwrap(),
            "ID=test\n"
        );
    }

    #[test]
    fn failed_copy_leaves_no_partial_volume() {
        let (dir, storage) = pool();
        let dst = dir.path().join("pool/containers/web2");
        assert!(replicate(&dir.path().join("vanished"), &dst).is_err());
        assert!(!dst.exists());

        storage.create_empty(&vol("web")).unwrap();
        storage.copy(&vol("web2"), &vol("web"), &[], true).unwrap();
        assert!(storage.mount_path(&vol("web2")).join("rootfs").is_dir());
    }

    #[test]
    fn failed_backup_load_can_be_retried() {
        let (dir, storage) = pool();
        let work = dir.path().join("work");
        fs::create_dir_all(work.join("container/rootfs")).unwrap();
        let info = BackupInfo {
            name: "web".to_owned(),
            backend: "dir".to_owned(),
            pool: "default".to_owned(),
            snapshots: vec!["s0".to_owned()],
            has_binary_format: false,
        };
        assert!(storage.backup_load(&info, &work).is_err());
        assert!(!storage.mount_path(&vol("web")).exists());

        fs::create_dir_all(work.join("snapshots/s0")).unwrap();
        storage.backup_load(&info, &work).unwrap();
        assert!(storage.mount_path(&vol("web/s0")).is_dir());
    }

    #[test]
    fn quota_is_unsupported() {
        let (_dir, storage) = pool();
        storage.create_empty(&vol("web")).unwrap();
        assert!(matches!(
            storage.set_quota(VolumeType::Container, 1 << 30, &vol("web")),
            Err(StorageError::QuotaUnsupported(_))
        ));
    }

    #[test]
    fn start_reports_first_activation_only() {
        let (_dir, storage) = pool();
        storage.create_empty(&vol("web")).unwrap();
        assert!(storage.start(&vol("web")).unwrap());
        assert!(!storage.start(&vol("web")).unwrap());
        assert!(storage.stop(&vol("web")).unwrap());
        assert!(!storage.stop(&vol("web")).unwrap());
    }

    #[test]
    fn backup_roundtrip_into_another_pool() {
        let (dir, storage) = pool();
        storage.create_empty(&vol("web")).unwrap();
        fs::write(storage.mount_path(&vol("web")).join("rootfs/data"), "x").unwrap();
        storage
            .snapshot_create(&vol("web/s0"), &vol("web"))
            .unwrap();

        let work = dir.path().join("work");
        storage
            .backup_create(&work, &vol("web"), &["s0".to_owned()])
            .unwrap();
        assert!(work.join("container/rootfs/data").is_file());
        assert!(work.join("snapshots/s0/rootfs").is_dir());

        let other = DirStorage::new("other", dir.path().join("other")).unwrap();
        let info = BackupInfo {
            name: "web".to_owned(),
            backend: "dir".to_owned(),
            pool: "default".to_owned(),
            snapshots: vec!["s0".to_owned()],
            has_binary_format: false,
        };
        other.backup_load(&info, &work).unwrap();
        assert!(other.mount_path(&vol("web")).join("rootfs/data").is_file());
        assert!(other.mount_path(&vol("web/s0")).is_dir());
    }
}
