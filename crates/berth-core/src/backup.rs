//! Backup archives and the metadata files that travel with them.
//!
//! A container volume carries `backup.json` (its record, its snapshots'
//! records, and its pool) so an archive can be imported on a node that has
//! never seen the container. The archive itself is a tar of the driver's
//! export tree plus `index.json`, the `BackupInfo` read back on import.

use crate::engine::Engine;
use crate::lifecycle::CreationPhase;
use crate::rollback::Rollback;
use crate::CoreError;
use berth_runtime::archive::{pack_dir, read_entry, unpack_file};
use berth_runtime::{Instance, InstanceIdentity, InstanceStorage};
use berth_schema::{
    is_root_disk, split_snapshot_name, BackupArgs, BackupInfo, BackupRecord, ContainerRecord,
};
use berth_store::{RollbackStep, WalOpKind, DEFAULT_PROFILE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const BACKUP_FILE: &str = "backup.json";
pub const INDEX_FILE: &str = "index.json";

/// Contents of `backup.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupFile {
    pub container: ContainerRecord,
    #[serde(default)]
    pub snapshots: Vec<ContainerRecord>,
    pub pool: String,
}

impl BackupFile {
    /// Move the container and every snapshot onto `pool`. Records whose
    /// root disk comes from a profile keep no local pool to rewrite.
    fn retarget(&mut self, pool: &str) {
        self.pool = pool.to_owned();
        for record in std::iter::once(&mut self.container).chain(self.snapshots.iter_mut()) {
            if let Some(root) = record.devices.values_mut().find(|d| is_root_disk(d)) {
                root.insert("pool".to_owned(), pool.to_owned());
            }
        }
    }
}

/// A backup record with the container it belongs to.
#[derive(Debug, Clone)]
pub struct Backup {
    pub record: BackupRecord,
    pub container: Instance,
}

impl Backup {
    /// Backup name without the container prefix.
    pub fn short_name(&self) -> &str {
        split_snapshot_name(&self.record.name).1
    }
}

fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| CoreError::NotFound(format!("{} has no parent", path.display())))?;
    let content = serde_json::to_string_pretty(value)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

pub fn read_backup_file(path: &Path) -> Result<BackupFile, CoreError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Read the `index.json` manifest out of a backup archive.
pub fn read_index(archive: &Path) -> Result<BackupInfo, CoreError> {
    let bytes = read_entry(archive, INDEX_FILE)?.ok_or_else(|| {
        CoreError::NotFound(format!(
            "{} has no {INDEX_FILE}; not a berth backup",
            archive.display()
        ))
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

impl Engine {
    fn backup_file_for(&self, inst: &Instance) -> Result<BackupFile, CoreError> {
        let snapshots = self
            .snapshots_of(inst)?
            .into_iter()
            .map(|s| s.record().clone())
            .collect();
        Ok(BackupFile {
            container: inst.record().clone(),
            snapshots,
            pool: inst.pool().to_owned(),
        })
    }

    /// Write `backup.json` into the container's volume. Snapshots have none
    /// of their own.
    pub(crate) fn write_backup_file(&self, inst: &Instance) -> Result<(), CoreError> {
        if inst.is_snapshot() {
            return Ok(());
        }
        let file = self.backup_file_for(inst)?;
        let path = self.driver(inst.pool())?.mount_path(inst).join(BACKUP_FILE);
        write_json(&path, &file)?;
        debug!("wrote {}", path.display());
        Ok(())
    }

    /// Export `source` into `backups/<container>/<backup>.tar`.
    pub fn backup_create(&self, args: BackupArgs, source: &Instance) -> Result<Backup, CoreError> {
        info!("creating backup '{}'", args.name);
        let mut rb = Rollback::begin(self, WalOpKind::BackupCreate, &args.name)?;
        match self.catalog.create_backup(&args) {
            Ok(id) => debug!("reserved backup '{}' as #{id}", args.name),
            Err(e) if e.is_already_exists() => {
                return Err(CoreError::AlreadyExists(format!(
                    "backup '{}' already exists",
                    args.name
                )));
            }
            Err(e) => return Err(e.into()),
        }
        rb.push(RollbackStep::RemoveBackup {
            name: args.name.clone(),
        })?;
        rb.advance(CreationPhase::Reserved)?;

        let backup = self.backup_load_by_name(&args.name)?;
        let snapshots: Vec<String> = if args.container_only {
            Vec::new()
        } else {
            self.catalog
                .container_snapshots(source.name())?
                .iter()
                .map(|name| split_snapshot_name(name).1.to_owned())
                .collect()
        };

        let driver = self.driver(source.pool())?;
        let work_dir = tempfile::tempdir_in(self.backups_dir())?;
        driver.backup_create(work_dir.path(), source, &snapshots)?;
        rb.advance(CreationPhase::Materialized)?;

        let container_dir = work_dir.path().join("container");
        fs::create_dir_all(&container_dir)?;
        write_json(&container_dir.join(BACKUP_FILE), &self.backup_file_for(source)?)?;
        let index = BackupInfo {
            name: source.name().to_owned(),
            backend: driver.storage_type_name().to_owned(),
            pool: source.pool().to_owned(),
            snapshots,
            has_binary_format: args.optimized_storage,
        };
        write_json(&work_dir.path().join(INDEX_FILE), &index)?;

        let archive = self.archive_path(&args.name);
        if let Some(parent) = archive.parent() {
            fs::create_dir_all(parent)?;
        }
        rb.push(RollbackStep::RemoveFile(archive.clone()))?;
        pack_dir(work_dir.path(), &archive)?;
        rb.advance(CreationPhase::Configured)?;
        rb.commit()?;

        info!(
            "backup '{}' written to {}",
            args.name,
            archive.display()
        );
        Ok(backup)
    }

    /// Archive location of a `container/backup` name.
    pub fn archive_path(&self, backup_name: &str) -> PathBuf {
        let (container, backup, _) = split_snapshot_name(backup_name);
        self.backups_dir()
            .join(container)
            .join(format!("{backup}.tar"))
    }

    /// Restore a backup archive onto this node and register its container
    /// and snapshots.
    ///
    /// When the archive's pool is unknown here, a non-binary backup moves to
    /// the default profile's root pool and its `backup.json` is rewritten to
    /// match.
    pub fn create_from_backup(
        &self,
        info: &BackupInfo,
        archive: &Path,
    ) -> Result<Instance, CoreError> {
        info!("importing '{}' from {}", info.name, archive.display());
        let (pool, substituted) = match self.catalog.storage_pool_id(&info.pool) {
            Ok(_) => (info.pool.clone(), false),
            Err(e) if e.is_not_found() => {
                if info.has_binary_format {
                    return Err(CoreError::UnresolvablePool(info.pool.clone()));
                }
                let profile = self.catalog.get_profile(DEFAULT_PROFILE)?;
                let pool = Self::root_pool(&profile.devices)?;
                info!(
                    "pool '{}' does not exist; importing '{}' into '{pool}'",
                    info.pool, info.name
                );
                (pool, true)
            }
            Err(e) => return Err(e.into()),
        };
        let driver = self.driver(&pool)?;

        let unpacked = tempfile::tempdir_in(self.backups_dir())?;
        unpack_file(archive, unpacked.path())?;
        let mut file = read_backup_file(&unpacked.path().join("container").join(BACKUP_FILE))?;
        if substituted {
            file.retarget(&pool);
        }

        let mut rb = Rollback::begin(self, WalOpKind::CreateFromBackup, &info.name)?;
        let mut container_args = file.container.to_args();
        container_args.name.clone_from(&info.name);
        let inst = self.create_internal(&mut rb, container_args)?;
        rb.advance(CreationPhase::Reserved)?;
        for snap in &file.snapshots {
            let (_, suffix, _) = split_snapshot_name(&snap.name);
            if !info.snapshots.iter().any(|s| s == suffix) {
                continue;
            }
            let mut snap_args = snap.to_args();
            snap_args.name = format!("{}/{suffix}", info.name);
            self.create_internal(&mut rb, snap_args)?;
            rb.advance(CreationPhase::Reserved)?;
        }

        let load_info = BackupInfo {
            pool: pool.clone(),
            ..info.clone()
        };
        driver.backup_load(&load_info, unpacked.path())?;
        rb.push(RollbackStep::DeleteVolume {
            pool: pool.clone(),
            name: info.name.clone(),
        })?;
        for snap in &info.snapshots {
            rb.push(RollbackStep::DeleteVolume {
                pool: pool.clone(),
                name: format!("{}/{snap}", info.name),
            })?;
        }
        rb.advance(CreationPhase::Materialized)?;

        if substituted {
            let path = driver.mount_path(&inst).join(BACKUP_FILE);
            write_json(&path, &file)?;
            debug!("rewrote {} for pool '{pool}'", path.display());
            rb.advance(CreationPhase::Configured)?;
        }
        rb.commit()?;
        info!("imported '{}' into pool '{pool}'", info.name);
        Ok(inst)
    }
}
