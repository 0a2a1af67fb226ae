use crate::catalog::{Catalog, ImageRecord, Profile, StoragePoolRecord, DEFAULT_PROFILE};
use crate::layout::StoreLayout;
use crate::lock::FileLock;
use crate::{fsync_dir, StoreError};
use berth_schema::{
    Architecture, BackupArgs, BackupRecord, ContainerArgs, ContainerKind, ContainerRecord,
    NodeAddress, SNAPSHOT_DELIMITER,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const RECORD_EXT: &str = "json";

/// On-disk wrapper carrying a blake3 checksum of the serialized record.
#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    checksum: String,
    record: T,
}

fn compute_checksum<T: Serialize>(record: &T) -> Result<String, StoreError> {
    let json = serde_json::to_string(record)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}

/// Map a record name to a file name. Snapshot and backup names contain `/`.
fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            _ => out.push(c),
        }
    }
    out
}

fn decode_name(file_stem: &str) -> String {
    file_stem.replace("%2F", "/").replace("%25", "%")
}

fn write_record<T: Serialize>(dir: &Path, name: &str, record: &T) -> Result<(), StoreError> {
    let envelope = Envelope {
        checksum: compute_checksum(record)?,
        record,
    };
    let content = serde_json::to_string_pretty(&envelope)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(record_path(dir, name))
        .map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

fn read_record<T: Serialize + DeserializeOwned>(
    dir: &Path,
    kind: &'static str,
    name: &str,
) -> Result<T, StoreError> {
    let path = record_path(dir, name);
    if !path.exists() {
        return Err(StoreError::not_found(kind, name));
    }
    read_path(&path, name)
}

fn read_path<T: Serialize + DeserializeOwned>(path: &Path, name: &str) -> Result<T, StoreError> {
    let content = fs::read_to_string(path)?;
    let envelope: Envelope<T> = serde_json::from_str(&content)?;
    let actual = compute_checksum(&envelope.record)?;
    if actual != envelope.checksum {
        return Err(StoreError::IntegrityFailure {
            name: name.to_owned(),
            expected: envelope.checksum,
            actual,
        });
    }
    Ok(envelope.record)
}

/// All readable records of a directory. Corrupt entries are logged and skipped.
fn read_all<T: Serialize + DeserializeOwned>(dir: &Path) -> Result<Vec<(String, T)>, StoreError> {
    let mut results = Vec::new();
    if !dir.exists() {
        return Ok(results);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let name = decode_name(stem);
        match read_path::<T>(&path, &name) {
            Ok(record) => results.push((name, record)),
            Err(e) => warn!("skipping corrupt catalog record {}: {e}", path.display()),
        }
    }
    Ok(results)
}

fn remove_record(dir: &Path, kind: &'static str, name: &str) -> Result<(), StoreError> {
    let path = record_path(dir, name);
    if !path.exists() {
        return Err(StoreError::not_found(kind, name));
    }
    fs::remove_file(&path)?;
    fsync_dir(dir)?;
    Ok(())
}

fn record_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{RECORD_EXT}", encode_name(name)))
}

fn kind_label(kind: ContainerKind) -> &'static str {
    match kind {
        ContainerKind::Container => "container",
        ContainerKind::Snapshot => "snapshot",
    }
}

/// JSON-file catalog rooted at a [`StoreLayout`].
///
/// Reads are lock-free: every write lands through an atomic rename. Writes
/// take the exclusive [`FileLock`] for the whole check-and-write sequence.
pub struct DiskCatalog {
    layout: StoreLayout,
    node: NodeAddress,
}

impl DiskCatalog {
    pub fn open(layout: StoreLayout, node: NodeAddress) -> Result<Self, StoreError> {
        layout.initialize()?;
        Ok(Self { layout, node })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn lock(&self) -> Result<FileLock, StoreError> {
        FileLock::acquire(&self.layout.lock_file())
    }

    /// Allocate the next record id. Caller must hold the store lock.
    fn next_id(&self) -> Result<i64, StoreError> {
        let path = self.layout.sequence_file();
        let current: i64 = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            raw.trim()
                .parse()
                .map_err(|_| StoreError::InvalidRecord(format!("corrupt sequence file: {raw}")))?
        } else {
            0
        };
        let next = current + 1;

        let dir = self.layout.catalog_dir();
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(next.to_string().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(next)
    }

    fn all_containers(&self) -> Result<Vec<ContainerRecord>, StoreError> {
        Ok(read_all::<ContainerRecord>(&self.layout.containers_dir())?
            .into_iter()
            .map(|(_, rec)| rec)
            .collect())
    }

    fn container_by_id(&self, id: i64) -> Result<ContainerRecord, StoreError> {
        self.all_containers()?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::not_found("container", format!("#{id}")))
    }
}

impl Catalog for DiskCatalog {
    fn node_address(&self) -> &NodeAddress {
        &self.node
    }

    fn create_container(&self, args: &ContainerArgs) -> Result<i64, StoreError> {
        let dir = self.layout.containers_dir();
        let _lock = self.lock()?;

        if record_path(&dir, &args.name).exists() {
            return Err(StoreError::already_exists(kind_label(args.kind), &args.name));
        }

        let architecture = args
            .architecture
            .or_else(Architecture::host)
            .ok_or_else(|| {
                StoreError::InvalidRecord(format!("no architecture for '{}'", args.name))
            })?;
        let id = self.next_id()?;
        let creation_date = args.creation_date.unwrap_or_else(Utc::now);
        let record = ContainerRecord {
            id,
            name: args.name.clone(),
            kind: args.kind,
            architecture,
            description: args.description.clone(),
            config: args.config.clone(),
            devices: args.devices.clone(),
            profiles: args
                .profiles
                .clone()
                .unwrap_or_else(|| vec![DEFAULT_PROFILE.to_owned()]),
            ephemeral: args.ephemeral,
            stateful: args.stateful,
            creation_date,
            last_used_date: args.last_used_date.unwrap_or(creation_date),
        };
        write_record(&dir, &args.name, &record)?;
        debug!("catalog: inserted {} '{}' as #{id}", args.kind, args.name);
        Ok(id)
    }

    fn remove_container(&self, name: &str) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        remove_record(&self.layout.containers_dir(), "container", name)?;
        debug!("catalog: removed '{name}'");
        Ok(())
    }

    fn get_container(&self, name: &str) -> Result<ContainerRecord, StoreError> {
        read_record(&self.layout.containers_dir(), "container", name)
    }

    fn container_name(&self, id: i64) -> Result<String, StoreError> {
        Ok(self.container_by_id(id)?.name)
    }

    fn container_snapshots(&self, parent: &str) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{parent}{SNAPSHOT_DELIMITER}");
        let mut snaps: Vec<ContainerRecord> = self
            .all_containers()?
            .into_iter()
            .filter(|c| c.is_snapshot() && c.name.starts_with(&prefix))
            .collect();
        snaps.sort_by_key(|c| c.id);
        Ok(snaps.into_iter().map(|c| c.name).collect())
    }

    fn set_container_config_key(
        &self,
        id: i64,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let mut record = self.container_by_id(id)?;
        record.config.insert(key.to_owned(), value.to_owned());
        write_record(&self.layout.containers_dir(), &record.name, &record)
    }

    fn list_containers(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self
            .all_containers()?
            .into_iter()
            .filter(|c| !c.is_snapshot())
            .map(|c| c.name)
            .collect();
        names.sort();
        Ok(names)
    }

    fn profiles(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = read_all::<Profile>(&self.layout.profiles_dir())?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        Ok(names)
    }

    fn get_profile(&self, name: &str) -> Result<Profile, StoreError> {
        read_record(&self.layout.profiles_dir(), "profile", name)
    }

    fn put_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        write_record(&self.layout.profiles_dir(), &profile.name, profile)
    }

    fn storage_pool_id(&self, name: &str) -> Result<i64, StoreError> {
        let pool: StoragePoolRecord = read_record(&self.layout.pools_dir(), "storage pool", name)?;
        Ok(pool.id)
    }

    fn storage_pools(&self) -> Result<Vec<StoragePoolRecord>, StoreError> {
        let mut pools: Vec<StoragePoolRecord> = read_all(&self.layout.pools_dir())?
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        pools.sort_by_key(|p| p.id);
        Ok(pools)
    }

    fn put_storage_pool(
        &self,
        name: &str,
        driver: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<i64, StoreError> {
        let dir = self.layout.pools_dir();
        let _lock = self.lock()?;
        let id = match read_record::<StoragePoolRecord>(&dir, "storage pool", name) {
            Ok(existing) => existing.id,
            Err(e) if e.is_not_found() => self.next_id()?,
            Err(e) => return Err(e),
        };
        let record = StoragePoolRecord {
            id,
            name: name.to_owned(),
            driver: driver.to_owned(),
            config: config.clone(),
        };
        write_record(&dir, name, &record)?;
        Ok(id)
    }

    fn get_image(&self, fingerprint: &str) -> Result<ImageRecord, StoreError> {
        read_record(&self.layout.images_dir(), "image", fingerprint)
    }

    fn put_image(&self, image: &ImageRecord) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        write_record(&self.layout.images_dir(), &image.fingerprint, image)
    }

    fn locate_image(&self, fingerprint: &str) -> Result<Option<NodeAddress>, StoreError> {
        let image = self.get_image(fingerprint)?;
        if image.nodes.contains(&self.node) {
            return Ok(None);
        }
        image
            .nodes
            .first()
            .cloned()
            .map(Some)
            .ok_or_else(|| StoreError::not_found("node holding image", fingerprint))
    }

    fn associate_image_node(&self, fingerprint: &str) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let mut image = self.get_image(fingerprint)?;
        if !image.nodes.contains(&self.node) {
            image.nodes.push(self.node.clone());
            write_record(&self.layout.images_dir(), fingerprint, &image)?;
        }
        Ok(())
    }

    fn update_image_last_access(
        &self,
        fingerprint: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let mut image = self.get_image(fingerprint)?;
        image.last_use_date = Some(at);
        write_record(&self.layout.images_dir(), fingerprint, &image)
    }

    fn create_backup(&self, args: &BackupArgs) -> Result<i64, StoreError> {
        let dir = self.layout.backups_dir();
        let _lock = self.lock()?;

        if record_path(&dir, &args.name).exists() {
            return Err(StoreError::already_exists("backup", &args.name));
        }
        self.container_by_id(args.container_id)?;

        let id = self.next_id()?;
        let record = BackupRecord {
            id,
            name: args.name.clone(),
            container_id: args.container_id,
            creation_date: args.creation_date,
            expiry_date: args.expiry_date,
            container_only: args.container_only,
            optimized_storage: args.optimized_storage,
        };
        write_record(&dir, &args.name, &record)?;
        debug!("catalog: inserted backup '{}' as #{id}", args.name);
        Ok(id)
    }

    fn get_backup(&self, name: &str) -> Result<BackupRecord, StoreError> {
        read_record(&self.layout.backups_dir(), "backup", name)
    }

    fn remove_backup(&self, name: &str) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        remove_record(&self.layout.backups_dir(), "backup", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_catalog() -> (tempfile::TempDir, DiskCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = DiskCatalog::open(
            StoreLayout::new(dir.path()),
            NodeAddress::new("10.0.0.1:8443"),
        )
        .unwrap();
        (dir, catalog)
    }

    fn container_args(name: &str) -> ContainerArgs {
        let mut args = ContainerArgs::container(name);
        args.architecture = Some(Architecture::X86_64);
        args
    }

    fn snapshot_args(name: &str) -> ContainerArgs {
        let mut args = ContainerArgs::snapshot(name);
        args.architecture = Some(Architecture::X86_64);
        args
    }

    fn image(fingerprint: &str, nodes: &[&str]) -> ImageRecord {
        ImageRecord {
            fingerprint: fingerprint.to_owned(),
            filename: format!("{fingerprint}.tar"),
            size: 1024,
            architecture: Architecture::X86_64,
            properties: BTreeMap::new(),
            created_at: Utc::now(),
            last_use_date: None,
            nodes: nodes.iter().map(|n| NodeAddress::new(*n)).collect(),
        }
    }

    #[test]
    fn name_encoding_roundtrip() {
        for name in ["web", "web/snap0", "a%2Fb", "x/y/z"] {
            let encoded = encode_name(name);
            assert!(!encoded.contains('/'));
            assert_eq!(decode_name(&encoded), name);
        }
    }

    #[test]
    fn create_and_get_container() {
        let (_dir, catalog) = test_catalog();
        let id = catalog.create_container(&container_args("web")).unwrap();
        let rec = catalog.get_container("web").unwrap();
        assert_eq!(rec.id, id);
        assert_eq!(rec.profiles, vec!["default".to_owned()]);
        assert_eq!(rec.last_used_date, rec.creation_date);
        assert_eq!(catalog.container_name(id).unwrap(), "web");
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let (_dir, catalog) = test_catalog();
        let a = catalog.create_container(&container_args("a")).unwrap();
        let b = catalog.create_container(&container_args("b")).unwrap();
        assert!(b > a);
    }

    #[test]
    fn duplicate_container_is_rejected() {
        let (_dir, catalog) = test_catalog();
        catalog.create_container(&container_args("web")).unwrap();
        let err = catalog.create_container(&container_args("web")).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn concurrent_creates_admit_exactly_one() {
        let (_dir, catalog) = test_catalog();
        let catalog = Arc::new(catalog);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let catalog = Arc::clone(&catalog);
                std::thread::spawn(move || catalog.create_container(&container_args("race")))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(StoreError::is_already_exists));
    }

    #[test]
    fn remove_missing_container_is_not_found() {
        let (_dir, catalog) = test_catalog();
        assert!(catalog.remove_container("ghost").unwrap_err().is_not_found());
        assert!(catalog.get_container("ghost").unwrap_err().is_not_found());
    }

    #[test]
    fn snapshots_are_listed_oldest_first() {
        let (_dir, catalog) = test_catalog();
        catalog.create_container(&container_args("web")).unwrap();
        catalog.create_container(&container_args("webby")).unwrap();
        catalog.create_container(&snapshot_args("web/zeta")).unwrap();
        catalog.create_container(&snapshot_args("web/alpha")).unwrap();
        catalog.create_container(&snapshot_args("webby/other")).unwrap();

        assert_eq!(
            catalog.container_snapshots("web").unwrap(),
            vec!["web/zeta".to_owned(), "web/alpha".to_owned()]
        );
        assert_eq!(
            catalog.list_containers().unwrap(),
            vec!["web".to_owned(), "webby".to_owned()]
        );
    }

    #[test]
    fn set_config_key_updates_record() {
        let (_dir, catalog) = test_catalog();
        let id = catalog.create_container(&container_args("web")).unwrap();
        catalog
            .set_container_config_key(id, "volatile.apply_quota", "10GB")
            .unwrap();
        let rec = catalog.get_container("web").unwrap();
        assert_eq!(rec.config["volatile.apply_quota"], "10GB");
    }

    #[test]
    fn tampered_record_fails_integrity_check() {
        let (_dir, catalog) = test_catalog();
        let mut args = container_args("web");
        args.description = "original".to_owned();
        catalog.create_container(&args).unwrap();

        let path = record_path(&catalog.layout().containers_dir(), "web");
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("original", "modified")).unwrap();

        assert!(matches!(
            catalog.get_container("web"),
            Err(StoreError::IntegrityFailure { .. })
        ));
        assert!(catalog.list_containers().unwrap().is_empty());
    }

    #[test]
    fn profiles_roundtrip() {
        let (_dir, catalog) = test_catalog();
        let profile = Profile {
            name: "default".to_owned(),
            ..Profile::default()
        };
        catalog.put_profile(&profile).unwrap();
        assert_eq!(catalog.profiles().unwrap(), vec!["default".to_owned()]);
        assert_eq!(catalog.get_profile("default").unwrap(), profile);
        assert!(catalog.get_profile("gpu").unwrap_err().is_not_found());
    }

    #[test]
    fn storage_pool_id_is_stable_across_updates() {
        let (_dir, catalog) = test_catalog();
        let mut config = BTreeMap::new();
        let id = catalog.put_storage_pool("default", "dir", &config).unwrap();
        config.insert("source".to_owned(), "/srv".to_owned());
        assert_eq!(catalog.put_storage_pool("default", "dir", &config).unwrap(), id);
        assert_eq!(catalog.storage_pool_id("default").unwrap(), id);
        assert_eq!(catalog.storage_pools().unwrap()[0].config["source"], "/srv");
        assert!(catalog.storage_pool_id("fast").unwrap_err().is_not_found());
    }

    #[test]
    fn locate_image_local_and_remote() {
        let (_dir, catalog) = test_catalog();
        catalog.put_image(&image("aaa", &["10.0.0.1:8443"])).unwrap();
        catalog.put_image(&image("bbb", &["10.0.0.2:8443"])).unwrap();
        catalog.put_image(&image("ccc", &[])).unwrap();

        assert_eq!(catalog.locate_image("aaa").unwrap(), None);
        assert_eq!(
            catalog.locate_image("bbb").unwrap(),
            Some(NodeAddress::new("10.0.0.2:8443"))
        );
        assert!(catalog.locate_image("ccc").unwrap_err().is_not_found());

        catalog.associate_image_node("bbb").unwrap();
        assert_eq!(catalog.locate_image("bbb").unwrap(), None);
    }

    #[test]
    fn image_last_access_is_recorded() {
        let (_dir, catalog) = test_catalog();
        catalog.put_image(&image("aaa", &["10.0.0.1:8443"])).unwrap();
        let now = Utc::now();
        catalog.update_image_last_access("aaa", now).unwrap();
        assert_eq!(catalog.get_image("aaa").unwrap().last_use_date, Some(now));
    }

    #[test]
    fn backups_insert_if_absent() {
        let (_dir, catalog) = test_catalog();
        let cid = catalog.create_container(&container_args("web")).unwrap();
        let args = BackupArgs {
            name: "web/nightly".to_owned(),
            container_id: cid,
            creation_date: Utc::now(),
            expiry_date: None,
            container_only: false,
            optimized_storage: false,
        };
        let id = catalog.create_backup(&args).unwrap();
        assert_eq!(catalog.get_backup("web/nightly").unwrap().id, id);
        assert!(catalog.create_backup(&args).unwrap_err().is_already_exists());

        catalog.remove_backup("web/nightly").unwrap();
        assert!(catalog.get_backup("web/nightly").unwrap_err().is_not_found());
    }

    #[test]
    fn backup_of_unknown_container_is_rejected() {
        let (_dir, catalog) = test_catalog();
        let args = BackupArgs {
            name: "ghost/b0".to_owned(),
            container_id: 42,
            creation_date: Utc::now(),
            expiry_date: None,
            container_only: true,
            optimized_storage: false,
        };
        assert!(catalog.create_backup(&args).unwrap_err().is_not_found());
    }
}
