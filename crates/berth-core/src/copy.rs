use crate::engine::Engine;
use crate::lifecycle::CreationPhase;
use crate::rollback::Rollback;
use crate::CoreError;
use berth_runtime::{Instance, InstanceConfig, InstanceIdentity, InstanceStorage};
use berth_schema::{
    root_disk_device, split_snapshot_name, BackupInfo, ContainerArgs, ContainerKind, Devices,
};
use berth_store::{RollbackStep, WalOpKind};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Point the local root disk of a snapshot at `pool`, adding a `root` disk
/// when the snapshot had none of its own.
fn pin_root_disk(mut devices: Devices, pool: &str) -> Devices {
    let root_key = root_disk_device(&devices)
        .ok()
        .map(|(key, _)| key.to_owned());
    match root_key.and_then(|key| devices.get_mut(&key)) {
        Some(root) => {
            root.insert("pool".to_owned(), pool.to_owned());
        }
        None => {
            let mut root = BTreeMap::new();
            root.insert("type".to_owned(), "disk".to_owned());
            root.insert("path".to_owned(), "/".to_owned());
            root.insert("pool".to_owned(), pool.to_owned());
            devices.insert("root".to_owned(), root);
        }
    }
    devices
}

/// Arguments for copying `source` to a new container `name`: its local
/// config minus per-instance volatile state, devices and profiles.
pub fn copy_args(source: &Instance, name: &str) -> ContainerArgs {
    let config = source
        .local_config()
        .iter()
        .filter(|(k, _)| !k.starts_with("volatile.") || *k == "volatile.base_image")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    ContainerArgs {
        name: name.to_owned(),
        kind: ContainerKind::Container,
        architecture: Some(source.architecture()),
        description: source.record().description.clone(),
        config,
        devices: source.local_devices().clone(),
        profiles: Some(source.profiles().to_vec()),
        ephemeral: source.is_ephemeral(),
        ..ContainerArgs::default()
    }
}

impl Engine {
    /// Copy `source` into a new container, with its snapshots unless
    /// `container_only`.
    pub fn create_as_copy(
        &self,
        args: ContainerArgs,
        source: &Instance,
        container_only: bool,
    ) -> Result<Instance, CoreError> {
        info!("copying '{}' to '{}'", source.name(), args.name);
        let mut rb = Rollback::begin(self, WalOpKind::CreateAsCopy, &args.name)?;
        let target = self.create_internal(&mut rb, args)?;
        rb.advance(CreationPhase::Reserved)?;

        let parent_pool = target.pool().to_owned();
        let mut snapshots = Vec::new();
        if !container_only {
            for snap in self.snapshots_of(source)? {
                let (_, suffix, _) = split_snapshot_name(snap.name());
                let snap_args = ContainerArgs {
                    name: format!("{}/{suffix}", target.name()),
                    kind: ContainerKind::Snapshot,
                    architecture: Some(snap.architecture()),
                    description: snap.record().description.clone(),
                    config: snap.local_config().clone(),
                    devices: pin_root_disk(snap.local_devices().clone(), &parent_pool),
                    profiles: Some(snap.profiles().to_vec()),
                    ephemeral: snap.is_ephemeral(),
                    ..ContainerArgs::default()
                };
                snapshots.push(self.create_internal(&mut rb, snap_args)?);
                rb.advance(CreationPhase::Reserved)?;
            }
        }

        let suffixes: Vec<String> = snapshots
            .iter()
            .map(|s| split_snapshot_name(s.name()).1.to_owned())
            .collect();
        if source.pool() == target.pool() {
            self.driver(target.pool())?
                .copy(&target, source, &suffixes, container_only)?;
        } else {
            self.copy_across_pools(&target, source, &suffixes)?;
        }
        rb.push(RollbackStep::DeleteVolume {
            pool: target.pool().to_owned(),
            name: target.name().to_owned(),
        })?;
        for snap in &snapshots {
            rb.push(RollbackStep::DeleteVolume {
                pool: snap.pool().to_owned(),
                name: snap.name().to_owned(),
            })?;
        }
        rb.advance(CreationPhase::Materialized)?;

        self.configure(&target)?;
        rb.advance(CreationPhase::Configured)?;
        rb.commit()?;

        // The copy stands once the target is configured; a snapshot that
        // fails here is removed on its own.
        for snap in &snapshots {
            if let Err(e) = self.configure(snap) {
                warn!("configuring copied snapshot '{}' failed: {e}", snap.name());
                self.delete_instance(snap);
                return Err(e);
            }
        }

        info!(
            "copied '{}' to '{}' with {} snapshot(s)",
            source.name(),
            target.name(),
            snapshots.len()
        );
        Ok(target)
    }

    /// Move volumes between pools the way a backup does: the source driver
    /// exports them into a scratch directory and the target driver loads it.
    fn copy_across_pools(
        &self,
        target: &Instance,
        source: &Instance,
        snapshots: &[String],
    ) -> Result<(), CoreError> {
        let from = self.driver(source.pool())?;
        let to = self.driver(target.pool())?;
        debug!(
            "copying '{}' from pool '{}' to pool '{}'",
            source.name(),
            source.pool(),
            target.pool()
        );
        let work_dir = tempfile::tempdir_in(self.backups_dir())?;
        from.backup_create(work_dir.path(), source, snapshots)?;
        let info = BackupInfo {
            name: target.name().to_owned(),
            backend: to.storage_type_name().to_owned(),
            pool: target.pool().to_owned(),
            snapshots: snapshots.to_vec(),
            has_binary_format: false,
        };
        to.backup_load(&info, work_dir.path())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(path: &str, pool: Option<&str>) -> BTreeMap<String, String> {
        let mut d = BTreeMap::new();
        d.insert("type".to_owned(), "disk".to_owned());
        d.insert("path".to_owned(), path.to_owned());
        if let Some(pool) = pool {
            d.insert("pool".to_owned(), pool.to_owned());
        }
        d
    }

    #[test]
    fn existing_root_disk_is_repointed() {
        let mut devices = Devices::new();
        devices.insert("rootfs".to_owned(), disk("/", Some("slow")));
        let pinned = pin_root_disk(devices, "fast");
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned["rootfs"]["pool"], "fast");
    }

    #[test]
    fn missing_root_disk_is_synthesized() {
        let mut devices = Devices::new();
        let mut data = disk("/data", None);
        data.insert("source".to_owned(), "/srv/data".to_owned());
        devices.insert("data".to_owned(), data);

        let pinned = pin_root_disk(devices, "fast");
        assert_eq!(pinned.len(), 2);
        assert_eq!(pinned["root"], disk("/", Some("fast")));
    }

    #[test]
    fn copy_args_drop_volatile_state() {
        let now = chrono::Utc::now();
        let mut config = BTreeMap::new();
        config.insert("limits.cpu".to_owned(), "2".to_owned());
        config.insert("volatile.base_image".to_owned(), "abc".to_owned());
        config.insert("volatile.eth0.hwaddr".to_owned(), "00:16:3e:00:00:01".to_owned());
        let record = berth_schema::ContainerRecord {
            id: 3,
            name: "web/s0".to_owned(),
            kind: ContainerKind::Snapshot,
            architecture: berth_schema::Architecture::X86_64,
            description: String::new(),
            config: config.clone(),
            devices: Devices::new(),
            profiles: vec!["default".to_owned()],
            ephemeral: false,
            stateful: true,
            creation_date: now,
            last_used_date: now,
        };
        let source = Instance::new(record, config, Devices::new(), "default");

        let args = copy_args(&source, "web2");
        assert_eq!(args.name, "web2");
        assert!(!args.is_snapshot());
        assert!(!args.stateful);
        assert_eq!(args.config.len(), 2);
        assert!(args.config.contains_key("volatile.base_image"));
        assert!(!args.config.contains_key("volatile.eth0.hwaddr"));
    }
}
