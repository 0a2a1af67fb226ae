use crate::engine::Engine;
use crate::guard::StorageGuard;
use crate::lifecycle::CreationPhase;
use crate::rollback::Rollback;
use crate::CoreError;
use berth_runtime::{Instance, InstanceConfig, InstanceIdentity, InstanceStorage, MigrationArgs};
use berth_schema::{ContainerArgs, ContainerKind};
use berth_store::{RollbackStep, WalOpKind};
use serde_json::json;
use std::os::unix::fs::DirBuilderExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Arguments for snapshotting `source` as `<source>/<snap_name>`, carrying
/// its local config, devices and profiles.
pub fn snapshot_args(source: &Instance, snap_name: &str, stateful: bool) -> ContainerArgs {
    ContainerArgs {
        name: format!("{}/{snap_name}", source.name()),
        kind: ContainerKind::Snapshot,
        architecture: Some(source.architecture()),
        description: source.record().description.clone(),
        config: source.local_config().clone(),
        devices: source.local_devices().clone(),
        profiles: Some(source.profiles().to_vec()),
        ephemeral: source.is_ephemeral(),
        stateful,
        ..ContainerArgs::default()
    }
}

impl Engine {
    /// Snapshot `source`. A stateful snapshot first dumps the running
    /// container's state through the runtime.
    pub fn create_as_snapshot(
        &self,
        args: ContainerArgs,
        source: &Instance,
    ) -> Result<Instance, CoreError> {
        info!("snapshotting '{}' as '{}'", source.name(), args.name);
        if args.stateful {
            if !self.runtime.is_running(source) {
                return Err(CoreError::PreconditionFailed(
                    "Unable to create a stateful snapshot. The container isn't running."
                        .to_owned(),
                ));
            }
            if !self.runtime.checkpoint_available() {
                return Err(CoreError::DependencyMissing(
                    "Unable to create a stateful snapshot. CRIU isn't installed.".to_owned(),
                ));
            }
        }

        let stateful = args.stateful;
        let state_dir = self.state_dir(source)?;
        let mut rb = Rollback::begin(self, WalOpKind::CreateAsSnapshot, &args.name)?;

        if stateful {
            rb.push(RollbackStep::RemoveDir(state_dir.clone()))?;
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&state_dir)?;
            self.runtime
                .migrate(source, &MigrationArgs::snapshot_dump(&state_dir))?;
            debug!("dumped '{}' to {}", source.name(), state_dir.display());
        }

        let snap = self.create_internal(&mut rb, args)?;
        rb.advance(CreationPhase::Reserved)?;

        let driver = self.driver(source.pool())?;
        driver.snapshot_create(&snap, source)?;
        rb.push(RollbackStep::DeleteVolume {
            pool: source.pool().to_owned(),
            name: snap.name().to_owned(),
        })?;
        rb.advance(CreationPhase::Materialized)?;

        {
            let _guard = StorageGuard::start(Arc::clone(&driver), &snap)?;
            self.write_backup_file(source)?;
        }
        rb.advance(CreationPhase::Configured)?;
        rb.commit()?;

        if stateful {
            if let Err(e) = std::fs::remove_dir_all(&state_dir) {
                warn!("failed to remove state dir {}: {e}", state_dir.display());
            }
        }

        self.events.emit(
            "container-snapshot-created",
            &format!("/1.0/containers/{}", source.name()),
            json!({ "snapshot_name": snap.name() }),
        );
        info!("created snapshot '{}'", snap.name());
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_schema::{Architecture, ContainerRecord, Devices};
    use std::collections::BTreeMap;

    #[test]
    fn snapshot_args_carry_local_state() {
        let now = chrono::Utc::now();
        let mut config = BTreeMap::new();
        config.insert("limits.cpu".to_owned(), "2".to_owned());
        let record = ContainerRecord {
            id: 7,
            name: "web".to_owned(),
            kind: ContainerKind::Container,
            architecture: Architecture::Aarch64,
            description: "frontend".to_owned(),
            config: config.clone(),
            devices: Devices::new(),
            profiles: vec!["default".to_owned(), "web".to_owned()],
            ephemeral: true,
            stateful: false,
            creation_date: now,
            last_used_date: now,
        };
        let source = Instance::new(record, config.clone(), Devices::new(), "default");

        let args = snapshot_args(&source, "s0", true);
        assert_eq!(args.name, "web/s0");
        assert!(args.is_snapshot());
        assert!(args.stateful);
        assert!(args.ephemeral);
        assert_eq!(args.architecture, Some(Architecture::Aarch64));
        assert_eq!(args.config, config);
        assert_eq!(
            args.profiles,
            Some(vec!["default".to_owned(), "web".to_owned()])
        );
    }
}
