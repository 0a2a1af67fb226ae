use crate::backup::Backup;
use crate::config::EngineConfig;
use crate::events::{EventSink, LogEventSink};
use crate::guard::StorageGuard;
use crate::rollback::Rollback;
use crate::validate::{validate_config, validate_devices, validate_name};
use crate::{CoreError, ValidationError};
use berth_remote::{HttpImageTransfer, ImageTransfer};
use berth_runtime::{
    open_pool, select_runtime, DeviceProbe, HostCapabilities, HostProbe, Instance,
    InstanceConfig, InstanceIdentity, InstanceStorage, RuntimeDriver, StorageDriver,
    StoragePools, VolumeRef, VolumeType,
};
use berth_schema::{
    is_snapshot_name, parse_byte_size, root_disk_device, split_snapshot_name, ContainerArgs,
    Devices, NodeAddress,
};
use berth_store::{
    Catalog, DiskCatalog, FileLock, Profile, RollbackStep, StoreLayout, WriteAheadLog,
    DEFAULT_PROFILE,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The lifecycle orchestrator.
///
/// Holds the collaborators every flow needs and owns the working directories
/// under `var_dir`: `images/`, `backups/` and `logs/`.
pub struct Engine {
    pub(crate) catalog: Arc<dyn Catalog>,
    pub(crate) pools: StoragePools,
    pub(crate) runtime: Arc<dyn RuntimeDriver>,
    pub(crate) transfer: Option<Arc<dyn ImageTransfer>>,
    pub(crate) probe: Arc<dyn DeviceProbe>,
    pub(crate) host: HostCapabilities,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) wal: WriteAheadLog,
    var_dir: PathBuf,
}

impl Engine {
    /// Build an engine and roll back whatever an interrupted run left in the
    /// journal.
    pub fn new(
        var_dir: impl Into<PathBuf>,
        catalog: Arc<dyn Catalog>,
        pools: StoragePools,
        runtime: Arc<dyn RuntimeDriver>,
        host: HostCapabilities,
    ) -> Result<Self, CoreError> {
        let var_dir = var_dir.into();
        let wal = WriteAheadLog::new(&StoreLayout::new(&var_dir));
        wal.initialize()?;
        for dir in ["images", "backups", "logs"] {
            std::fs::create_dir_all(var_dir.join(dir))?;
        }

        let engine = Self {
            catalog,
            pools,
            runtime,
            transfer: None,
            probe: Arc::new(HostProbe),
            host,
            events: Arc::new(LogEventSink),
            wal,
            var_dir,
        };
        engine.recover()?;
        Ok(engine)
    }

    /// Open the JSON catalog under `config.var_dir`, register every pool from
    /// the config in it, and wire up the configured runtime and cluster
    /// transfer.
    pub fn from_config(config: &EngineConfig) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(&config.var_dir);
        let catalog = Arc::new(DiskCatalog::open(
            layout,
            NodeAddress::new(config.node_address.clone()),
        )?);

        let mut pools = StoragePools::new();
        for pool in &config.pools {
            let pool_config = pool.driver_config();
            let driver = open_pool(&pool.name, &pool.driver, &pool_config)?;
            catalog.put_storage_pool(&pool.name, &pool.driver, &pool_config)?;
            pools.register(driver);
        }

        let runtime = select_runtime(&config.runtime)?;
        let transfer = Arc::new(HttpImageTransfer::new(config.cluster.clone()));
        Ok(Self::new(&config.var_dir, catalog, pools, runtime, config.host.clone())?
            .with_transfer(transfer))
    }

    #[must_use]
    pub fn with_transfer(mut self, transfer: Arc<dyn ImageTransfer>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn DeviceProbe>) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn host(&self) -> &HostCapabilities {
        &self.host
    }

    pub fn pools(&self) -> &StoragePools {
        &self.pools
    }

    pub fn var_dir(&self) -> &Path {
        &self.var_dir
    }

    pub fn images_dir(&self) -> PathBuf {
        self.var_dir.join("images")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.var_dir.join("backups")
    }

    pub fn log_dir(&self, name: &str) -> PathBuf {
        self.var_dir.join("logs").join(name)
    }

    /// Checkpoint dump directory of a running container. It lives inside the
    /// container's volume so a snapshot of the volume carries the dump.
    pub fn state_dir(&self, inst: &Instance) -> Result<PathBuf, CoreError> {
        Ok(self.driver(inst.pool())?.mount_path(inst).join("state"))
    }

    /// Held shared by every in-flight operation, exclusive during recovery.
    pub(crate) fn operations_lock(&self) -> PathBuf {
        self.var_dir.join("operations.lock")
    }

    fn recover(&self) -> Result<(), CoreError> {
        match FileLock::try_acquire(&self.operations_lock())? {
            Some(_lock) => {
                let rolled_back = self.wal.recover(|step| self.undo(step))?;
                if rolled_back > 0 {
                    info!("recovered {rolled_back} interrupted operation(s)");
                }
            }
            None => {
                debug!("journal recovery skipped: operations are in flight");
            }
        }
        Ok(())
    }

    /// Apply one compensating step. Failures are logged, never raised.
    pub(crate) fn undo(&self, step: &RollbackStep) {
        if step.apply_local() {
            return;
        }
        debug!("rollback: {step}");
        match step {
            RollbackStep::RemoveContainer { name } => {
                if let Err(e) = self.catalog.remove_container(name) {
                    if !e.is_not_found() {
                        warn!("rollback: failed to remove record '{name}': {e}");
                    }
                }
            }
            RollbackStep::RemoveBackup { name } => {
                if let Err(e) = self.catalog.remove_backup(name) {
                    if !e.is_not_found() {
                        warn!("rollback: failed to remove backup record '{name}': {e}");
                    }
                }
            }
            RollbackStep::DeleteVolume { pool, name } => match self.pools.get(pool) {
                Some(driver) => {
                    if let Err(e) = driver.delete(&VolumeRef::new(name.as_str(), pool.as_str())) {
                        warn!("rollback: failed to delete volume '{name}' on '{pool}': {e}");
                    }
                }
                None => warn!("rollback: pool '{pool}' is not loaded, volume '{name}' left behind"),
            },
            RollbackStep::RemoveDir(_) | RollbackStep::RemoveFile(_) => {}
        }
    }

    /// Create the default profile with a root disk on `pool`, unless it
    /// already exists.
    pub fn ensure_default_profile(&self, pool: &str) -> Result<Profile, CoreError> {
        match self.catalog.get_profile(DEFAULT_PROFILE) {
            Ok(profile) => return Ok(profile),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        let mut root = BTreeMap::new();
        root.insert("type".to_owned(), "disk".to_owned());
        root.insert("path".to_owned(), "/".to_owned());
        root.insert("pool".to_owned(), pool.to_owned());
        let mut devices = Devices::new();
        devices.insert("root".to_owned(), root);

        let profile = Profile {
            name: DEFAULT_PROFILE.to_owned(),
            description: "Default berth profile".to_owned(),
            config: BTreeMap::new(),
            devices,
        };
        validate_config(&self.host, &profile.config, true, false)?;
        validate_devices(
            self.catalog.as_ref(),
            self.probe.as_ref(),
            &self.host,
            &profile.devices,
            true,
            false,
        )?;
        self.catalog.put_profile(&profile)?;
        info!("created default profile on pool '{pool}'");
        Ok(profile)
    }

    /// Merge profiles in order, then the local config and devices on top.
    pub(crate) fn expand(
        &self,
        profiles: &[String],
        config: &BTreeMap<String, String>,
        devices: &Devices,
    ) -> Result<(BTreeMap<String, String>, Devices), CoreError> {
        let mut expanded_config = BTreeMap::new();
        let mut expanded_devices = Devices::new();
        for name in profiles {
            let profile = self.catalog.get_profile(name)?;
            expanded_config.extend(profile.config);
            expanded_devices.extend(profile.devices);
        }
        expanded_config.extend(config.iter().map(|(k, v)| (k.clone(), v.clone())));
        expanded_devices.extend(devices.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok((expanded_config, expanded_devices))
    }

    /// Pool named by the root disk of an expanded device set.
    pub(crate) fn root_pool(devices: &Devices) -> Result<String, CoreError> {
        let (name, root) = root_disk_device(devices)?;
        root.get("pool")
            .filter(|p| !p.is_empty())
            .cloned()
            .ok_or_else(|| {
                CoreError::NotFound(format!("root disk '{name}' does not name a storage pool"))
            })
    }

    pub(crate) fn driver(&self, pool: &str) -> Result<Arc<dyn StorageDriver>, CoreError> {
        self.pools
            .get(pool)
            .ok_or_else(|| CoreError::NotFound(format!("storage pool '{pool}' is not loaded")))
    }

    /// Reserve a container or snapshot: default and validate the request,
    /// then insert it into the catalog. The record is pushed onto `rb`.
    pub(crate) fn create_internal(
        &self,
        rb: &mut Rollback<'_>,
        mut args: ContainerArgs,
    ) -> Result<Instance, CoreError> {
        let profiles = args
            .profiles
            .get_or_insert_with(|| vec![DEFAULT_PROFILE.to_owned()])
            .clone();
        if let Some(ref image) = args.base_image {
            args.config
                .insert("volatile.base_image".to_owned(), image.clone());
        }
        let architecture = match args.architecture {
            Some(arch) => arch,
            None => self.host.default_architecture().ok_or_else(|| {
                CoreError::NotFound("this host reports no supported architecture".to_owned())
            })?,
        };
        args.architecture = Some(architecture);

        if !args.is_snapshot() {
            validate_name(&args.name)?;
        }
        validate_config(&self.host, &args.config, false, false)?;
        validate_devices(
            self.catalog.as_ref(),
            self.probe.as_ref(),
            &self.host,
            &args.devices,
            false,
            false,
        )?;

        if !self.host.supports(architecture) {
            return Err(CoreError::NotFound(format!(
                "Requested architecture {architecture} isn't supported by this host"
            )));
        }

        let known = self.catalog.profiles()?;
        let mut checked: Vec<&str> = Vec::with_capacity(profiles.len());
        for profile in &profiles {
            if !known.contains(profile) {
                return Err(CoreError::NotFound(format!(
                    "Requested profile '{profile}' doesn't exist"
                )));
            }
            if checked.contains(&profile.as_str()) {
                return Err(ValidationError::InvalidValue {
                    key: "profiles".to_owned(),
                    reason: "Duplicate profile found in request".to_owned(),
                }
                .into());
            }
            checked.push(profile);
        }

        if args.is_snapshot() {
            let (parent, _, has_parent) = split_snapshot_name(&args.name);
            if !has_parent {
                return Err(ValidationError::InvalidName(format!(
                    "Snapshot name '{}' has no parent container",
                    args.name
                ))
                .into());
            }
            self.catalog.get_container(parent)?;
        }

        let (expanded_config, expanded_devices) =
            self.expand(&profiles, &args.config, &args.devices)?;
        validate_config(&self.host, &expanded_config, false, true)?;
        validate_devices(
            self.catalog.as_ref(),
            self.probe.as_ref(),
            &self.host,
            &expanded_devices,
            false,
            true,
        )?;
        let pool = Self::root_pool(&expanded_devices)?;
        self.driver(&pool)?;

        match self.catalog.create_container(&args) {
            Ok(id) => debug!("reserved '{}' as #{id}", args.name),
            Err(e) if e.is_already_exists() => {
                let thing = if is_snapshot_name(&args.name) {
                    "Snapshot"
                } else {
                    "Container"
                };
                return Err(CoreError::AlreadyExists(format!(
                    "{thing} '{}' already exists",
                    args.name
                )));
            }
            Err(e) => return Err(e.into()),
        }
        rb.push(RollbackStep::RemoveContainer {
            name: args.name.clone(),
        })?;

        let log_dir = self.log_dir(&args.name);
        if log_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&log_dir) {
                warn!("failed to remove stale logs of '{}': {e}", args.name);
            }
        }

        let record = self.catalog.get_container(&args.name)?;
        Ok(Instance::new(record, expanded_config, expanded_devices, pool))
    }

    pub fn load_by_name(&self, name: &str) -> Result<Instance, CoreError> {
        let record = self.catalog.get_container(name)?;
        let (config, devices) = self.expand(&record.profiles, &record.config, &record.devices)?;
        let pool = Self::root_pool(&devices)?;
        Ok(Instance::new(record, config, devices, pool))
    }

    pub fn load_by_id(&self, id: i64) -> Result<Instance, CoreError> {
        let name = self.catalog.container_name(id)?;
        self.load_by_name(&name)
    }

    pub fn backup_load_by_name(&self, name: &str) -> Result<Backup, CoreError> {
        let record = self.catalog.get_backup(name)?;
        let container = self.load_by_id(record.container_id)?;
        Ok(Backup { record, container })
    }

    /// Snapshots of `inst`, oldest first.
    pub fn snapshots_of(&self, inst: &dyn InstanceIdentity) -> Result<Vec<Instance>, CoreError> {
        self.catalog
            .container_snapshots(inst.name())?
            .iter()
            .map(|name| self.load_by_name(name))
            .collect()
    }

    /// Post-storage setup: apply the root disk quota and write the backup
    /// file, with the volume started for the duration.
    pub(crate) fn configure(&self, inst: &Instance) -> Result<(), CoreError> {
        let (_, root) = root_disk_device(inst.expanded_devices())?;
        let driver = self.driver(inst.pool())?;
        let _guard = StorageGuard::start(Arc::clone(&driver), inst)?;

        if let Some(size) = root.get("size").filter(|s| !s.is_empty()) {
            if !driver.kind().can_resize_online() && self.runtime.is_running(inst) {
                debug!(
                    "'{}' is running on {}; deferring quota {size}",
                    inst.name(),
                    driver.storage_type_name()
                );
                self.catalog
                    .set_container_config_key(inst.id(), "volatile.apply_quota", size)?;
            } else {
                let bytes = parse_byte_size(size)?;
                driver.set_quota(VolumeType::Container, bytes, inst)?;
                debug!("set quota of '{}' to {bytes} bytes", inst.name());
            }
        }

        self.write_backup_file(inst)
    }

    /// Remove a fully created instance: volume first, then its record.
    pub(crate) fn delete_instance(&self, inst: &Instance) {
        self.undo(&RollbackStep::DeleteVolume {
            pool: inst.pool().to_owned(),
            name: inst.name().to_owned(),
        });
        self.undo(&RollbackStep::RemoveContainer {
            name: inst.name().to_owned(),
        });
    }
}
