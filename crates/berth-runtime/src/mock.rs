//! In-memory drivers for tests, with call logs and failure injection.

use crate::backend::{MigrationArgs, RuntimeDriver};
use crate::host::{DeviceNode, DeviceNodeKind, DeviceProbe};
use crate::instance::{InstanceIdentity, InstanceStorage};
use crate::storage::{StorageDriver, StorageKind, VolumeType};
use crate::{RuntimeError, StorageError};
use berth_schema::{split_snapshot_name, BackupInfo};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

type CallHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct MockStorageState {
    volumes: BTreeSet<String>,
    active: BTreeSet<String>,
    quotas: BTreeMap<String, u64>,
    calls: Vec<String>,
    fail_on: HashSet<String>,
    hooks: BTreeMap<String, CallHook>,
}

/// Storage driver that tracks volumes in memory and backs each one with an
/// empty directory so metadata files can be written into it.
pub struct MockStorage {
    pool: String,
    kind: StorageKind,
    root: PathBuf,
    state: Mutex<MockStorageState>,
}

impl MockStorage {
    pub fn new(pool: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            pool: pool.into(),
            kind: StorageKind::Dir,
            root: root.into(),
            state: Mutex::new(MockStorageState::default()),
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: StorageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Make every later call of `op` (e.g. `"copy"`, `"set_quota"`) fail.
    pub fn fail_on(&self, op: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_on.insert(op.to_owned());
        }
    }

    /// Fail `op` only when it targets volume `name`.
    pub fn fail_on_volume(&self, op: &str, name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_on.insert(format!("{op}:{name}"));
        }
    }

    /// Run `hook` at the start of every `op` call, before the call touches
    /// any state.
    pub fn on_call(&self, op: &str, hook: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut state) = self.state.lock() {
            state.hooks.insert(op.to_owned(), Arc::new(hook));
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_on.clear();
        }
    }

    /// Calls so far, as `op:name`.
    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    pub fn volumes(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.volumes.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state
            .lock()
            .is_ok_and(|s| s.volumes.contains(name))
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.state.lock().is_ok_and(|s| s.active.contains(name))
    }

    pub fn quota(&self, name: &str) -> Option<u64> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.quotas.get(name).copied())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockStorageState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Failed(format!("mutex poisoned: {e}")))
    }

    /// Log the call and apply injected failures.
    fn enter(&self, op: &str, name: &str) -> Result<MutexGuard<'_, MockStorageState>, StorageError> {
        let hook = self.lock()?.hooks.get(op).cloned();
        if let Some(hook) = hook {
            hook();
        }
        let mut state = self.lock()?;
        let call = format!("{op}:{name}");
        state.calls.push(call.clone());
        if state.fail_on.contains(op) || state.fail_on.contains(&call) {
            return Err(StorageError::Failed(format!("injected failure in {op}")));
        }
        Ok(state)
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let (_, _, is_snap) = split_snapshot_name(name);
        if is_snap {
            self.root.join("snapshots").join(name)
        } else {
            self.root.join("containers").join(name)
        }
    }

    fn add_volume(&self, state: &mut MockStorageState, name: &str) -> Result<(), StorageError> {
        if state.volumes.contains(name) {
            return Err(StorageError::VolumeExists(name.to_owned()));
        }
        fs::create_dir_all(self.path_for(name))?;
        state.volumes.insert(name.to_owned());
        Ok(())
    }

    fn require_volume(state: &MockStorageState, name: &str) -> Result<(), StorageError> {
        if state.volumes.contains(name) {
            Ok(())
        } else {
            Err(StorageError::VolumeNotFound(name.to_owned()))
        }
    }
}

impl StorageDriver for MockStorage {
    fn storage_type_name(&self) -> &str {
        self.kind.as_str()
    }

    fn kind(&self) -> StorageKind {
        self.kind
    }

    fn pool_name(&self) -> &str {
        &self.pool
    }

    fn create_empty(&self, inst: &dyn InstanceStorage) -> Result<(), StorageError> {
        let mut state = self.enter("create_empty", inst.name())?;
        self.add_volume(&mut state, inst.name())
    }

    fn create_from_image(
        &self,
        inst: &dyn InstanceStorage,
        _image_file: &Path,
    ) -> Result<(), StorageError> {
        let mut state = self.enter("create_from_image", inst.name())?;
        self.add_volume(&mut state, inst.name())
    }

    fn copy(
        &self,
        target: &dyn InstanceStorage,
        source: &dyn InstanceStorage,
        snapshots: &[String],
        container_only: bool,
    ) -> Result<(), StorageError> {
        let mut state = self.enter("copy", target.name())?;
        Self::require_volume(&state, source.name())?;
        self.add_volume(&mut state, target.name())?;
        if !container_only {
            for snap in snapshots {
                self.add_volume(&mut state, &format!("{}/{snap}", target.name()))?;
            }
        }
        Ok(())
    }

    fn snapshot_create_empty(&self, snapshot: &dyn InstanceStorage) -> Result<(), StorageError> {
        let mut state = self.enter("snapshot_create_empty", snapshot.name())?;
        self.add_volume(&mut state, snapshot.name())
    }

    fn snapshot_create(
        &self,
        snapshot: &dyn InstanceStorage,
        source: &dyn InstanceStorage,
    ) -> Result<(), StorageError> {
        let mut state = self.enter("snapshot_create", snapshot.name())?;
        Self::require_volume(&state, source.name())?;
        self.add_volume(&mut state, snapshot.name())
    }

    fn set_quota(
        &self,
        _volume: VolumeType,
        size: u64,
        inst: &dyn InstanceStorage,
    ) -> Result<(), StorageError> {
        let mut state = self.enter("set_quota", inst.name())?;
        Self::require_volume(&state, inst.name())?;
        state.quotas.insert(inst.name().to_owned(), size);
        Ok(())
    }

    fn backup_create(
        &self,
        work_dir: &Path,
        source: &dyn InstanceStorage,
        snapshots: &[String],
    ) -> Result<(), StorageError> {
        let state = self.enter("backup_create", source.name())?;
        Self::require_volume(&state, source.name())?;
        fs::create_dir_all(work_dir.join("container"))?;
        for snap in snapshots {
            fs::create_dir_all(work_dir.join("snapshots").join(snap))?;
        }
        Ok(())
    }

    fn backup_load(&self, info: &BackupInfo, unpacked: &Path) -> Result<(), StorageError> {
        let mut state = self.enter("backup_load", &info.name)?;
        if !unpacked.join("container").is_dir() {
            return Err(StorageError::Archive(
                "backup has no container volume".to_owned(),
            ));
        }
        self.add_volume(&mut state, &info.name)?;
        let backup_file = unpacked.join("container").join("backup.json");
        if backup_file.is_file() {
            fs::copy(&backup_file, self.path_for(&info.name).join("backup.json"))?;
        }
        for snap in &info.snapshots {
            self.add_volume(&mut state, &format!("{}/{snap}", info.name))?;
        }
        Ok(())
    }

    fn start(&self, inst: &dyn InstanceStorage) -> Result<bool, StorageError> {
        let mut state = self.enter("start", inst.name())?;
        Self::require_volume(&state, inst.name())?;
        Ok(state.active.insert(inst.name().to_owned()))
    }

    fn stop(&self, inst: &dyn InstanceStorage) -> Result<bool, StorageError> {
        let mut state = self.enter("stop", inst.name())?;
        Ok(state.active.remove(inst.name()))
    }

    fn delete(&self, inst: &dyn InstanceStorage) -> Result<(), StorageError> {
        let mut state = self.enter("delete", inst.name())?;
        state.volumes.remove(inst.name());
        state.active.remove(inst.name());
        let path = self.path_for(inst.name());
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    fn mount_path(&self, inst: &dyn InstanceIdentity) -> PathBuf {
        self.path_for(inst.name())
    }
}

#[derive(Default)]
struct MockRuntimeState {
    running: HashSet<String>,
    checkpoint_unavailable: bool,
    fail_migrate: bool,
    migrations: Vec<(String, MigrationArgs)>,
}

/// Runtime driver whose running set is controlled by the test.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockRuntimeState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, name: &str, running: bool) {
        if let Ok(mut state) = self.state.lock() {
            if running {
                state.running.insert(name.to_owned());
            } else {
                state.running.remove(name);
            }
        }
    }

    pub fn set_checkpoint_available(&self, available: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.checkpoint_unavailable = !available;
        }
    }

    pub fn fail_migrate(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_migrate = fail;
        }
    }

    pub fn migrations(&self) -> Vec<(String, MigrationArgs)> {
        self.state
            .lock()
            .map(|s| s.migrations.clone())
            .unwrap_or_default()
    }
}

impl RuntimeDriver for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_running(&self, inst: &dyn InstanceIdentity) -> bool {
        self.state
            .lock()
            .is_ok_and(|s| s.running.contains(inst.name()))
    }

    fn checkpoint_available(&self) -> bool {
        self.state.lock().is_ok_and(|s| !s.checkpoint_unavailable)
    }

    fn migrate(
        &self,
        inst: &dyn InstanceIdentity,
        args: &MigrationArgs,
    ) -> Result<(), RuntimeError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| RuntimeError::MigrationFailed(format!("mutex poisoned: {e}")))?;
        state.migrations.push((inst.name().to_owned(), args.clone()));
        if state.fail_migrate {
            return Err(RuntimeError::MigrationFailed(
                "injected dump failure".to_owned(),
            ));
        }
        if !state.running.contains(inst.name()) {
            return Err(RuntimeError::NotRunning(inst.name().to_owned()));
        }
        fs::create_dir_all(&args.state_dir)?;
        fs::write(args.state_dir.join("dump.log"), "mock dump\n")?;
        Ok(())
    }
}

/// Device probe answering from a fixed table.
#[derive(Debug, Default)]
pub struct MockProbe {
    dirs: BTreeSet<PathBuf>,
    files: BTreeSet<PathBuf>,
    devices: BTreeMap<PathBuf, DeviceNode>,
    pci: BTreeSet<String>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.dirs.insert(path.into());
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.insert(path.into());
        self
    }

    #[must_use]
    pub fn with_device(
        mut self,
        path: impl Into<PathBuf>,
        kind: DeviceNodeKind,
        major: u32,
        minor: u32,
    ) -> Self {
        self.devices
            .insert(path.into(), DeviceNode { kind, major, minor });
        self
    }

    #[must_use]
    pub fn with_pci(mut self, address: impl Into<String>) -> Self {
        self.pci.insert(address.into());
        self
    }
}

impl DeviceProbe for MockProbe {
    fn path_exists(&self, path: &Path) -> bool {
        self.dirs.contains(path) || self.files.contains(path) || self.devices.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    fn device_node(&self, path: &Path) -> std::io::Result<Option<DeviceNode>> {
        if let Some(node) = self.devices.get(path) {
            return Ok(Some(*node));
        }
        if self.path_exists(path) {
            return Ok(None);
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} not found", path.display()),
        ))
    }

    fn pci_device_exists(&self, address: &str) -> bool {
        self.pci.contains(address)
    }
}
