use crate::instance::InstanceIdentity;
use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationCmd {
    Dump,
    PreDump,
    Restore,
    FeatureCheck,
}

/// Checkpoint/restore request handed to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationArgs {
    pub cmd: MigrationCmd,
    pub state_dir: PathBuf,
    /// Caller label, e.g. `snapshot` or `migration`.
    pub function: String,
    /// Stop the container once dumped.
    pub stop: bool,
    /// Pass `action.sh` in the state dir to the checkpoint tool.
    pub action_script: bool,
    pub dump_dir: String,
    pub pre_dump_dir: String,
}

impl MigrationArgs {
    /// A live dump for a stateful snapshot: the container keeps running.
    pub fn snapshot_dump(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            cmd: MigrationCmd::Dump,
            state_dir: state_dir.into(),
            function: "snapshot".to_owned(),
            stop: false,
            action_script: false,
            dump_dir: String::new(),
            pre_dump_dir: String::new(),
        }
    }
}

pub trait RuntimeDriver: Send + Sync {
    fn name(&self) -> &str;

    fn is_running(&self, inst: &dyn InstanceIdentity) -> bool;

    /// Whether checkpoint tooling is installed on the host.
    fn checkpoint_available(&self) -> bool;

    fn migrate(&self, inst: &dyn InstanceIdentity, args: &MigrationArgs)
        -> Result<(), RuntimeError>;
}

/// Runtime for hosts that only manage storage: nothing ever runs, so
/// there is nothing to checkpoint.
#[derive(Debug, Default)]
pub struct OfflineRuntime;

impl RuntimeDriver for OfflineRuntime {
    fn name(&self) -> &'static str {
        "offline"
    }

    fn is_running(&self, _inst: &dyn InstanceIdentity) -> bool {
        false
    }

    fn checkpoint_available(&self) -> bool {
        crate::prereq::check_checkpoint_prereqs().is_empty()
    }

    fn migrate(
        &self,
        inst: &dyn InstanceIdentity,
        _args: &MigrationArgs,
    ) -> Result<(), RuntimeError> {
        Err(RuntimeError::NotRunning(inst.name().to_owned()))
    }
}

pub fn select_runtime(name: &str) -> Result<Arc<dyn RuntimeDriver>, RuntimeError> {
    match name {
        "offline" => Ok(Arc::new(OfflineRuntime)),
        "mock" => Ok(Arc::new(crate::mock::MockRuntime::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
