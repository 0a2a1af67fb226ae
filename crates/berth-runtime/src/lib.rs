//! Storage and runtime collaborators for berth containers.
//!
//! This crate implements the layer the orchestrator drives once a container
//! is reserved in the catalog: the `StorageDriver` trait with a directory
//! driver (`DirStorage`), the `RuntimeDriver` trait with an offline driver,
//! `Instance` and the narrow capability traits drivers consume, host
//! capability detection and device probes, tar archive helpers, prerequisite
//! checks, and in-memory mock drivers with failure injection for tests.

pub mod archive;
pub mod backend;
pub mod dir;
pub mod host;
pub mod instance;
pub mod mock;
pub mod prereq;
pub mod storage;

pub use backend::{select_runtime, MigrationArgs, MigrationCmd, OfflineRuntime, RuntimeDriver};
pub use dir::DirStorage;
pub use host::{DeviceNode, DeviceNodeKind, DeviceProbe, HostCapabilities, HostProbe};
pub use instance::{Instance, InstanceConfig, InstanceIdentity, InstanceStorage, VolumeRef};
pub use mock::{MockProbe, MockRuntime, MockStorage};
pub use prereq::{check_checkpoint_prereqs, format_missing, MissingPrereq};
pub use storage::{open_pool, StorageDriver, StorageKind, StoragePools, VolumeType};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("runtime '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("container '{0}' is not running")]
    NotRunning(String),
    #[error("migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("volume '{0}' already exists")]
    VolumeExists(String),
    #[error("volume '{0}' not found")]
    VolumeNotFound(String),
    #[error("storage driver '{0}' does not support quotas")]
    QuotaUnsupported(String),
    #[error("unknown storage driver '{0}'")]
    UnknownDriver(String),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("storage operation failed: {0}")]
    Failed(String),
}
