//! Validation and lifecycle orchestration for berth containers.
//!
//! This crate ties the catalog, storage pools, and runtime driver together
//! into the `Engine`, the API for creating containers (empty, from an image,
//! as a copy, as a snapshot, from a backup) and for taking backups. Every
//! creation runs reserve → materialize → configure → commit; a `Rollback`
//! stack journals compensating steps and unwinds them if a later step fails.
//! The `validate` module is the synchronous gate in front of all of it.

pub mod backup;
pub mod config;
pub mod engine;
pub mod events;
pub mod guard;
pub mod lifecycle;
pub mod validate;

mod copy;
mod create;
mod images;
mod rollback;
mod snapshot;

pub use backup::{read_backup_file, read_index, Backup, BackupFile, BACKUP_FILE, INDEX_FILE};
pub use config::{EngineConfig, PoolConfig, CONFIG_FILE_NAME, UNPRIVILEGED_ONLY_ENV};
pub use copy::copy_args;
pub use engine::Engine;
pub use events::{EventSink, LifecycleEvent, LogEventSink, MemoryEventSink};
pub use guard::StorageGuard;
pub use lifecycle::CreationPhase;
pub use snapshot::snapshot_args;
pub use validate::{validate_config, validate_devices, validate_name};

use berth_schema::SchemaError;
use berth_store::StoreError;
use thiserror::Error;

/// A configuration, device, or name rejected before anything was mutated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0}")]
    InvalidName(String),
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("{0}")]
    ScopeViolation(String),
    #[error("{0}")]
    UnsupportedConfiguration(String),
    #[error("{0}")]
    InvalidDevice(String),
}

impl From<SchemaError> for ValidationError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::UnknownKey(key) => ValidationError::UnknownKey(key),
            SchemaError::InvalidValue { key, reason } => {
                ValidationError::InvalidValue { key, reason }
            }
            SchemaError::InvalidIdmap { .. } => ValidationError::InvalidValue {
                key: "raw.idmap".to_owned(),
                reason: e.to_string(),
            },
            SchemaError::InvalidByteSize(_) => ValidationError::InvalidValue {
                key: "size".to_owned(),
                reason: e.to_string(),
            },
            SchemaError::UnknownArchitecture(_)
            | SchemaError::UnknownDeviceType(_)
            | SchemaError::NoRootDevice
            | SchemaError::MultipleRootDevices => ValidationError::InvalidDevice(e.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    DependencyMissing(String),
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("storage pool '{0}' does not exist and a binary backup cannot be moved to another pool")]
    UnresolvablePool(String),
    #[error("storage error: {0}")]
    Storage(#[from] berth_runtime::StorageError),
    #[error("runtime error: {0}")]
    Runtime(#[from] berth_runtime::RuntimeError),
    #[error("catalog error: {0}")]
    Catalog(StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] berth_remote::RemoteError),
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        if e.is_already_exists() {
            CoreError::AlreadyExists(e.to_string())
        } else if e.is_not_found() {
            CoreError::NotFound(e.to_string())
        } else {
            CoreError::Catalog(e)
        }
    }
}

impl From<SchemaError> for CoreError {
    fn from(e: SchemaError) -> Self {
        CoreError::Validation(e.into())
    }
}

impl CoreError {
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_conflicts_map_to_dedicated_variants() {
        let e: CoreError = StoreError::already_exists("container", "web").into();
        assert!(matches!(e, CoreError::AlreadyExists(_)));
        let e: CoreError = StoreError::not_found("profile", "gpu").into();
        assert!(matches!(e, CoreError::NotFound(ref m) if m == "profile 'gpu' not found"));
        let e: CoreError = StoreError::InvalidRecord("bad".to_owned()).into();
        assert!(matches!(e, CoreError::Catalog(_)));
    }

    #[test]
    fn schema_errors_become_validation_errors() {
        let e: CoreError = SchemaError::NoRootDevice.into();
        assert!(e.is_validation());
        assert_eq!(e.to_string(), "No root device could be found.");
    }

    #[test]
    fn validation_error_display_is_the_bare_message() {
        let e = CoreError::from(ValidationError::InvalidDevice(
            "Disk entry is missing the required \"source\" property.".to_owned(),
        ));
        assert_eq!(
            e.to_string(),
            "Disk entry is missing the required \"source\" property."
        );
    }
}
