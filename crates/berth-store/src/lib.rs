//! Persistent catalog of containers, snapshots, profiles, pools, images, and backups.
//!
//! This crate provides the record store the orchestrator reserves names in: the
//! `Catalog` trait, a JSON-file implementation (`DiskCatalog`) with blake3 record
//! checksums and atomic insert-if-absent under an exclusive `FileLock`,
//! `StoreLayout` for the on-disk structure, and a `WriteAheadLog` that journals
//! compensating actions so interrupted operations can be rolled back on restart.

pub mod catalog;
pub mod disk;
pub mod layout;
pub mod lock;
pub mod wal;

pub use catalog::{Catalog, ImageRecord, Profile, StoragePoolRecord, DEFAULT_PROFILE};
pub use disk::DiskCatalog;
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use lock::FileLock;
pub use wal::{RollbackStep, WalEntry, WalOpKind, WriteAheadLog};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename survives a crash until the parent
/// directory itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },
    #[error("integrity check failed for record '{name}': expected {expected}, got {actual}")]
    IntegrityFailure {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("catalog format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        StoreError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}
