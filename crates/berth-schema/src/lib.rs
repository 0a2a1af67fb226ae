//! Data model for berth containers, snapshots, and backups.
//!
//! This crate defines the schema layer: container arguments and catalog records
//! (`ContainerArgs`, `ContainerRecord`), device definitions with the per-type key
//! table, the container config key checker, architecture names, snapshot name
//! handling, and the small parsers (`raw.idmap`, byte sizes) the validator needs.
//! Nothing here performs I/O.

pub mod args;
pub mod arch;
pub mod backup;
pub mod device;
pub mod idmap;
pub mod keys;
pub mod name;
pub mod types;
pub mod units;

pub use arch::Architecture;
pub use args::{ContainerArgs, ContainerKind, ContainerRecord};
pub use backup::{BackupArgs, BackupInfo, BackupRecord};
pub use device::{
    is_root_disk, root_disk_device, valid_device_key, DeviceConfig, DeviceType, Devices,
};
pub use idmap::{parse_raw_idmap, IdmapEntry, IdmapKind};
pub use keys::{config_key_checker, is_true, KeyChecker};
pub use name::{is_snapshot_name, split_snapshot_name, valid_hostname, SNAPSHOT_DELIMITER};
pub use types::{ImageHash, NodeAddress, PoolName};
pub use units::parse_byte_size;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("unknown architecture: {0}")]
    UnknownArchitecture(String),
    #[error("unknown device type: {0}")]
    UnknownDeviceType(String),
    #[error("invalid byte size '{0}'")]
    InvalidByteSize(String),
    #[error("invalid raw.idmap line '{line}': {reason}")]
    InvalidIdmap { line: String, reason: String },
    #[error("No root device could be found.")]
    NoRootDevice,
    #[error("More than one root device found.")]
    MultipleRootDevices,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_display_unknown_key() {
        let e = SchemaError::UnknownKey("foo.bar".to_owned());
        assert!(e.to_string().contains("foo.bar"));
    }

    #[test]
    fn schema_error_display_invalid_value() {
        let e = SchemaError::InvalidValue {
            key: "limits.processes".to_owned(),
            reason: "not an integer".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("limits.processes"));
        assert!(msg.contains("not an integer"));
    }

    #[test]
    fn schema_error_display_root_device() {
        assert_eq!(
            SchemaError::NoRootDevice.to_string(),
            "No root device could be found."
        );
        assert_eq!(
            SchemaError::MultipleRootDevices.to_string(),
            "More than one root device found."
        );
    }
}
