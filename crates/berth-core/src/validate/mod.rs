//! Synchronous gate run before any catalog or storage mutation.
//!
//! Container names, config maps, and device maps are checked against the key
//! tables in `berth-schema` plus the cross-key rules below. Host facts come
//! in through `HostCapabilities` and `DeviceProbe`; nothing here reads the
//! environment.

mod config;
mod devices;

pub use config::validate_config;
pub use devices::validate_devices;

use crate::ValidationError;
use berth_schema::{valid_hostname, SNAPSHOT_DELIMITER};

pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.contains(SNAPSHOT_DELIMITER) {
        return Err(ValidationError::InvalidName(format!(
            "The character '{SNAPSHOT_DELIMITER}' is reserved for snapshots."
        )));
    }
    if !valid_hostname(name) {
        return Err(ValidationError::InvalidName(
            "Container name isn't a valid hostname.".to_owned(),
        ));
    }
    Ok(())
}
