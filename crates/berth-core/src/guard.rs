use berth_runtime::{InstanceStorage, StorageDriver, StorageError, VolumeRef};
use std::sync::Arc;
use tracing::{debug, warn};

/// Keeps a volume started for as long as it lives.
///
/// Only a guard whose `start` call actually mounted the volume stops it
/// again; a volume that was already up is left as found.
pub struct StorageGuard {
    driver: Arc<dyn StorageDriver>,
    volume: VolumeRef,
    owned: bool,
}

impl StorageGuard {
    pub fn start(
        driver: Arc<dyn StorageDriver>,
        inst: &dyn InstanceStorage,
    ) -> Result<Self, StorageError> {
        let owned = driver.start(inst)?;
        if owned {
            debug!("started volume '{}' on '{}'", inst.name(), inst.pool());
        }
        Ok(Self {
            driver,
            volume: VolumeRef::new(inst.name(), inst.pool()),
            owned,
        })
    }

    /// Whether dropping this guard will stop the volume.
    pub fn owns(&self) -> bool {
        self.owned
    }
}

impl Drop for StorageGuard {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        match self.driver.stop(&self.volume) {
            Ok(_) => debug!("stopped volume '{}'", self.volume.name),
            Err(e) => warn!("failed to stop volume '{}': {e}", self.volume.name),
        }
    }
}
