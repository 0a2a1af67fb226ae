use berth_schema::{Architecture, ContainerRecord, Devices};
use std::collections::BTreeMap;

/// What every driver needs: the volume's name and whether it is a snapshot.
pub trait InstanceIdentity {
    fn name(&self) -> &str;
    fn is_snapshot(&self) -> bool;
}

/// Read access to a container's configuration, local and profile-expanded.
pub trait InstanceConfig: InstanceIdentity {
    fn id(&self) -> i64;
    fn architecture(&self) -> Architecture;
    fn local_config(&self) -> &BTreeMap<String, String>;
    fn local_devices(&self) -> &Devices;
    fn expanded_config(&self) -> &BTreeMap<String, String>;
    fn expanded_devices(&self) -> &Devices;
    fn profiles(&self) -> &[String];
    fn is_ephemeral(&self) -> bool;
    fn is_stateful(&self) -> bool;
}

/// Storage placement of an instance.
pub trait InstanceStorage: InstanceIdentity {
    fn pool(&self) -> &str;
}

/// A loaded container or snapshot: its catalog record plus the config and
/// devices after profile expansion, and the pool its root disk lives on.
#[derive(Debug, Clone)]
pub struct Instance {
    record: ContainerRecord,
    expanded_config: BTreeMap<String, String>,
    expanded_devices: Devices,
    pool: String,
}

impl Instance {
    pub fn new(
        record: ContainerRecord,
        expanded_config: BTreeMap<String, String>,
        expanded_devices: Devices,
        pool: impl Into<String>,
    ) -> Self {
        Self {
            record,
            expanded_config,
            expanded_devices,
            pool: pool.into(),
        }
    }

    pub fn record(&self) -> &ContainerRecord {
        &self.record
    }
}

impl InstanceIdentity for Instance {
    fn name(&self) -> &str {
        &self.record.name
    }

    fn is_snapshot(&self) -> bool {
        self.record.is_snapshot()
    }
}

impl InstanceConfig for Instance {
    fn id(&self) -> i64 {
        self.record.id
    }

    fn architecture(&self) -> Architecture {
        self.record.architecture
    }

    fn local_config(&self) -> &BTreeMap<String, String> {
        &self.record.config
    }

    fn local_devices(&self) -> &Devices {
        &self.record.devices
    }

    fn expanded_config(&self) -> &BTreeMap<String, String> {
        &self.expanded_config
    }

    fn expanded_devices(&self) -> &Devices {
        &self.expanded_devices
    }

    fn profiles(&self) -> &[String] {
        &self.record.profiles
    }

    fn is_ephemeral(&self) -> bool {
        self.record.ephemeral
    }

    fn is_stateful(&self) -> bool {
        self.record.stateful
    }
}

impl InstanceStorage for Instance {
    fn pool(&self) -> &str {
        &self.pool
    }
}

/// A bare volume reference, for cleanup paths that no longer have a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRef {
    pub name: String,
    pub pool: String,
}

impl VolumeRef {
    pub fn new(name: impl Into<String>, pool: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pool: pool.into(),
        }
    }
}

impl InstanceIdentity for VolumeRef {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_snapshot(&self) -> bool {
        berth_schema::is_snapshot_name(&self.name)
    }
}

impl InstanceStorage for VolumeRef {
    fn pool(&self) -> &str {
        &self.pool
    }
}
