use crate::arch::Architecture;
use crate::device::Devices;
use crate::name::split_snapshot_name;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    #[default]
    Container,
    Snapshot,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Container => write!(f, "container"),
            ContainerKind::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Request to register a container or snapshot in the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerArgs {
    pub name: String,
    #[serde(default)]
    pub kind: ContainerKind,
    #[serde(default)]
    pub architecture: Option<Architecture>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub devices: Devices,
    /// `None` means the `default` profile.
    #[serde(default)]
    pub profiles: Option<Vec<String>>,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub stateful: bool,
    #[serde(default)]
    pub base_image: Option<String>,
    #[serde(default)]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used_date: Option<DateTime<Utc>>,
}

impl ContainerArgs {
    pub fn container(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn snapshot(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ContainerKind::Snapshot,
            ..Self::default()
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.kind == ContainerKind::Snapshot
    }
}

/// A container or snapshot as stored in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: i64,
    pub name: String,
    pub kind: ContainerKind,
    pub architecture: Architecture,
    #[serde(default)]
    pub description: String,
    pub config: BTreeMap<String, String>,
    pub devices: Devices,
    pub profiles: Vec<String>,
    pub ephemeral: bool,
    pub stateful: bool,
    pub creation_date: DateTime<Utc>,
    pub last_used_date: DateTime<Utc>,
}

impl ContainerRecord {
    pub fn is_snapshot(&self) -> bool {
        self.kind == ContainerKind::Snapshot
    }

    /// Parent container name for snapshots, own name otherwise.
    pub fn parent_name(&self) -> &str {
        split_snapshot_name(&self.name).0
    }

    /// Rebuild creation arguments from this record, e.g. to clone it under a
    /// new name.
    pub fn to_args(&self) -> ContainerArgs {
        ContainerArgs {
            name: self.name.clone(),
            kind: self.kind,
            architecture: Some(self.architecture),
            description: self.description.clone(),
            config: self.config.clone(),
            devices: self.devices.clone(),
            profiles: Some(self.profiles.clone()),
            ephemeral: self.ephemeral,
            stateful: self.stateful,
            base_image: None,
            creation_date: Some(self.creation_date),
            last_used_date: Some(self.last_used_date),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_deserialize_with_defaults() {
        let args: ContainerArgs = serde_json::from_str(r#"{"name": "web"}"#).unwrap();
        assert_eq!(args.name, "web");
        assert_eq!(args.kind, ContainerKind::Container);
        assert!(args.profiles.is_none());
        assert!(args.config.is_empty());
    }

    #[test]
    fn snapshot_constructor_sets_kind() {
        let args = ContainerArgs::snapshot("web/snap0");
        assert!(args.is_snapshot());
    }

    #[test]
    fn record_parent_name() {
        let now = Utc::now();
        let rec = ContainerRecord {
            id: 7,
            name: "web/snap0".to_owned(),
            kind: ContainerKind::Snapshot,
            architecture: Architecture::X86_64,
            description: String::new(),
            config: BTreeMap::new(),
            devices: Devices::new(),
            profiles: vec!["default".to_owned()],
            ephemeral: false,
            stateful: true,
            creation_date: now,
            last_used_date: now,
        };
        assert_eq!(rec.parent_name(), "web");
        let args = rec.to_args();
        assert_eq!(args.profiles.as_deref(), Some(&["default".to_owned()][..]));
        assert!(args.stateful);
    }

    #[test]
    fn kind_display() {
        assert_eq!(ContainerKind::Container.to_string(), "container");
        assert_eq!(ContainerKind::Snapshot.to_string(), "snapshot");
    }
}
