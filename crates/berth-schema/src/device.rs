use crate::SchemaError;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A single device definition: `type` plus type-specific keys.
pub type DeviceConfig = BTreeMap<String, String>;

/// Device name to definition.
pub type Devices = BTreeMap<String, DeviceConfig>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Disk,
    Gpu,
    Infiniband,
    Nic,
    None,
    Proxy,
    UnixBlock,
    UnixChar,
    Usb,
}

impl DeviceType {
    pub const ALL: [DeviceType; 9] = [
        DeviceType::Disk,
        DeviceType::Gpu,
        DeviceType::Infiniband,
        DeviceType::Nic,
        DeviceType::None,
        DeviceType::Proxy,
        DeviceType::UnixBlock,
        DeviceType::UnixChar,
        DeviceType::Usb,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Disk => "disk",
            DeviceType::Gpu => "gpu",
            DeviceType::Infiniband => "infiniband",
            DeviceType::Nic => "nic",
            DeviceType::None => "none",
            DeviceType::Proxy => "proxy",
            DeviceType::UnixBlock => "unix-block",
            DeviceType::UnixChar => "unix-char",
            DeviceType::Usb => "usb",
        }
    }

    /// Keys accepted on a device of this type, besides `type`.
    pub fn allowed_keys(self) -> &'static [&'static str] {
        match self {
            DeviceType::UnixChar | DeviceType::UnixBlock => &[
                "gid", "major", "minor", "mode", "source", "path", "required", "uid",
            ],
            DeviceType::Nic => &[
                "limits.max",
                "limits.ingress",
                "limits.egress",
                "host_name",
                "hwaddr",
                "mtu",
                "name",
                "nictype",
                "parent",
                "vlan",
                "ipv4.address",
                "ipv6.address",
                "security.mac_filtering",
                "maas.subnet.ipv4",
                "maas.subnet.ipv6",
            ],
            DeviceType::Disk => &[
                "limits.max",
                "limits.read",
                "limits.write",
                "optional",
                "path",
                "readonly",
                "size",
                "source",
                "recursive",
                "pool",
                "propagation",
            ],
            DeviceType::Usb => &["vendorid", "productid", "mode", "gid", "uid", "required"],
            DeviceType::Gpu => &["vendorid", "productid", "id", "pci", "mode", "gid", "uid"],
            DeviceType::Infiniband => &["hwaddr", "mtu", "name", "nictype", "parent"],
            DeviceType::Proxy => &["bind", "connect", "gid", "listen", "mode", "uid"],
            DeviceType::None => &[],
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SchemaError::UnknownDeviceType(s.to_owned()))
    }
}

/// Whether `key` may appear on a device of type `kind`.
pub fn valid_device_key(kind: DeviceType, key: &str) -> bool {
    key == "type" || kind.allowed_keys().contains(&key)
}

/// A root disk is a `disk` mounted at `/` without a host source.
pub fn is_root_disk(device: &DeviceConfig) -> bool {
    device.get("type").map(String::as_str) == Some("disk")
        && device.get("path").map(String::as_str) == Some("/")
        && !device.get("source").is_some_and(|s| !s.is_empty())
}

/// Find the single root disk in a device set.
pub fn root_disk_device(devices: &Devices) -> Result<(&str, &DeviceConfig), SchemaError> {
    let mut found: Option<(&str, &DeviceConfig)> = None;
    for (name, device) in devices {
        if is_root_disk(device) {
            if found.is_some() {
                return Err(SchemaError::MultipleRootDevices);
            }
            found = Some((name.as_str(), device));
        }
    }
    found.ok_or(SchemaError::NoRootDevice)
}
