use crate::ValidationError;
use berth_runtime::{DeviceNodeKind, DeviceProbe, HostCapabilities};
use berth_schema::{
    is_true, root_disk_device, valid_device_key, DeviceConfig, DeviceType, Devices,
};
use berth_store::Catalog;
use std::collections::BTreeSet;
use std::path::Path;

const NIC_TYPES: [&str; 5] = ["bridged", "macvlan", "p2p", "physical", "sriov"];
const INFINIBAND_NIC_TYPES: [&str; 2] = ["physical", "sriov"];
const PROPAGATION_MODES: [&str; 8] = [
    "private",
    "shared",
    "slave",
    "unbindable",
    "rprivate",
    "rshared",
    "rslave",
    "runbindable",
];

fn invalid(msg: impl Into<String>) -> ValidationError {
    ValidationError::InvalidDevice(msg.into())
}

/// Non-empty value of `key`, treating absent and `""` alike.
fn value<'a>(device: &'a DeviceConfig, key: &str) -> Option<&'a str> {
    device
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Check a device map. Pools named by disks are looked up in `catalog`,
/// host paths through `probe`.
pub fn validate_devices(
    catalog: &dyn Catalog,
    probe: &dyn DeviceProbe,
    host: &HostCapabilities,
    devices: &Devices,
    _is_profile: bool,
    is_expanded: bool,
) -> Result<(), ValidationError> {
    let mut disk_paths: BTreeSet<&str> = BTreeSet::new();

    for (name, device) in devices {
        let Some(type_name) = value(device, "type") else {
            return Err(invalid(format!("Missing device type for device '{name}'")));
        };
        let kind: DeviceType = type_name
            .parse()
            .map_err(|_| invalid(format!("Invalid device type for device '{name}'")))?;

        for key in device.keys() {
            if !valid_device_key(kind, key) {
                return Err(invalid(format!(
                    "Invalid device configuration key for {type_name}: {key}"
                )));
            }
        }

        match kind {
            DeviceType::Nic => validate_nic(device)?,
            DeviceType::Infiniband => validate_infiniband(device)?,
            DeviceType::Disk => {
                if !is_expanded {
                    let path = device.get("path").map_or("", String::as_str);
                    if !disk_paths.insert(path) {
                        return Err(invalid(format!(
                            "More than one disk device uses the same path: {path}."
                        )));
                    }
                }
                validate_disk(catalog, probe, host, device)?;
            }
            DeviceType::UnixChar | DeviceType::UnixBlock => {
                validate_unix(probe, kind, device)?;
            }
            DeviceType::Usb => {
                if value(device, "vendorid").is_none() {
                    return Err(invalid("Missing vendorid for USB device."));
                }
            }
            DeviceType::Gpu => validate_gpu(probe, device)?,
            DeviceType::Proxy => validate_proxy(device)?,
            DeviceType::None => {}
        }
    }

    if is_expanded {
        root_disk_device(devices)?;
    }

    Ok(())
}

fn validate_nic(device: &DeviceConfig) -> Result<(), ValidationError> {
    let Some(nictype) = value(device, "nictype") else {
        return Err(invalid("Missing nic type"));
    };
    if !NIC_TYPES.contains(&nictype) {
        return Err(invalid(format!("Bad nic type: {nictype}")));
    }
    if nictype != "p2p" && value(device, "parent").is_none() {
        return Err(invalid(format!("Missing parent for {nictype} type nic")));
    }
    Ok(())
}

fn validate_infiniband(device: &DeviceConfig) -> Result<(), ValidationError> {
    let Some(nictype) = value(device, "nictype") else {
        return Err(invalid("Missing nic type"));
    };
    if !INFINIBAND_NIC_TYPES.contains(&nictype) {
        return Err(invalid(format!("Bad nic type: {nictype}")));
    }
    if value(device, "parent").is_none() {
        return Err(invalid(format!("Missing parent for {nictype} type nic")));
    }
    Ok(())
}

fn validate_disk(
    catalog: &dyn Catalog,
    probe: &dyn DeviceProbe,
    host: &HostCapabilities,
    device: &DeviceConfig,
) -> Result<(), ValidationError> {
    let Some(path) = value(device, "path") else {
        return Err(invalid(
            "Disk entry is missing the required \"path\" property.",
        ));
    };
    let source = value(device, "source");
    let is_root = path == "/";

    if source.is_none() && !is_root {
        return Err(invalid(
            "Disk entry is missing the required \"source\" property.",
        ));
    }
    if is_root && source.is_some() {
        return Err(invalid(
            "Root disk entry may not have a \"source\" property set.",
        ));
    }
    if value(device, "size").is_some() && !is_root {
        return Err(invalid("Only the root disk may have a size quota."));
    }
    if value(device, "recursive").is_some()
        && (is_root || !source.is_some_and(|s| probe.is_dir(Path::new(s))))
    {
        return Err(invalid(
            "The recursive option is only supported for additional bind-mounted paths.",
        ));
    }

    if let Some(pool) = value(device, "pool") {
        if source.is_some_and(|s| Path::new(s).is_absolute()) {
            return Err(invalid(
                "Storage volumes cannot be specified as absolute paths.",
            ));
        }
        if catalog.storage_pool_id(pool).is_err() {
            return Err(invalid(format!(
                "The \"{pool}\" storage pool doesn't exist."
            )));
        }
    }

    if let Some(mode) = value(device, "propagation") {
        if !host.runtime_at_least(3, 0) {
            return Err(invalid(
                "runtime 3.0 is required for mount propagation configuration",
            ));
        }
        if !PROPAGATION_MODES.contains(&mode) {
            return Err(invalid(format!("Invalid propagation mode '{mode}'")));
        }
    }
    Ok(())
}

fn validate_unix(
    probe: &dyn DeviceProbe,
    kind: DeviceType,
    device: &DeviceConfig,
) -> Result<(), ValidationError> {
    let source = value(device, "source");
    let path = value(device, "path");
    let Some(host_path) = source.or(path) else {
        return Err(invalid(
            "Unix device entry is missing the required \"source\" or \"path\" property.",
        ));
    };

    // `required` defaults to true.
    let required = !value(device, "required").is_some_and(|v| !is_true(v));
    let numbers_given = value(device, "major").is_some() && value(device, "minor").is_some();
    if !required || numbers_given {
        return Ok(());
    }

    let host_path = Path::new(host_path);
    if !probe.path_exists(host_path) {
        return Err(invalid(
            "The device path doesn't exist on the host and major/minor wasn't specified.",
        ));
    }
    let node = probe
        .device_node(host_path)
        .map_err(|e| invalid(format!("Failed to inspect {}: {e}", host_path.display())))?
        .ok_or_else(|| invalid(format!("{} is not a device node", host_path.display())))?;

    match (kind, node.kind) {
        (DeviceType::UnixChar, DeviceNodeKind::Block) => Err(invalid(
            "Path specified for unix-char device is a block device.",
        )),
        (DeviceType::UnixBlock, DeviceNodeKind::Char) => Err(invalid(
            "Path specified for unix-block device is a character device.",
        )),
        _ => Ok(()),
    }
}

fn validate_gpu(probe: &dyn DeviceProbe, device: &DeviceConfig) -> Result<(), ValidationError> {
    let pci = value(device, "pci");
    let id = value(device, "id");
    let productid = value(device, "productid");
    let vendorid = value(device, "vendorid");

    if let Some(address) = pci {
        if !probe.pci_device_exists(address) {
            return Err(invalid(format!(
                "Invalid PCI address (no device found): {address}"
            )));
        }
        if id.is_some() || productid.is_some() || vendorid.is_some() {
            return Err(invalid(
                "Cannot use id, productid or vendorid when pci is set",
            ));
        }
    }
    if id.is_some() && (pci.is_some() || productid.is_some() || vendorid.is_some()) {
        return Err(invalid(
            "Cannot use pci, productid or vendorid when id is set",
        ));
    }
    Ok(())
}

fn validate_proxy(device: &DeviceConfig) -> Result<(), ValidationError> {
    let Some(listen) = value(device, "listen") else {
        return Err(invalid(
            "Proxy device entry is missing the required \"listen\" property.",
        ));
    };
    if value(device, "connect").is_none() {
        return Err(invalid(
            "Proxy device entry is missing the required \"connect\" property.",
        ));
    }
    let unix_socket = listen.starts_with("unix:") && !listen.starts_with("unix:@");
    let has_owner = ["uid", "gid", "mode"]
        .iter()
        .any(|k| value(device, k).is_some());
    if !unix_socket && has_owner {
        return Err(invalid(
            "Only proxy devices for non-abstract unix sockets can carry uid, gid, or mode properties",
        ));
    }
    Ok(())
}
