use berth_schema::Architecture;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

/// What the host can run, read once at startup and handed to the validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostCapabilities {
    /// Supported personalities, native first.
    pub architectures: Vec<Architecture>,
    /// A subordinate uid/gid range is allocated for unprivileged containers.
    pub idmap_available: bool,
    /// Version of the container runtime library, `major.minor[.patch]`.
    pub runtime_version: String,
    /// Refuse privileged containers and idmaps that expose host root.
    pub unprivileged_only: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self::detect()
    }
}

impl HostCapabilities {
    pub fn detect() -> Self {
        let architectures = Architecture::host()
            .map(|native| {
                let mut all = vec![native];
                all.extend_from_slice(native.personalities());
                all
            })
            .unwrap_or_default();
        Self {
            architectures,
            idmap_available: subordinate_ids_configured(),
            runtime_version: "4.0".to_owned(),
            unprivileged_only: false,
        }
    }

    pub fn supports(&self, arch: Architecture) -> bool {
        self.architectures.contains(&arch)
    }

    /// First (native) architecture, used when a container names none.
    pub fn default_architecture(&self) -> Option<Architecture> {
        self.architectures.first().copied()
    }

    pub fn runtime_at_least(&self, major: u32, minor: u32) -> bool {
        let mut parts = self
            .runtime_version
            .split('.')
            .map(|p| p.trim().parse::<u32>().unwrap_or(0));
        let have_major = parts.next().unwrap_or(0);
        let have_minor = parts.next().unwrap_or(0);
        (have_major, have_minor) >= (major, minor)
    }
}

fn subordinate_ids_configured() -> bool {
    ["/etc/subuid", "/etc/subgid"]
        .iter()
        .all(|p| std::fs::metadata(p).is_ok_and(|m| m.len() > 0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceNodeKind {
    Char,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNode {
    pub kind: DeviceNodeKind,
    pub major: u32,
    pub minor: u32,
}

/// Host filesystem lookups the device validator performs.
pub trait DeviceProbe: Send + Sync {
    fn path_exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// `Ok(None)` when the path exists but is not a device node.
    fn device_node(&self, path: &Path) -> std::io::Result<Option<DeviceNode>>;

    fn pci_device_exists(&self, address: &str) -> bool;
}

/// Probe backed by the real host filesystem.
#[derive(Debug, Default)]
pub struct HostProbe;

impl DeviceProbe for HostProbe {
    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn device_node(&self, path: &Path) -> std::io::Result<Option<DeviceNode>> {
        let meta = std::fs::metadata(path)?;
        let ft = meta.file_type();
        let kind = if ft.is_char_device() {
            DeviceNodeKind::Char
        } else if ft.is_block_device() {
            DeviceNodeKind::Block
        } else {
            return Ok(None);
        };
        let rdev = meta.rdev() as libc::dev_t;
        Ok(Some(DeviceNode {
            kind,
            major: libc::major(rdev),
            minor: libc::minor(rdev),
        }))
    }

    fn pci_device_exists(&self, address: &str) -> bool {
        Path::new("/sys/bus/pci/devices").join(address).exists()
    }
}
