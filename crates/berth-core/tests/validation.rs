use berth_core::{validate_devices, ValidationError};
use berth_runtime::{DeviceNodeKind, HostCapabilities, MockProbe};
use berth_schema::{Architecture, Devices, NodeAddress};
use berth_store::{Catalog, DiskCatalog, StoreLayout};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn catalog() -> (TempDir, DiskCatalog) {
    let dir = tempfile::tempdir().unwrap();
    let catalog = DiskCatalog::open(
        StoreLayout::new(dir.path()),
        NodeAddress::new("127.0.0.1:8443"),
    )
    .unwrap();
    catalog
        .put_storage_pool("default", "dir", &BTreeMap::new())
        .unwrap();
    (dir, catalog)
}

fn host(runtime_version: &str) -> HostCapabilities {
    HostCapabilities {
        architectures: vec![Architecture::X86_64],
        idmap_available: true,
        runtime_version: runtime_version.to_owned(),
        unprivileged_only: false,
    }
}

fn devices(entries: &[(&str, &[(&str, &str)])]) -> Devices {
    entries
        .iter()
        .map(|(name, kv)| {
            let device = kv
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect();
            ((*name).to_owned(), device)
        })
        .collect()
}

fn check(devs: &Devices, expanded: bool) -> Result<(), ValidationError> {
    check_with(&MockProbe::new(), "4.0", devs, expanded)
}

fn check_with(
    probe: &MockProbe,
    runtime_version: &str,
    devs: &Devices,
    expanded: bool,
) -> Result<(), ValidationError> {
    let (_dir, catalog) = catalog();
    validate_devices(&catalog, probe, &host(runtime_version), devs, false, expanded)
}

fn message(result: Result<(), ValidationError>) -> String {
    result.unwrap_err().to_string()
}

#[test]
fn unknown_key_rejected_under_every_type() {
    for kind in [
        "nic",
        "infiniband",
        "disk",
        "unix-char",
        "unix-block",
        "usb",
        "gpu",
        "proxy",
        "none",
    ] {
        let devs = devices(&[("dev0", &[("type", kind), ("bogus", "1")])]);
        assert_eq!(
            message(check(&devs, false)),
            format!("Invalid device configuration key for {kind}: bogus"),
            "type {kind}"
        );
    }
}

#[test]
fn missing_and_unknown_types() {
    let devs = devices(&[("dev0", &[("path", "/x")])]);
    assert_eq!(
        message(check(&devs, false)),
        "Missing device type for device 'dev0'"
    );
    let devs = devices(&[("dev0", &[("type", "floppy")])]);
    assert_eq!(
        message(check(&devs, false)),
        "Invalid device type for device 'dev0'"
    );
}

#[test]
fn disk_needs_source_unless_root() {
    let devs = devices(&[("data", &[("type", "disk"), ("path", "/data")])]);
    assert_eq!(
        message(check(&devs, false)),
        "Disk entry is missing the required \"source\" property."
    );

    let devs = devices(&[(
        "data",
        &[("type", "disk"), ("path", "/data"), ("source", "/mnt/x")],
    )]);
    assert!(check(&devs, false).is_ok());
}

#[test]
fn root_disk_with_source_rejected() {
    let devs = devices(&[(
        "root",
        &[("type", "disk"), ("path", "/"), ("source", "/srv/rootfs")],
    )]);
    assert_eq!(
        message(check(&devs, false)),
        "Root disk entry may not have a \"source\" property set."
    );
}

#[test]
fn duplicate_disk_paths_rejected_locally() {
    let devs = devices(&[
        ("a", &[("type", "disk"), ("path", "/data"), ("source", "/srv/a")]),
        ("b", &[("type", "disk"), ("path", "/data"), ("source", "/srv/b")]),
    ]);
    assert!(message(check(&devs, false)).contains("same path"));
}

#[test]
fn disk_pool_must_exist_and_volume_be_relative() {
    let devs = devices(&[("root", &[("type", "disk"), ("path", "/"), ("pool", "fast")])]);
    assert_eq!(
        message(check(&devs, false)),
        "The \"fast\" storage pool doesn't exist."
    );

    let devs = devices(&[(
        "data",
        &[
            ("type", "disk"),
            ("path", "/data"),
            ("pool", "default"),
            ("source", "/abs"),
        ],
    )]);
    assert_eq!(
        message(check(&devs, false)),
        "Storage volumes cannot be specified as absolute paths."
    );
}

#[test]
fn size_only_on_root_disk() {
    let devs = devices(&[(
        "data",
        &[
            ("type", "disk"),
            ("path", "/data"),
            ("source", "/srv"),
            ("size", "1GB"),
        ],
    )]);
    assert!(check(&devs, false).is_err());
}

#[test]
fn recursive_needs_a_bind_mounted_directory() {
    let devs = devices(&[(
        "data",
        &[
            ("type", "disk"),
            ("path", "/data"),
            ("source", "/srv/data"),
            ("recursive", "true"),
        ],
    )]);
    assert!(check(&devs, false).is_err());
    let probe = MockProbe::new().with_dir("/srv/data");
    assert!(check_with(&probe, "4.0", &devs, false).is_ok());
}

#[test]
fn propagation_needs_runtime_3() {
    let devs = devices(&[(
        "data",
        &[
            ("type", "disk"),
            ("path", "/data"),
            ("source", "/srv"),
            ("propagation", "rshared"),
        ],
    )]);
    let probe = MockProbe::new();
    assert!(check_with(&probe, "2.1", &devs, false).is_err());
    assert!(check_with(&probe, "3.0", &devs, false).is_ok());

    let mut bad = devs.clone();
    bad.get_mut("data")
        .unwrap()
        .insert("propagation".to_owned(), "sideways".to_owned());
    assert!(check_with(&probe, "3.0", &bad, false).is_err());
}

#[test]
fn expanded_set_needs_exactly_one_root_disk() {
    let devs = devices(&[(
        "data",
        &[("type", "disk"), ("path", "/data"), ("source", "/srv")],
    )]);
    assert!(check(&devs, false).is_ok());
    assert_eq!(
        message(check(&devs, true)),
        "No root device could be found."
    );

    let devs = devices(&[("root", &[("type", "disk"), ("path", "/"), ("pool", "default")])]);
    assert!(check(&devs, true).is_ok());
}

#[test]
fn nic_rules() {
    let devs = devices(&[("eth0", &[("type", "nic")])]);
    assert_eq!(message(check(&devs, false)), "Missing nic type");
    let devs = devices(&[("eth0", &[("type", "nic"), ("nictype", "bridged")])]);
    assert_eq!(
        message(check(&devs, false)),
        "Missing parent for bridged type nic"
    );
    let devs = devices(&[("eth0", &[("type", "nic"), ("nictype", "p2p")])]);
    assert!(check(&devs, false).is_ok());
    let devs = devices(&[("ib0", &[("type", "infiniband"), ("nictype", "bridged")])]);
    assert_eq!(message(check(&devs, false)), "Bad nic type: bridged");
}

#[test]
fn unix_devices_are_probed() {
    let probe = MockProbe::new()
        .with_device("/dev/kvm", DeviceNodeKind::Char, 10, 232)
        .with_device("/dev/sda", DeviceNodeKind::Block, 8, 0);
    let (_dir, catalog) = catalog();
    let host = host("4.0");
    let run = |devs: &Devices| validate_devices(&catalog, &probe, &host, devs, false, false);

    assert!(run(&devices(&[("kvm", &[("type", "unix-char"), ("path", "/dev/kvm")])])).is_ok());
    assert_eq!(
        run(&devices(&[("sda", &[("type", "unix-char"), ("path", "/dev/sda")])]))
            .unwrap_err()
            .to_string(),
        "Path specified for unix-char device is a block device."
    );
    assert!(run(&devices(&[("x", &[("type", "unix-block"), ("path", "/dev/missing")])])).is_err());
    assert!(run(&devices(&[(
        "x",
        &[("type", "unix-block"), ("path", "/dev/missing"), ("required", "false")]
    )]))
    .is_ok());
    assert!(run(&devices(&[(
        "x",
        &[
            ("type", "unix-block"),
            ("path", "/dev/missing"),
            ("major", "8"),
            ("minor", "1")
        ]
    )]))
    .is_ok());
}

#[test]
fn gpu_and_usb_rules() {
    let probe = MockProbe::new().with_pci("0000:01:00.0");
    let gpu = devices(&[("gpu", &[("type", "gpu"), ("pci", "0000:01:00.0")])]);
    assert!(check_with(&probe, "4.0", &gpu, false).is_ok());

    let gpu = devices(&[(
        "gpu",
        &[("type", "gpu"), ("pci", "0000:01:00.0"), ("vendorid", "10de")],
    )]);
    assert!(check_with(&probe, "4.0", &gpu, false).is_err());
    let gpu = devices(&[("gpu", &[("type", "gpu"), ("pci", "0000:02:00.0")])]);
    assert!(check_with(&probe, "4.0", &gpu, false).is_err());

    let usb = devices(&[("usb", &[("type", "usb")])]);
    assert_eq!(
        message(check(&usb, false)),
        "Missing vendorid for USB device."
    );
}

#[test]
fn proxy_owner_only_on_unix_sockets() {
    let ok = devices(&[(
        "p",
        &[
            ("type", "proxy"),
            ("listen", "unix:/run/app.sock"),
            ("connect", "tcp:127.0.0.1:80"),
            ("uid", "1000"),
        ],
    )]);
    assert!(check(&ok, false).is_ok());

    let bad = devices(&[(
        "p",
        &[
            ("type", "proxy"),
            ("listen", "tcp:0.0.0.0:80"),
            ("connect", "tcp:127.0.0.1:80"),
            ("mode", "0600"),
        ],
    )]);
    assert!(check(&bad, false).is_err());

    let missing = devices(&[("p", &[("type", "proxy"), ("listen", "tcp:0.0.0.0:80")])]);
    assert!(message(check(&missing, false)).contains("\"connect\""));
}
