use crate::ValidationError;
use berth_runtime::HostCapabilities;
use berth_schema::{config_key_checker, is_true, parse_raw_idmap, Architecture};
use std::collections::BTreeMap;

/// Architectures with a 32-bit compat syscall table to filter.
const COMPAT_ARCHITECTURES: [Architecture; 3] = [
    Architecture::X86_64,
    Architecture::Aarch64,
    Architecture::Ppc64,
];

const FORBIDDEN_LXC_KEYS: [&str; 5] = [
    "lxc.logfile",
    "lxc.log.file",
    "lxc.syslog",
    "lxc.log.syslog",
    "lxc.ephemeral",
];

/// Check a container or profile config map.
///
/// `is_profile` forbids the container-only namespaces; `is_expanded` marks a
/// map that already has every profile merged in and so must describe a
/// container this host can run.
pub fn validate_config(
    host: &HostCapabilities,
    config: &BTreeMap<String, String>,
    is_profile: bool,
    is_expanded: bool,
) -> Result<(), ValidationError> {
    for (key, value) in config {
        if is_profile && key.starts_with("volatile.") {
            return Err(ValidationError::ScopeViolation(
                "Volatile keys can only be set on containers.".to_owned(),
            ));
        }
        if is_profile && key.starts_with("image.") {
            return Err(ValidationError::ScopeViolation(
                "Image keys can only be set on containers.".to_owned(),
            ));
        }
        validate_key(host, key, value)?;
    }

    let raw_seccomp = config.contains_key("raw.seccomp");
    let whitelist = config.contains_key("security.syscalls.whitelist");
    let blacklist = config.contains_key("security.syscalls.blacklist");
    let blacklist_default = flag(config, "security.syscalls.blacklist_default");
    let blacklist_compat = flag(config, "security.syscalls.blacklist_compat");

    if raw_seccomp && config.keys().any(|k| k.starts_with("security.syscalls.")) {
        return Err(ValidationError::UnsupportedConfiguration(
            "raw.seccomp is mutually exclusive with security.syscalls*".to_owned(),
        ));
    }
    if whitelist && (blacklist || blacklist_default || blacklist_compat) {
        return Err(ValidationError::UnsupportedConfiguration(
            "security.syscalls.whitelist is mutually exclusive with security.syscalls.blacklist*"
                .to_owned(),
        ));
    }

    let privileged = flag(config, "security.privileged");
    if is_expanded && !privileged && !host.idmap_available {
        return Err(ValidationError::UnsupportedConfiguration(
            "berth doesn't have a uid/gid allocation. In this mode, only privileged containers are supported."
                .to_owned(),
        ));
    }

    if host.unprivileged_only {
        if let Some(raw) = config.get("raw.idmap").filter(|v| !v.is_empty()) {
            let entries = parse_raw_idmap(raw)?;
            if entries.iter().any(|e| e.host_id == 0) {
                return Err(ValidationError::UnsupportedConfiguration(
                    "Cannot map root user into container as berth was configured to only allow unprivileged containers"
                        .to_owned(),
                ));
            }
        }
        if privileged {
            return Err(ValidationError::UnsupportedConfiguration(
                "berth was configured to only allow unprivileged containers".to_owned(),
            ));
        }
    }

    Ok(())
}

fn flag(config: &BTreeMap<String, String>, key: &str) -> bool {
    config.get(key).is_some_and(|v| is_true(v))
}

fn validate_key(host: &HostCapabilities, key: &str, value: &str) -> Result<(), ValidationError> {
    let checker = config_key_checker(key)?;
    checker(value).map_err(|reason| ValidationError::InvalidValue {
        key: key.to_owned(),
        reason,
    })?;

    match key {
        "raw.lxc" => validate_raw_lxc(host, value),
        "security.syscalls.blacklist_compat" => {
            if COMPAT_ARCHITECTURES.iter().any(|a| host.supports(*a)) {
                Ok(())
            } else {
                Err(ValidationError::UnsupportedConfiguration(
                    "security.syscalls.blacklist_compat isn't supported on this architecture"
                        .to_owned(),
                ))
            }
        }
        _ => Ok(()),
    }
}

/// `raw.lxc` is passed through to the runtime, so it may not touch logging,
/// ephemerality, resource limits, or anything but per-interface addresses.
fn validate_raw_lxc(host: &HostCapabilities, value: &str) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidValue {
        key: "raw.lxc".to_owned(),
        reason,
    };
    let net_prefix = if host.runtime_at_least(2, 1) {
        "lxc.net."
    } else {
        "lxc.network."
    };

    for line in value.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, _)) = line.split_once('=') else {
            return Err(invalid(format!("invalid line '{line}'")));
        };
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(invalid(format!("invalid line '{line}'")));
        }

        if FORBIDDEN_LXC_KEYS.contains(&key.as_str()) || key.starts_with("lxc.prlimit.") {
            return Err(invalid(format!("setting {key} is not allowed")));
        }

        if let Some(rest) = key.strip_prefix(net_prefix) {
            if !is_interface_address_key(rest) {
                return Err(invalid(format!(
                    "only interface-specific ipv4/ipv6 {net_prefix} keys are allowed"
                )));
            }
        }
    }
    Ok(())
}

/// `<index>.ipv4.address`, `<index>.ipv6.gateway` and friends.
fn is_interface_address_key(rest: &str) -> bool {
    let Some((index, field)) = rest.split_once('.') else {
        return false;
    };
    !index.is_empty()
        && index.bytes().all(|b| b.is_ascii_digit())
        && matches!(
            field,
            "ipv4.address" | "ipv4.gateway" | "ipv6.address" | "ipv6.gateway"
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostCapabilities {
        HostCapabilities {
            architectures: vec![Architecture::X86_64, Architecture::I686],
            idmap_available: true,
            runtime_version: "4.0".to_owned(),
            unprivileged_only: false,
        }
    }

    fn cfg(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn empty_config_is_valid() {
        assert!(validate_config(&host(), &BTreeMap::new(), false, true).is_ok());
    }

    #[test]
    fn unknown_key_rejected() {
        assert!(matches!(
            validate_config(&host(), &cfg(&[("limits.bogus", "1")]), false, false),
            Err(ValidationError::UnknownKey(_))
        ));
    }

    #[test]
    fn bad_value_rejected() {
        assert!(matches!(
            validate_config(&host(), &cfg(&[("boot.autostart", "maybe")]), false, false),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn profiles_may_not_carry_volatile_or_image_keys() {
        for key in ["volatile.base_image", "image.os"] {
            let c = cfg(&[(key, "x")]);
            assert!(matches!(
                validate_config(&host(), &c, true, false),
                Err(ValidationError::ScopeViolation(_))
            ));
            assert!(validate_config(&host(), &c, false, false).is_ok());
        }
    }

    #[test]
    fn raw_seccomp_excludes_every_syscall_key() {
        for key in [
            "security.syscalls.whitelist",
            "security.syscalls.blacklist",
            "security.syscalls.blacklist_default",
            "security.syscalls.blacklist_compat",
        ] {
            let c = cfg(&[("raw.seccomp", "2\nblacklist\n"), (key, "true")]);
            let err = validate_config(&host(), &c, false, false).unwrap_err();
            assert!(
                err.to_string().starts_with("raw.seccomp is mutually exclusive"),
                "{key}: {err}"
            );
        }
    }

    #[test]
    fn raw_seccomp_conflict_ignores_syscall_values() {
        for value in ["false", "0", ""] {
            let c = cfg(&[
                ("raw.seccomp", "2\nblacklist\n"),
                ("security.syscalls.blacklist_default", value),
            ]);
            let err = validate_config(&host(), &c, false, false).unwrap_err();
            assert!(
                err.to_string().starts_with("raw.seccomp is mutually exclusive"),
                "blacklist_default={value:?}: {err}"
            );
        }
        let c = cfg(&[("raw.seccomp", "2\nblacklist\n")]);
        assert!(validate_config(&host(), &c, false, false).is_ok());
    }

    #[test]
    fn whitelist_excludes_blacklist() {
        let c = cfg(&[
            ("security.syscalls.whitelist", "read\nwrite"),
            ("security.syscalls.blacklist_default", "true"),
        ]);
        assert!(validate_config(&host(), &c, false, false).is_err());
        let c = cfg(&[
            ("security.syscalls.whitelist", "read\nwrite"),
            ("security.syscalls.blacklist_default", "false"),
        ]);
        assert!(validate_config(&host(), &c, false, false).is_ok());
    }

    #[test]
    fn blacklist_compat_needs_a_64bit_host() {
        let c = cfg(&[("security.syscalls.blacklist_compat", "true")]);
        assert!(validate_config(&host(), &c, false, false).is_ok());

        let mut arm32 = host();
        arm32.architectures = vec![Architecture::Armv7l];
        assert!(matches!(
            validate_config(&arm32, &c, false, false),
            Err(ValidationError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn expanded_unprivileged_needs_idmap() {
        let mut h = host();
        h.idmap_available = false;
        assert!(matches!(
            validate_config(&h, &BTreeMap::new(), false, true),
            Err(ValidationError::UnsupportedConfiguration(_))
        ));
        // Not expanded yet: profiles may still make it privileged.
        assert!(validate_config(&h, &BTreeMap::new(), false, false).is_ok());
        let privileged = cfg(&[("security.privileged", "true")]);
        assert!(validate_config(&h, &privileged, false, true).is_ok());
    }

    #[test]
    fn unprivileged_only_rejects_root_idmap() {
        let mut h = host();
        h.unprivileged_only = true;

        let root = cfg(&[("raw.idmap", "both 0 1000")]);
        assert!(matches!(
            validate_config(&h, &root, false, false),
            Err(ValidationError::UnsupportedConfiguration(_))
        ));

        let user = cfg(&[("raw.idmap", "both 1000 2000")]);
        assert!(validate_config(&h, &user, false, false).is_ok());

        // Without the policy the root mapping is fine.
        assert!(validate_config(&host(), &root, false, false).is_ok());
    }

    #[test]
    fn unprivileged_only_rejects_privileged() {
        let mut h = host();
        h.unprivileged_only = true;
        let c = cfg(&[("security.privileged", "true")]);
        assert!(validate_config(&h, &c, false, false).is_err());
        let c = cfg(&[("security.privileged", "false")]);
        assert!(validate_config(&h, &c, false, false).is_ok());
    }

    #[test]
    fn malformed_idmap_is_invalid_value() {
        let mut h = host();
        h.unprivileged_only = true;
        let c = cfg(&[("raw.idmap", "both 1000")]);
        assert!(matches!(
            validate_config(&h, &c, false, false),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn raw_lxc_accepts_comments_and_plain_keys() {
        let c = cfg(&[(
            "raw.lxc",
            "# tweak\n\nlxc.apparmor.profile = unconfined\nlxc.net.0.ipv4.address = 10.0.0.2/24\n",
        )]);
        assert!(validate_config(&host(), &c, false, false).is_ok());
    }

    #[test]
    fn raw_lxc_forbidden_keys() {
        for line in [
            "lxc.logfile = /tmp/x",
            "lxc.log.syslog = daemon",
            "lxc.ephemeral = 1",
            "lxc.prlimit.nofile = 1024",
            "lxc.net.0.link = br0",
            "not a config line",
        ] {
            let c = cfg(&[("raw.lxc", line)]);
            assert!(
                validate_config(&host(), &c, false, false).is_err(),
                "{line} should be rejected"
            );
        }
    }

    #[test]
    fn raw_lxc_network_prefix_follows_runtime_version() {
        let mut old = host();
        old.runtime_version = "2.0".to_owned();
        let c = cfg(&[("raw.lxc", "lxc.network.0.ipv4.gateway = 10.0.0.1")]);
        assert!(validate_config(&old, &c, false, false).is_ok());
        let c = cfg(&[("raw.lxc", "lxc.network.0.link = br0")]);
        assert!(validate_config(&old, &c, false, false).is_err());
    }
}
