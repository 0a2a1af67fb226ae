//! Container configuration key table.
//!
//! Every key a container or profile may carry maps to a value checker. Keys
//! outside the table are rejected, except for the free-form namespaces
//! (`user.*`, `environment.*`, `image.*`, `limits.kernel.*`) and the
//! per-device `volatile.<device>.*` keys.

use crate::SchemaError;

/// Checks a config value, returning a human reason on failure.
pub type KeyChecker = fn(&str) -> Result<(), String>;

/// Truthiness as the config layer understands it.
pub fn is_true(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn is_false(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "off"
    )
}

fn check_any(_: &str) -> Result<(), String> {
    Ok(())
}

fn check_bool(value: &str) -> Result<(), String> {
    if value.is_empty() || is_true(value) || is_false(value) {
        Ok(())
    } else {
        Err(format!("invalid boolean '{value}'"))
    }
}

fn check_int(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    value
        .parse::<i64>()
        .map(|_| ())
        .map_err(|_| format!("invalid integer '{value}'"))
}

fn check_uint(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    value
        .parse::<u64>()
        .map(|_| ())
        .map_err(|_| format!("invalid unsigned integer '{value}'"))
}

fn check_priority(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    match value.parse::<u8>() {
        Ok(n) if n <= 10 => Ok(()),
        _ => Err(format!("priority must be between 0 and 10, got '{value}'")),
    }
}

fn check_memory_limit(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    if let Some(pct) = value.strip_suffix('%') {
        return pct
            .parse::<u64>()
            .map(|_| ())
            .map_err(|_| format!("invalid memory percentage '{value}'"));
    }
    crate::parse_byte_size(value)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn check_memory_enforce(value: &str) -> Result<(), String> {
    match value {
        "" | "hard" | "soft" => Ok(()),
        other => Err(format!("must be 'hard' or 'soft', got '{other}'")),
    }
}

fn check_power_state(value: &str) -> Result<(), String> {
    match value {
        "" | "RUNNING" | "STOPPED" | "FROZEN" => Ok(()),
        other => Err(format!("invalid power state '{other}'")),
    }
}

fn check_byte_size(value: &str) -> Result<(), String> {
    crate::parse_byte_size(value)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn static_checker(key: &str) -> Option<KeyChecker> {
    let checker: KeyChecker = match key {
        "boot.autostart" => check_bool,
        "boot.autostart.delay" | "boot.autostart.priority" | "boot.stop.priority" => check_int,
        "boot.host_shutdown_timeout" => check_int,

        "limits.cpu" | "limits.cpu.allowance" => check_any,
        "limits.cpu.priority"
        | "limits.disk.priority"
        | "limits.memory.swap.priority"
        | "limits.network.priority" => check_priority,
        "limits.memory" => check_memory_limit,
        "limits.memory.enforce" => check_memory_enforce,
        "limits.memory.swap" => check_bool,
        "limits.processes" => check_int,

        "linux.kernel_modules" => check_any,

        "migration.incremental.memory" => check_bool,
        "migration.incremental.memory.iterations" | "migration.incremental.memory.goal" => {
            check_uint
        }

        "nvidia.runtime" => check_bool,
        "nvidia.driver.capabilities" | "nvidia.require.cuda" | "nvidia.require.driver" => {
            check_any
        }

        "security.nesting"
        | "security.privileged"
        | "security.devlxd"
        | "security.idmap.isolated"
        | "security.syscalls.blacklist_default"
        | "security.syscalls.blacklist_compat" => check_bool,
        "security.idmap.base" | "security.idmap.size" => check_uint,
        "security.syscalls.blacklist" | "security.syscalls.whitelist" => check_any,

        "raw.apparmor" | "raw.lxc" | "raw.seccomp" | "raw.idmap" => check_any,

        "volatile.apply_template"
        | "volatile.base_image"
        | "volatile.last_state.idmap"
        | "volatile.idmap.current"
        | "volatile.idmap.next" => check_any,
        "volatile.last_state.power" => check_power_state,
        "volatile.idmap.base" => check_int,
        "volatile.apply_quota" => check_byte_size,

        _ => return None,
    };
    Some(checker)
}

/// Look up the value checker for a config key.
pub fn config_key_checker(key: &str) -> Result<KeyChecker, SchemaError> {
    if let Some(checker) = static_checker(key) {
        return Ok(checker);
    }

    for prefix in ["user.", "environment.", "image.", "limits.kernel."] {
        if key.starts_with(prefix) && key.len() > prefix.len() {
            return Ok(check_any);
        }
    }

    // volatile.<device>.{hwaddr,name,host_name}
    if let Some(rest) = key.strip_prefix("volatile.") {
        let fields: Vec<&str> = rest.split('.').collect();
        if fields.len() == 2
            && !fields[0].is_empty()
            && matches!(fields[1], "hwaddr" | "name" | "host_name")
        {
            return Ok(check_any);
        }
    }

    Err(SchemaError::UnknownKey(key.to_owned()))
}
