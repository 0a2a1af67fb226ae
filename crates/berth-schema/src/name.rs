/// Separates a snapshot's parent container name from its own name.
pub const SNAPSHOT_DELIMITER: &str = "/";

/// Split `parent/snapshot` into its parts. The flag is false for plain
/// container names, in which case the snapshot part is empty.
pub fn split_snapshot_name(name: &str) -> (&str, &str, bool) {
    match name.split_once(SNAPSHOT_DELIMITER) {
        Some((parent, snap)) => (parent, snap, true),
        None => (name, "", false),
    }
}

pub fn is_snapshot_name(name: &str) -> bool {
    name.contains(SNAPSHOT_DELIMITER)
}

/// RFC 1123 style label: 1-63 characters of `[-a-zA-Z0-9]`, not starting
/// with a digit or a dash and not ending with a dash.
pub fn valid_hostname(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }
    let first = name.as_bytes()[0];
    if first == b'-' || first.is_ascii_digit() {
        return false;
    }
    if name.ends_with('-') {
        return false;
    }
    name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}
