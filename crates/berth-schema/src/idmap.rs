use crate::SchemaError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdmapKind {
    Uid,
    Gid,
    Both,
}

/// One `raw.idmap` mapping of `max_range` ids starting at `host_id` on the
/// host to `ns_id` inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdmapEntry {
    pub kind: IdmapKind,
    pub host_id: u64,
    pub ns_id: u64,
    pub max_range: u64,
}

fn parse_range(line: &str, field: &str) -> Result<(u64, u64), SchemaError> {
    let bad = |reason: &str| SchemaError::InvalidIdmap {
        line: line.to_owned(),
        reason: reason.to_owned(),
    };
    let (start, end) = match field.split_once('-') {
        Some((s, e)) => (s, e),
        None => (field, field),
    };
    let start: u64 = start.parse().map_err(|_| bad("id is not a number"))?;
    let end: u64 = end.parse().map_err(|_| bad("id is not a number"))?;
    if end < start {
        return Err(bad("range end precedes start"));
    }
    Ok((start, end - start + 1))
}

/// Parse the `raw.idmap` config value: one `both|uid|gid HOST[-END] NS[-END]`
/// mapping per line.
pub fn parse_raw_idmap(value: &str) -> Result<Vec<IdmapEntry>, SchemaError> {
    let mut entries = Vec::new();
    for line in value.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(SchemaError::InvalidIdmap {
                line: line.to_owned(),
                reason: "expected three fields".to_owned(),
            });
        }

        let kind = match fields[0] {
            "both" => IdmapKind::Both,
            "uid" => IdmapKind::Uid,
            "gid" => IdmapKind::Gid,
            other => {
                return Err(SchemaError::InvalidIdmap {
                    line: line.to_owned(),
                    reason: format!("unknown id type '{other}'"),
                })
            }
        };

        let (host_id, host_len) = parse_range(line, fields[1])?;
        let (ns_id, ns_len) = parse_range(line, fields[2])?;
        if host_len != ns_len {
            return Err(SchemaError::InvalidIdmap {
                line: line.to_owned(),
                reason: "host and container ranges differ in size".to_owned(),
            });
        }

        entries.push(IdmapEntry {
            kind,
            host_id,
            ns_id,
            max_range: host_len,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_ids() {
        let entries = parse_raw_idmap("both 1000 2000").unwrap();
        assert_eq!(
            entries,
            vec![IdmapEntry {
                kind: IdmapKind::Both,
                host_id: 1000,
                ns_id: 2000,
                max_range: 1,
            }]
        );
    }

    #[test]
    fn ranges_and_multiple_lines() {
        let entries = parse_raw_idmap("uid 1000-1009 0-9\n\ngid 50 50\n").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, IdmapKind::Uid);
        assert_eq!(entries[0].max_range, 10);
        assert_eq!(entries[1].kind, IdmapKind::Gid);
    }

    #[test]
    fn mismatched_ranges_rejected() {
        assert!(parse_raw_idmap("both 1000-1010 0-5").is_err());
    }

    #[test]
    fn bad_kind_rejected() {
        assert!(parse_raw_idmap("user 1 1").is_err());
    }

    #[test]
    fn wrong_field_count_rejected() {
        assert!(parse_raw_idmap("both 1000").is_err());
    }
}
