use crate::SchemaError;

const DECIMAL: [(&str, u32); 7] = [
    ("B", 0),
    ("kB", 1),
    ("KB", 1),
    ("MB", 2),
    ("GB", 3),
    ("TB", 4),
    ("PB", 5),
];

const BINARY: [(&str, u32); 6] = [
    ("KiB", 1),
    ("MiB", 2),
    ("GiB", 3),
    ("TiB", 4),
    ("PiB", 5),
    ("EiB", 6),
];

/// Parse a human byte size such as `10GB`, `512MiB`, or `4096`.
///
/// Decimal suffixes are powers of 1000, `*iB` suffixes powers of 1024.
/// An empty string parses to zero.
pub fn parse_byte_size(input: &str) -> Result<u64, SchemaError> {
    let s = input.trim();
    if s.is_empty() {
        return Ok(0);
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    if digits.is_empty() {
        return Err(SchemaError::InvalidByteSize(input.to_owned()));
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| SchemaError::InvalidByteSize(input.to_owned()))?;

    let suffix = suffix.trim();
    let multiplier = if suffix.is_empty() {
        1
    } else if suffix == "EB" {
        1000u64.pow(6)
    } else if let Some((_, exp)) = BINARY.iter().find(|(s, _)| *s == suffix) {
        1024u64.pow(*exp)
    } else if let Some((_, exp)) = DECIMAL.iter().find(|(s, _)| *s == suffix) {
        1000u64.pow(*exp)
    } else {
        return Err(SchemaError::InvalidByteSize(input.to_owned()));
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| SchemaError::InvalidByteSize(input.to_owned()))
}
