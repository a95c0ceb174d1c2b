//! Helpers for reading and writing sysfs-style metric files.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use super::CollectError;

/// Reads the whole file as UTF-8.
pub fn read_to_string(path: &Path) -> Result<String, CollectError> {
    fs::read_to_string(path).map_err(|source| CollectError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a file holding a single integer.
pub fn read_int(path: &Path) -> Result<i64, CollectError> {
    let contents = read_to_string(path)?;
    parse_int(&contents).ok_or_else(|| CollectError::Parse {
        path: path.to_path_buf(),
        reason: format!("not an integer: {:?}", contents.trim()),
    })
}

/// Overwrites the file with `value`.
pub fn write_value(path: &Path, value: &str) -> Result<(), CollectError> {
    fs::write(path, value).map_err(|source| CollectError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses the leading integer of `s`.
///
/// Leading whitespace and a sign are accepted. A `0x` prefix selects hex,
/// otherwise decimal. Anything after the digits is ignored, so `"42\n"` and
/// `"42 mA"` both parse as 42.
pub fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let (radix, digits) = match s.get(..2) {
        Some("0x") | Some("0X") => (16, &s[2..]),
        _ => (10, s),
    };

    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    let magnitude = i64::from_str_radix(&digits[..end], radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Parses a hex number with an optional `0x` prefix.
pub fn parse_hex(s: &str) -> Option<u64> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let end = s.find(|c: char| !c.is_ascii_hexdigit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    u64::from_str_radix(&s[..end], 16).ok()
}

/// Splits on whitespace and parses every field.
pub fn parse_fields<T: FromStr>(path: &Path, contents: &str) -> Result<Vec<T>, CollectError> {
    contents
        .split_whitespace()
        .map(|field| {
            field.parse::<T>().map_err(|_| CollectError::Parse {
                path: path.to_path_buf(),
                reason: format!("invalid field {field:?}"),
            })
        })
        .collect()
}
