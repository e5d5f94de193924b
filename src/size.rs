//! Human-readable byte sizes.
//!
//! Sizes are rendered and parsed with base-1024 units (`"1.50 MB"`, `"10M"`,
//! `"512KiB"`). The page scraper, the configuration layer and the CLI all go
//! through these two functions.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{GfileError, Result};

const UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
const UNIT_LETTERS: [char; 9] = ['B', 'K', 'M', 'G', 'T', 'P', 'E', 'Z', 'Y'];

static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<int>\d+)(?:\.(?P<frac>\d+))? ?(?P<unit>[KMGTPEZY]?)(?:iB|B)?$")
        .expect("size pattern is valid")
});

/// Either a byte count or a size string, as accepted by [`parse_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeInput<'a> {
    Bytes(u64),
    Text(&'a str),
}

impl From<u64> for SizeInput<'_> {
    fn from(bytes: u64) -> Self {
        SizeInput::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for SizeInput<'a> {
    fn from(text: &'a str) -> Self {
        SizeInput::Text(text)
    }
}

impl<'a> From<&'a String> for SizeInput<'a> {
    fn from(text: &'a String) -> Self {
        SizeInput::Text(text.as_str())
    }
}

/// Format a byte count with the largest unit whose value is at least 1.
///
/// # Example
/// ```
/// use gfile::size::format_size;
///
/// assert_eq!(format_size(0), "0B");
/// assert_eq!(format_size(1536), "1.50 KB");
/// ```
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0B".to_string();
    }
    let mut exponent = 0usize;
    let mut scale = 1f64;
    while exponent + 1 < UNITS.len() && bytes as f64 >= scale * 1024.0 {
        exponent += 1;
        scale *= 1024.0;
    }
    format!("{:.2} {}", bytes as f64 / scale, UNITS[exponent])
}

/// Parse a byte count or a size string into bytes.
///
/// Integers are returned unchanged. Strings take the form
/// `<digits>[.<digits>][ ][K|M|G|T|P|E|Z|Y][iB|B]`, case-insensitive; a
/// missing unit means bytes.
pub fn parse_size<'a>(input: impl Into<SizeInput<'a>>) -> Result<u64> {
    let text = match input.into() {
        SizeInput::Bytes(bytes) => return Ok(bytes),
        SizeInput::Text(text) => text.trim(),
    };
    let malformed = || GfileError::MalformedSizeString(text.to_string());

    let caps = SIZE_RE.captures(text).ok_or_else(malformed)?;
    let unit = caps
        .name("unit")
        .and_then(|m| m.as_str().chars().next())
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('B');
    let exponent = UNIT_LETTERS
        .iter()
        .position(|&letter| letter == unit)
        .ok_or_else(malformed)? as u32;
    let integer = &caps["int"];

    match caps.name("frac") {
        None => {
            let count: u64 = integer.parse().map_err(|_| malformed())?;
            1024u64
                .checked_pow(exponent)
                .and_then(|scale| count.checked_mul(scale))
                .ok_or_else(malformed)
        }
        Some(frac) => {
            let value: f64 = format!("{}.{}", integer, frac.as_str())
                .parse()
                .map_err(|_| malformed())?;
            let bytes = (value * 1024f64.powi(exponent as i32)).floor();
            if bytes >= u64::MAX as f64 {
                return Err(malformed());
            }
            Ok(bytes as u64)
        }
    }
}
