//! Human-readable size parsing (e.g., "64MB", "2GB").

use std::fmt;
use thiserror::Error;

/// Error parsing a size string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid size '{input}' - expected format like '2GB', '500MB', or '1024KB'")]
pub struct SizeParseError {
    input: String,
}

impl SizeParseError {
    fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Parse a human-readable size string into bytes.
///
/// Bare numbers are bytes; `K`/`KB`, `M`/`MB` and `G`/`GB` suffixes are
/// binary multiples. Case and surrounding whitespace are ignored.
///
/// ```
/// use orthotile::config::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("1 KB").unwrap(), 1024);
/// assert_eq!(parse_size("64mb").unwrap(), 64 * 1024 * 1024);
/// ```
pub fn parse_size(s: &str) -> Result<u64, SizeParseError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(SizeParseError::new(s));
    }

    let upper = trimmed.to_ascii_uppercase();
    let (digits, multiplier) = [("GB", GB), ("G", GB), ("MB", MB), ("M", MB), ("KB", KB), ("K", KB)]
        .iter()
        .find_map(|(suffix, multiplier)| {
            upper
                .strip_suffix(suffix)
                .map(|rest| (rest.trim().to_string(), *multiplier))
        })
        .unwrap_or_else(|| (upper.clone(), 1));

    let value: u64 = digits.parse().map_err(|_| SizeParseError::new(trimmed))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| SizeParseError::new(trimmed))
}

/// Format a byte count using the largest exact binary unit.
///
/// ```
/// use orthotile::config::format_size;
///
/// assert_eq!(format_size(1024), "1KB");
/// assert_eq!(format_size(512 * 1024 * 1024), "512MB");
/// assert_eq!(format_size(1500), "1500");
/// ```
pub fn format_size(bytes: u64) -> String {
    if bytes >= GB && bytes % GB == 0 {
        format!("{}GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{}KB", bytes / KB)
    } else {
        format!("{}", bytes)
    }
}

/// A byte size that parses from and prints as a human-readable string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Size(pub u64);

impl Size {
    pub fn bytes(self) -> u64 {
        self.0
    }

    pub fn from_mb(mb: u64) -> Self {
        Self(mb * MB)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_size(self.0))
    }
}

impl std::str::FromStr for Size {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_size(s).map(Size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_number() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("999999").unwrap(), 999_999);
    }

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse_size("2k").unwrap(), 2048);
        assert_eq!(parse_size("3M").unwrap(), 3 * MB);
        assert_eq!(parse_size(" 1 GB ").unwrap(), GB);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("1.5GB").is_err());
        assert!(parse_size("-1").is_err());
        assert!(parse_size("ten").is_err());
    }

    #[test]
    fn test_parse_overflow() {
        assert!(parse_size("99999999999999999999").is_err());
        assert!(parse_size("18446744073709551615GB").is_err());
    }

    #[test]
    fn test_size_display_and_from_str() {
        let size: Size = "512MB".parse().unwrap();
        assert_eq!(size, Size::from_mb(512));
        assert_eq!(size.to_string(), "512MB");
    }
}
