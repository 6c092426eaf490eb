//! Hex address and instance argument parsing.

use anyhow::{Context, Result, anyhow};

/// Parse a hex address string (with or without 0x prefix).
pub fn parse_hex_address(s: &str) -> Result<u64> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(s, 16).map_err(|e| anyhow!("Invalid hex address: {}", e))
}

/// Parse a `pid:value` instance argument.
pub fn parse_instance(s: &str) -> Result<(u32, i32)> {
    let (pid, value) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid instance '{}': expected pid:value", s))?;
    let pid = pid
        .trim()
        .parse()
        .with_context(|| format!("Invalid pid in '{s}'"))?;
    let value = value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value in '{s}'"))?;
    Ok((pid, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_address_with_prefix() {
        assert_eq!(parse_hex_address("0x22DEBA60").unwrap(), 0x22DE_BA60);
        assert_eq!(parse_hex_address("0X1000").unwrap(), 0x1000);
    }

    #[test]
    fn test_parse_hex_address_without_prefix() {
        assert_eq!(parse_hex_address("DEADBEEF").unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_parse_hex_address_invalid() {
        assert!(parse_hex_address("GHIJK").is_err());
        assert!(parse_hex_address("0xZZZ").is_err());
    }

    #[test]
    fn test_parse_instance() {
        assert_eq!(parse_instance("1234:287").unwrap(), (1234, 287));
        assert_eq!(parse_instance("1234:-1").unwrap(), (1234, -1));
        assert!(parse_instance("1234").is_err());
        assert!(parse_instance("abc:287").is_err());
        assert!(parse_instance("1234:x").is_err());
    }
}
