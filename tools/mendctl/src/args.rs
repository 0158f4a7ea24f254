//! Argument value parsers

use std::fmt;

use common::hex;
use mendeleev::constants::MAX_DATA_LENGTH;

/// Raw request payload given on the command line as hex
///
/// Whitespace between byte pairs is ignored, so both "FF0000" and
/// "FF 00 00" are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_spaced(&self.0))
    }
}

pub fn parse_payload(input: &str) -> Result<Payload, String> {
    let input = input.trim();
    let input = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    let bytes = hex::decode(input).ok_or_else(|| format!("'{}' is not a hex byte string", input))?;
    if bytes.len() > MAX_DATA_LENGTH {
        return Err(format!(
            "payload is {} bytes, at most {} fit in one frame",
            bytes.len(),
            MAX_DATA_LENGTH
        ));
    }
    Ok(Payload(bytes))
}

/// Byte value in decimal or with a 0x prefix
pub fn parse_u8(input: &str) -> Result<u8, String> {
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(digits) => u8::from_str_radix(digits, 16),
        None => input.parse::<u8>(),
    };
    parsed.map_err(|e| format!("'{}' is not a byte value: {}", input, e))
}

pub fn parse_block_size(input: &str) -> Result<usize, String> {
    let size: usize = input
        .parse()
        .map_err(|e| format!("'{}' is not a size: {}", input, e))?;
    if size == 0 || size > MAX_DATA_LENGTH {
        return Err(format!("block size must be between 1 and {}", MAX_DATA_LENGTH));
    }
    Ok(size)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload("FF0000").unwrap().0, vec![0xFF, 0x00, 0x00]);
        assert_eq!(parse_payload("0x01 02").unwrap().0, vec![0x01, 0x02]);
        assert_eq!(parse_payload("").unwrap(), Payload::default());
        assert!(parse_payload("F").is_err());
        assert!(parse_payload("ZZ").is_err());
        assert!(parse_payload(&"00".repeat(MAX_DATA_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_payload_display() {
        assert_eq!(Payload(vec![0xA5, 0x01]).to_string(), "A5 01");
    }

    #[test]
    fn test_parse_u8() {
        assert_eq!(parse_u8("17").unwrap(), 17);
        assert_eq!(parse_u8("0x1F").unwrap(), 0x1F);
        assert!(parse_u8("256").is_err());
        assert!(parse_u8("0xGG").is_err());
    }

    #[test]
    fn test_parse_block_size() {
        assert_eq!(parse_block_size("128").unwrap(), 128);
        assert!(parse_block_size("0").is_err());
        assert!(parse_block_size("244").is_err());
    }
}
