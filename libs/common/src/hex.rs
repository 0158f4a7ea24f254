//! Hex formatting helpers
//! Frame dumps in debug traces use the spaced uppercase form

use std::fmt::Write;

/// Encode bytes to uppercase hex pairs separated by a single space
/// Example: [0xA5, 0x01, 0x0F] -> "A5 01 0F"
pub fn encode_spaced(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            result.push(' ');
        }
        // Writing to String buffer is infallible
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

/// Decode a hex string, ignoring whitespace between pairs
///
/// Returns `None` when the input has an odd number of digits or a non-hex
/// character.
pub fn decode(input: &str) -> Option<Vec<u8>> {
    ::hex::decode(input.split_whitespace().collect::<String>()).ok()
}
