//! Decoders for OpenOCD TCL response shapes
//!
//! Every value on the wire is plain text. Each response shape the client
//! consumes gets one small decoder here so commands compose instead of
//! re-implementing string splitting.

use crate::error::{OcdError, Result};

/// Parse a 32-bit word written as `0x`-prefixed hex or plain decimal
pub fn parse_word(s: &str) -> Result<u32> {
    let s = s.trim();
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    u32::from_str_radix(digits, radix)
        .map_err(|e| OcdError::Parse(format!("Invalid 32-bit word '{}': {}", s, e)))
}

/// Parse a hex word with or without the 0x prefix
pub fn parse_hex_word(s: &str) -> Result<u32> {
    let s = s.trim();
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(digits, 16)
        .map_err(|e| OcdError::Parse(format!("Invalid hex word '{}': {}", s, e)))
}

/// Decode a `reg <name> force` response.
/// Format: "pc (/32): 0x08000100"
pub fn parse_register_line(output: &str) -> Result<u32> {
    let value = output
        .split(':')
        .nth(1)
        .ok_or_else(|| OcdError::Parse(format!("Unexpected register response '{}'", output)))?;
    parse_hex_word(value)
}

/// Decode a single-word `mdw` response.
/// Format: "0x20000000: deadc0de"
///
/// Returns `Ok(None)` when the response has no "address: value" shape at all,
/// which is what OpenOCD prints when the word cannot be read.
pub fn parse_mdw_word(output: &str) -> Result<Option<u32>> {
    let Some((_, data)) = output.split_once(": ") else {
        return Ok(None);
    };
    let word = data
        .split_whitespace()
        .next()
        .ok_or_else(|| OcdError::Parse(format!("Empty memory word in '{}'", output)))?;
    parse_hex_word(word).map(Some)
}

/// Decode an `array get` response into its values, ordered by index.
/// Format: "0 1 1 0 2 2863311530" (index/value pairs, any order)
pub fn parse_array_values(output: &str) -> Result<Vec<u32>> {
    let tokens: Vec<&str> = output.split_whitespace().collect();
    if tokens.len() % 2 != 0 {
        return Err(OcdError::Parse(format!(
            "Array response has an odd number of tokens ({}): '{}'",
            tokens.len(),
            output
        )));
    }

    let mut pairs = Vec::with_capacity(tokens.len() / 2);
    for pair in tokens.chunks_exact(2) {
        let index = pair[0]
            .parse::<usize>()
            .map_err(|e| OcdError::Parse(format!("Invalid array index '{}': {}", pair[0], e)))?;
        pairs.push((index, parse_word(pair[1])?));
    }
    pairs.sort_unstable_by_key(|(index, _)| *index);

    // indices must be exactly 0..n once sorted
    if let Some((expected, (index, _))) =
        pairs.iter().enumerate().find(|(expected, (index, _))| index != expected)
    {
        return Err(OcdError::Parse(format!(
            "Array index {} where {} was expected: '{}'",
            index, expected, output
        )));
    }

    Ok(pairs.into_iter().map(|(_, value)| value).collect())
}

/// Encode words as the index/value list `array set` expects.
/// Output: "0 0x1 1 0x0 2 0xaaaaaaaa"
pub fn encode_array_pairs(data: &[u32]) -> String {
    data.iter()
        .enumerate()
        .map(|(index, value)| format!("{} 0x{:x}", index, value))
        .collect::<Vec<_>>()
        .join(" ")
}
