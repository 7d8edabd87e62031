//! Text framing at the device boundary.
//!
//! Requests are `"<value>, <value>[, <value>, <value> ...] "`. A token is a
//! decimal literal (encoded with the Q8.24 codec) or a `0x` literal taken as
//! an already-encoded word, depending on [`OperandFormat`]. Responses are
//! one `RES <index>: 0x%08x` line per result.

use crate::config::OperandFormat;
use crate::error::{FpmError, Result};
use fpm_chip::codec;

/// Parse a write request into operand words
///
/// # Errors
///
/// Returns `MalformedRequest` for empty tokens, unparseable or out-of-range
/// literals, and requests that are not a whole number of pairs.
pub fn parse_request(text: &str, format: OperandFormat) -> Result<Vec<u32>> {
    let text = text.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0');
    if text.is_empty() {
        return Err(FpmError::malformed_request("empty request"));
    }

    let words = text
        .split(',')
        .map(|token| parse_operand(token.trim(), format))
        .collect::<Result<Vec<_>>>()?;

    if words.len() % 2 != 0 {
        return Err(FpmError::malformed_request(format!(
            "{} operand(s), expected pairs",
            words.len()
        )));
    }
    Ok(words)
}

/// Parse one operand token
///
/// # Errors
///
/// Returns `MalformedRequest` if the token does not fit `format`.
pub fn parse_operand(token: &str, format: OperandFormat) -> Result<u32> {
    if token.is_empty() {
        return Err(FpmError::malformed_request("empty operand"));
    }

    let is_hex = token.starts_with("0x") || token.starts_with("0X");
    match (format, is_hex) {
        (OperandFormat::Hex | OperandFormat::Auto, true) => parse_hex(token),
        (OperandFormat::Decimal | OperandFormat::Auto, false) => parse_decimal(token),
        (OperandFormat::Hex, false) => Err(FpmError::malformed_request(format!(
            "'{token}' is not a 0x literal"
        ))),
        (OperandFormat::Decimal, true) => Err(FpmError::malformed_request(format!(
            "'{token}' is not a decimal literal"
        ))),
    }
}

fn parse_hex(token: &str) -> Result<u32> {
    let digits = &token[2..];
    if digits.is_empty() || digits.len() > 8 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(FpmError::malformed_request(format!(
            "'{token}' is not a well-formed 32-bit hex literal"
        )));
    }
    u32::from_str_radix(digits, 16)
        .map_err(|e| FpmError::malformed_request(format!("'{token}': {e}")))
}

fn parse_decimal(token: &str) -> Result<u32> {
    // f64::from_str also takes "inf" and "nan"; operands must be plain numbers.
    if !token
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
    {
        return Err(FpmError::malformed_request(format!(
            "'{token}' is not a decimal literal"
        )));
    }
    let value: f64 = token
        .parse()
        .map_err(|e| FpmError::malformed_request(format!("'{token}': {e}")))?;
    codec::checked_encode(value).ok_or_else(|| {
        FpmError::malformed_request(format!(
            "{value} is outside the representable range [{}, {}]",
            codec::MIN_VALUE,
            codec::MAX_MAGNITUDE
        ))
    })
}

/// Format one result line
pub fn format_result(index: usize, word: u32) -> String {
    format!("RES {index}: {word:#010x}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_pair() {
        let words = parse_request("2.0, 2.0 ", OperandFormat::Auto).unwrap();
        assert_eq!(words, vec![codec::encode(2.0), codec::encode(2.0)]);
    }

    #[test]
    fn hex_pair_passes_through() {
        let words = parse_request("0x02000000, 0xFF000000 ", OperandFormat::Hex).unwrap();
        assert_eq!(words, vec![0x0200_0000, 0xFF00_0000]);
    }

    #[test]
    fn auto_mixes_token_kinds() {
        let words = parse_request("0x01800000, -1.5", OperandFormat::Auto).unwrap();
        assert_eq!(words, vec![0x0180_0000, codec::encode(-1.5)]);
    }

    #[test]
    fn several_pairs_in_one_request() {
        let words = parse_request("1, 2, 3, 4 ", OperandFormat::Decimal).unwrap();
        assert_eq!(words.len(), 4);
    }

    #[test]
    fn rejects_garbage() {
        for bad in [
            "abc, 1.0 ",
            "",
            "   ",
            "1.0",
            "1.0, ",
            "1.0,,2.0",
            "0x, 1",
            "0x123456789, 1",
            "0xG1, 1",
            "inf, 1",
            "nan, 1",
            "1000, 1",
        ] {
            let err = parse_request(bad, OperandFormat::Auto).unwrap_err();
            assert!(matches!(err, FpmError::MalformedRequest { .. }), "{bad:?}");
        }
    }

    #[test]
    fn format_restrictions() {
        assert!(parse_request("1.0, 2.0", OperandFormat::Hex).is_err());
        assert!(parse_request("0x1, 0x2", OperandFormat::Decimal).is_err());
    }

    #[test]
    fn result_line_shape() {
        assert_eq!(format_result(0, 0x0400_0000), "RES 0: 0x04000000\n");
        assert_eq!(format_result(4, 0xFF), "RES 4: 0x000000ff\n");
    }
}
