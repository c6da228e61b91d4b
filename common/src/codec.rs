//! Text form of a command: ten unsigned decimal fields joined by commas, in
//! [`AcState`] field order.

use crate::types::{AcCommand, AcState, FIELD_COUNT};

pub const FIELD_DELIMITER: char = ',';

/// Parses command text leniently.
///
/// Empty tokens are skipped, parsing stops after [`FIELD_COUNT`] fields, and
/// missing fields stay zero. Each token is read like C `atoi`: leading
/// whitespace and a `+` sign are accepted, parsing stops at the first
/// non-digit, and a token without leading digits is zero. Negative values
/// decode to zero and values above 255 saturate, so neither can alias a
/// legal field value.
pub fn decode(text: &str) -> AcCommand {
    let mut fields = [0_u8; FIELD_COUNT];
    let tokens = text
        .split(FIELD_DELIMITER)
        .filter(|token| !token.is_empty())
        .take(FIELD_COUNT);

    for (slot, token) in fields.iter_mut().zip(tokens) {
        *slot = parse_field(token);
    }

    AcCommand(fields)
}

pub fn encode(state: &AcState) -> String {
    state
        .to_fields()
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(&FIELD_DELIMITER.to_string())
}

fn parse_field(token: &str) -> u8 {
    let trimmed = token.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut value: u32 = 0;
    let mut seen_digit = false;
    for byte in digits.bytes() {
        if !byte.is_ascii_digit() {
            break;
        }
        seen_digit = true;
        value = value
            .saturating_mul(10)
            .saturating_add(u32::from(byte - b'0'));
    }

    if !seen_digit || negative {
        return 0;
    }

    u8::try_from(value).unwrap_or(u8::MAX)
}
