//! Compact interface sequence identifiers.
//!
//! A raw identifier such as `"270042"` carries a counter (`"27"`) followed by a
//! four-digit sequence (`"0042"`). The counter is folded into a single
//! letter: `0..=25` map to `A..=Z`, `26..=51` to `a..=z`. The result for the
//! example is `"b0042"`.

use crate::error::ConfigError;

const SEQUENCE_LEN: usize = 4;
const LETTERS: u32 = 26;

/// Encodes a raw counter-plus-sequence string as one letter followed by the sequence.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if the input is shorter than the
/// sequence, contains non-digits, or the counter does not fit in one letter.
pub fn interface_sequence(raw: &str) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        field: "interface sequence",
        reason: format!("{reason}: {raw:?}"),
    };

    let raw = raw.trim();
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("expected only digits"));
    }
    if raw.len() < SEQUENCE_LEN {
        return Err(invalid("shorter than the sequence"));
    }

    let (counter, sequence) = raw.split_at(raw.len() - SEQUENCE_LEN);
    let counter: u32 = format!("{counter:0>2}")
        .parse()
        .map_err(|_| invalid("counter out of range"))?;

    let offset = match counter {
        c if c < LETTERS => c,
        c if c < 2 * LETTERS => c + 6,
        _ => return Err(invalid("counter out of range")),
    };
    let letter = char::from_u32(65 + offset).ok_or_else(|| invalid("counter out of range"))?;
    Ok(format!("{letter}{sequence}"))
}
