/*! Detectors for hex and base64 encoded strings. */

use base64::alphabet;
use base64::engine::general_purpose::GeneralPurpose;
use base64::engine::{DecodePaddingMode, GeneralPurposeConfig};
use base64::Engine;

use crate::analysis::Match;
use crate::patterns::{Category, Thresholds};

const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
}

/// Returns a printable representation of decoded bytes.
fn escape(bytes: &[u8]) -> String {
    bytes.escape_ascii().to_string()
}

/// Finds hex-encoded strings.
///
/// A candidate is a whole word (not part of a longer identifier) made only
/// of hex digits, with an even number of digits, at least one digit from
/// 0 to 9 and at least one letter from A to F. The last two conditions
/// rule out ordinary numbers and words like `faded` or `decade`.
pub(crate) fn hex_strings(
    source: &str,
    thresholds: &Thresholds,
    matches: &mut Vec<Match>,
) {
    let bytes = source.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        if !is_word_byte(bytes[pos]) {
            pos += 1;
            continue;
        }

        let start = pos;
        while pos < bytes.len() && is_word_byte(bytes[pos]) {
            pos += 1;
        }

        let word = &bytes[start..pos];

        if word.len() < thresholds.min_hex_length.max(2)
            || word.len() % 2 != 0
            || !word.iter().all(u8::is_ascii_hexdigit)
            || !word.iter().any(u8::is_ascii_digit)
            || !word.iter().any(u8::is_ascii_alphabetic)
        {
            continue;
        }

        let decoded: Vec<u8> = word
            .chunks_exact(2)
            .map(|pair| (hex_value(pair[0]) << 4) | hex_value(pair[1]))
            .collect();

        matches.push(Match::new(
            Category::HexString,
            escape(&decoded),
            &source[start..pos],
            start,
        ));
    }
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Finds base64-encoded strings.
///
/// A candidate is a maximal run of the base64 alphabet followed by up to
/// two `=`, that is not glued to an identifier. It must have a length that
/// is a multiple of 4, contain at least one letter that is not a hex digit
/// and it must decode. Words in the whitelist are ignored.
pub(crate) fn base64_strings(
    source: &str,
    thresholds: &Thresholds,
    matches: &mut Vec<Match>,
) {
    let bytes = source.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        if !is_base64_byte(bytes[pos]) {
            pos += 1;
            continue;
        }

        let start = pos;
        let glued_before = start > 0 && bytes[start - 1] == b'_';

        while pos < bytes.len() && is_base64_byte(bytes[pos]) {
            pos += 1;
        }

        let mut end = pos;
        while end < bytes.len() && end - pos < 2 && bytes[end] == b'=' {
            end += 1;
        }

        let glued_after = end < bytes.len()
            && (is_word_byte(bytes[end]) || bytes[end] == b'=');

        pos = end;

        if glued_before || glued_after {
            continue;
        }

        let run = &bytes[start..end];

        if run.len() < thresholds.min_base64_length
            || run.len() % 4 != 0
            || !run.iter().any(|b| b.is_ascii_alphabetic() && !b.is_ascii_hexdigit())
        {
            continue;
        }

        let encoded = &source[start..end];

        if thresholds
            .base64_whitelist
            .iter()
            .any(|word| word.eq_ignore_ascii_case(encoded))
        {
            continue;
        }

        if let Ok(decoded) = BASE64.decode(run) {
            matches.push(Match::new(
                Category::Base64String,
                escape(&decoded),
                encoded,
                start,
            ));
        }
    }
}
