/*! Detectors for string encodings used by known malware families. */

use memchr::memmem;
use regex::Regex;

use crate::analysis::Match;
use crate::errors::PatternError;
use crate::patterns::{Category, EncodingScheme, FamilySignature, Thresholds};

pub(crate) struct FamilyMatcher {
    families: Vec<FamilySignature>,
    /// Quoted alphanumeric strings checked against the Dridex encoding.
    candidates: Regex,
}

impl FamilyMatcher {
    pub fn new(
        families: &[FamilySignature],
        thresholds: &Thresholds,
    ) -> Result<Self, PatternError> {
        let pattern =
            format!(r#""([0-9A-Za-z]{{{},}})""#, thresholds.min_family_length);
        let candidates = Regex::new(&pattern).map_err(|err| {
            PatternError::InvalidRegex { pattern, err: Box::new(err) }
        })?;
        Ok(Self { families: families.to_vec(), candidates })
    }

    pub fn scan(&self, source: &str, matches: &mut Vec<Match>) {
        for family in &self.families {
            match &family.scheme {
                EncodingScheme::Dridex => {
                    self.scan_dridex(family, source, matches)
                }
                EncodingScheme::Literal(marker) if !marker.is_empty() => {
                    for offset in
                        memmem::find_iter(source.as_bytes(), marker.as_bytes())
                    {
                        matches.push(
                            Match::new(
                                Category::FamilyEncoding,
                                marker.as_str(),
                                family.description.as_str(),
                                offset,
                            )
                            .with_family(&family.family),
                        );
                    }
                }
                EncodingScheme::Literal(_) => {}
            }
        }
    }

    fn scan_dridex(
        &self,
        family: &FamilySignature,
        source: &str,
        matches: &mut Vec<Match>,
    ) {
        for captures in self.candidates.captures_iter(source) {
            let Some(value) = captures.get(1) else {
                continue;
            };
            // Strings made only of hex digits are not Dridex strings.
            if value.as_str().bytes().all(|b| b.is_ascii_hexdigit()) {
                continue;
            }
            let Some(decoded) = dridex_decode(value.as_str()) else {
                continue;
            };
            if decoded.is_empty()
                || !decoded.chars().all(|c| c == ' ' || c.is_ascii_graphic())
            {
                continue;
            }
            matches.push(
                Match::new(
                    Category::FamilyEncoding,
                    decoded,
                    value.as_str(),
                    value.start(),
                )
                .with_family(&family.family),
            );
        }
    }
}

/// Parses the digits in `input`, ignoring anything else.
fn strip_chars(input: &[u8]) -> Option<u64> {
    let digits: Vec<u8> =
        input.iter().copied().filter(u8::is_ascii_digit).collect();
    std::str::from_utf8(&digits).ok()?.parse().ok()
}

/// Parses `input` as a number where anything that is not a digit counts
/// as a zero.
fn strip_chars_with_zero(input: &[u8]) -> Option<u64> {
    input.iter().try_fold(0_u64, |acc, b| {
        let digit = if b.is_ascii_digit() { (b - b'0') as u64 } else { 0 };
        acc.checked_mul(10)?.checked_add(digit)
    })
}

/// Decodes a string obfuscated with the Dridex URL encoding.
///
/// The two keys are stored in the middle of the string, and the rest of
/// the string is split in groups of digits. Each group divided by the
/// second key is a character code. Returns `None` if the string is not
/// a valid encoding.
pub(crate) fn dridex_decode(input: &str) -> Option<String> {
    let input = input.as_bytes();
    if input.len() < 12 {
        return None;
    }

    let work = &input[4..input.len() - 4];
    let half = work.len() / 2;

    let key_enc = strip_chars_with_zero(work.get(half.checked_sub(2)?..half)?)?;
    let key_size = strip_chars_with_zero(work.get(half..half + 2)?)?;
    let char_size = usize::try_from(key_size.checked_sub(key_enc)?).ok()?;

    if char_size == 0 {
        return None;
    }

    let work = [&work[..half - 2], &work[half + 2..]].concat();
    let half = work.len() / 2;
    let half_char = char_size / 2;

    let key_enc2 = strip_chars(
        work.get(half.checked_sub(half_char)?..half + half_char)?,
    )?;

    if key_enc2 == 0 {
        return None;
    }

    let work = [&work[..half - half_char], &work[half + half_char..]].concat();
    let mut decoded = String::new();

    for group in work.chunks(char_size) {
        let code = strip_chars(group)? / key_enc2;
        decoded.push(char::from_u32(u32::try_from(code).ok()?)?);
    }

    Some(decoded)
}
