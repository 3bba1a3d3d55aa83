use aho_corasick::{AhoCorasick, MatchKind};
use regex::{Regex, RegexBuilder};

use crate::analysis::Match;
use crate::errors::PatternError;
use crate::patterns::{Pattern, PatternEntry};

/// Matches the keyword and regex entries of a pattern database.
///
/// All the keywords are put in a single Aho-Corasick automaton, so the
/// source code is scanned only once regardless of the number of keywords.
pub(crate) struct KeywordMatcher {
    automaton: Option<AhoCorasick>,
    /// Entries for each pattern in the automaton, indexed by pattern ID.
    keywords: Vec<PatternEntry>,
    regexes: Vec<(Regex, PatternEntry)>,
}

impl KeywordMatcher {
    pub fn new(entries: &[PatternEntry]) -> Result<Self, PatternError> {
        let mut keywords = Vec::new();
        let mut regexes = Vec::new();

        for entry in entries {
            match &entry.pattern {
                Pattern::Keyword(keyword) if !keyword.is_empty() => {
                    keywords.push(entry.clone());
                }
                Pattern::Keyword(_) => {}
                Pattern::Regex(regex) => {
                    let compiled = RegexBuilder::new(regex)
                        .case_insensitive(true)
                        .build()
                        .map_err(|err| PatternError::InvalidRegex {
                            pattern: regex.clone(),
                            err: Box::new(err),
                        })?;
                    regexes.push((compiled, entry.clone()));
                }
            }
        }

        let automaton = if keywords.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .ascii_case_insensitive(true)
                    .match_kind(MatchKind::Standard)
                    .build(keywords.iter().map(|entry| entry.pattern.as_str()))?,
            )
        };

        Ok(Self { automaton, keywords, regexes })
    }

    pub fn scan(&self, source: &str, matches: &mut Vec<Match>) {
        let bytes = source.as_bytes();

        if let Some(automaton) = &self.automaton {
            for m in automaton.find_overlapping_iter(source) {
                let entry = &self.keywords[m.pattern().as_usize()];
                if is_token(bytes, m.start(), m.end()) {
                    matches.push(Match::new(
                        entry.category,
                        entry.pattern.as_str(),
                        entry.description.as_str(),
                        m.start(),
                    ));
                }
            }
        }

        for (regex, entry) in &self.regexes {
            for m in regex.find_iter(source) {
                if m.as_str().is_empty() {
                    continue;
                }
                // The keyword is the matched text, for IOCs this is the URL,
                // IP address, etc.
                matches.push(Match::new(
                    entry.category,
                    m.as_str(),
                    entry.description.as_str(),
                    m.start(),
                ));
            }
        }
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Returns `true` if the match at `start..end` is not part of a longer
/// identifier. The boundary is checked only at the sides where the match
/// itself starts or ends with a word character, so that keywords like
/// `Print #` work as expected.
fn is_token(source: &[u8], start: usize, end: usize) -> bool {
    let starts_with_word = is_word_byte(source[start]);
    let ends_with_word = is_word_byte(source[end - 1]);

    let before_ok = !starts_with_word
        || start == 0
        || !is_word_byte(source[start - 1]);

    let after_ok =
        !ends_with_word || end == source.len() || !is_word_byte(source[end]);

    before_ok && after_ok
}
