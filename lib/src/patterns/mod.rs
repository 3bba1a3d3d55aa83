/*! Database of patterns used for flagging suspicious constructs in VBA code.

The database is a list of [`PatternEntry`], each one being a keyword or a
regular expression with a [`Category`] and a human-readable description,
plus a list of [`FamilySignature`] describing string encodings used by known
malware families, and the [`Thresholds`] used by the generic detectors of
encoded strings.

The built-in database is created once and shared by every analysis, it can
be obtained with [`PatternDatabase::builtin`]. Callers that need additional
patterns clone it and extend it with a [`PatternSet`], which is plain data
that can be deserialized from a configuration file.
*/

use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

mod builtin;


/// Version of the built-in database. It changes every time the built-in
/// tables are modified.
pub const VERSION: &str = "1.0.0";

static BUILTIN: LazyLock<PatternDatabase> = LazyLock::new(builtin::database);

/// Category of a pattern, and of the findings it produces.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Procedures that are executed automatically when the document is
    /// opened, closed or modified.
    AutoExec,
    /// Keywords frequently used by malicious macros.
    Suspicious,
    /// Indicators of compromise: URLs, IP addresses, etc.
    Ioc,
    /// Hex-encoded strings.
    HexString,
    /// Base64-encoded strings.
    Base64String,
    /// Strings encoded with the scheme of a known malware family.
    FamilyEncoding,
    /// Obfuscated VBA string expressions.
    VbaString,
}

impl Category {
    /// All categories, in the order they are listed.
    pub const ALL: [Category; 7] = [
        Category::AutoExec,
        Category::Suspicious,
        Category::Ioc,
        Category::HexString,
        Category::Base64String,
        Category::FamilyEncoding,
        Category::VbaString,
    ];
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Category::AutoExec => "AutoExec",
            Category::Suspicious => "Suspicious",
            Category::Ioc => "IOC",
            Category::HexString => "Hex String",
            Category::Base64String => "Base64 String",
            Category::FamilyEncoding => "Family String",
            Category::VbaString => "VBA string",
        };
        write!(f, "{}", label)
    }
}

/// What a [`PatternEntry`] matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// A literal keyword, matched case-insensitively. If the keyword starts
    /// or ends with a word character, it doesn't match when it's part of
    /// a longer identifier.
    Keyword(String),
    /// A regular expression, matched case-insensitively.
    Regex(String),
}

impl Pattern {
    /// The keyword or the regular expression.
    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Keyword(s) | Pattern::Regex(s) => s.as_str(),
        }
    }
}

/// An entry in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEntry {
    /// Category of the findings produced by this entry.
    pub category: Category,
    /// What to look for.
    pub pattern: Pattern,
    /// Why it's interesting.
    pub description: String,
}

impl PatternEntry {
    /// Creates an entry for a literal keyword.
    pub fn keyword<K: Into<String>, D: Into<String>>(
        category: Category,
        keyword: K,
        description: D,
    ) -> Self {
        Self {
            category,
            pattern: Pattern::Keyword(keyword.into()),
            description: description.into(),
        }
    }

    /// Creates an entry for a regular expression.
    pub fn regex<R: Into<String>, D: Into<String>>(
        category: Category,
        regex: R,
        description: D,
    ) -> Self {
        Self {
            category,
            pattern: Pattern::Regex(regex.into()),
            description: description.into(),
        }
    }
}

/// Encoding scheme used by a malware family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingScheme {
    /// The URL encoding used by the Dridex banking trojan, which hides
    /// numeric keys inside strings of digits and letters.
    Dridex,
    /// A literal marker that appears in the code, matched case-sensitively.
    Literal(String),
}

/// String encoding associated with a known malware family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilySignature {
    /// Name of the family, used in the labels of the findings.
    pub family: String,
    /// How the strings are recognized.
    pub scheme: EncodingScheme,
    /// Description of the encoding.
    pub description: String,
}

/// Tuning parameters for the generic detectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum number of hex digits in a hex-encoded string.
    pub min_hex_length: usize,
    /// Minimum number of characters in a base64-encoded string.
    pub min_base64_length: usize,
    /// Minimum number of characters in a string checked against the
    /// family-specific encodings.
    pub min_family_length: usize,
    /// Words that look like base64 but are common in benign code. Compared
    /// case-insensitively.
    pub base64_whitelist: Vec<String>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_hex_length: 8,
            min_base64_length: 16,
            min_family_length: 20,
            base64_whitelist: [
                "thisdocument",
                "thisworkbook",
                "test",
                "temp",
                "http",
                "open",
                "exit",
                "kernel32",
                "virtualalloc",
                "createthread",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Patterns supplied by the caller, usually deserialized from a
/// configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSet {
    /// Additional pattern entries.
    pub patterns: Vec<PatternEntry>,
    /// Additional family signatures.
    pub families: Vec<FamilySignature>,
    /// Thresholds that replace the ones in the database, if any.
    pub thresholds: Option<Thresholds>,
}

/// A collection of patterns, family signatures and thresholds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternDatabase {
    entries: Vec<PatternEntry>,
    families: Vec<FamilySignature>,
    thresholds: Thresholds,
}

impl PatternDatabase {
    /// Creates an empty database with default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the built-in database.
    pub fn builtin() -> &'static PatternDatabase {
        &BUILTIN
    }

    /// Adds the entries and families in `set` to the database. If `set`
    /// has thresholds they replace the current ones.
    pub fn extend(&mut self, set: PatternSet) -> &mut Self {
        self.entries.extend(set.patterns);
        self.families.extend(set.families);
        if let Some(thresholds) = set.thresholds {
            self.thresholds = thresholds;
        }
        self
    }

    /// Adds a single entry to the database.
    pub fn add_entry(&mut self, entry: PatternEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    /// Adds a family signature to the database.
    pub fn add_family(&mut self, family: FamilySignature) -> &mut Self {
        self.families.push(family);
        self
    }

    /// Replaces the thresholds.
    pub fn set_thresholds(&mut self, thresholds: Thresholds) -> &mut Self {
        self.thresholds = thresholds;
        self
    }

    /// Returns all the entries.
    pub fn entries(&self) -> &[PatternEntry] {
        self.entries.as_slice()
    }

    /// Returns the entries in the given category.
    pub fn entries_in(
        &self,
        category: Category,
    ) -> impl Iterator<Item = &PatternEntry> {
        self.entries.iter().filter(move |entry| entry.category == category)
    }

    /// Returns the family signatures.
    pub fn families(&self) -> &[FamilySignature] {
        self.families.as_slice()
    }

    /// Returns the thresholds.
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }
}
