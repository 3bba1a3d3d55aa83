/*! Analysis of VBA source code.

The [`Engine`] is the compiled form of a [`PatternDatabase`]. It looks for
the keywords and regular expressions in the database, and runs the generic
detectors of hex and base64 encoded strings, family-specific encodings and
obfuscated VBA string expressions.

The [`Analyzer`] puts everything together: it parses the container, locates
the VBA project, decompresses each module and scans its source code with
the engine, producing an [`AnalysisReport`].
*/

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use log::{debug, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::errors::{AnalysisError, PatternError};
use crate::olecf::{is_compound_file, CompoundFile};
use crate::patterns::{Category, PatternDatabase, Thresholds};
use crate::report::{
    AnalysisReport, Finding, ModuleOutcome, ModuleSource, ProjectSummary,
    ReportBuilder,
};
use crate::vba::{self, package, ModuleStream, VbaProject};

mod encoded;
mod family;
mod keywords;
mod vba_strings;


/// Default value for [`Analyzer::max_module_size`].
pub const DEFAULT_MAX_MODULE_SIZE: usize = 16 * 1024 * 1024;

/// Default value for [`Analyzer::max_package_part_size`].
pub const DEFAULT_MAX_PACKAGE_PART_SIZE: usize = 64 * 1024 * 1024;

static BUILTIN_ENGINE: LazyLock<Arc<Engine>> = LazyLock::new(|| {
    Arc::new(
        Engine::new(PatternDatabase::builtin())
            .expect("built-in patterns must compile"),
    )
});

/// A single occurrence found by one of the detectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Match {
    category: Category,
    family: Option<String>,
    keyword: String,
    description: String,
    offset: usize,
}

impl Match {
    pub fn new<K: Into<String>, D: Into<String>>(
        category: Category,
        keyword: K,
        description: D,
        offset: usize,
    ) -> Self {
        Self {
            category,
            family: None,
            keyword: keyword.into(),
            description: description.into(),
            offset,
        }
    }

    pub fn with_family(mut self, family: &str) -> Self {
        self.family = Some(family.to_string());
        self
    }
}

/// Identical matches share the same key.
type MatchKey = (Category, Option<String>, String, String);

/// Compiled pattern database.
pub struct Engine {
    keywords: keywords::KeywordMatcher,
    families: family::FamilyMatcher,
    thresholds: Thresholds,
}

impl Engine {
    /// Compiles a pattern database.
    pub fn new(db: &PatternDatabase) -> Result<Self, PatternError> {
        Ok(Self {
            keywords: keywords::KeywordMatcher::new(db.entries())?,
            families: family::FamilyMatcher::new(
                db.families(),
                db.thresholds(),
            )?,
            thresholds: db.thresholds().clone(),
        })
    }

    /// Returns the engine for the built-in database.
    pub fn builtin() -> Arc<Engine> {
        BUILTIN_ENGINE.clone()
    }

    /// Scans the source code of a module.
    ///
    /// Identical matches are merged in a single finding, whose `count` is
    /// the number of occurrences. Findings are sorted by the offset of
    /// their first occurrence.
    pub fn scan(&self, module: &str, source: &str) -> Vec<Finding> {
        let mut matches = Vec::new();

        self.keywords.scan(source, &mut matches);
        encoded::hex_strings(source, &self.thresholds, &mut matches);
        encoded::base64_strings(source, &self.thresholds, &mut matches);
        self.families.scan(source, &mut matches);
        vba_strings::vba_strings(source, &mut matches);

        summarize_encoded_strings(&mut matches);

        let mut findings: Vec<Finding> = Vec::new();
        let mut index: HashMap<MatchKey, usize> = HashMap::new();

        for m in matches {
            let key = (
                m.category,
                m.family.clone(),
                m.keyword.clone(),
                m.description.clone(),
            );
            match index.get(&key) {
                Some(i) => {
                    let finding = &mut findings[*i];
                    finding.count += 1;
                    finding.offset = finding.offset.min(m.offset);
                }
                None => {
                    index.insert(key, findings.len());
                    findings.push(Finding {
                        category: m.category,
                        family: m.family,
                        keyword: m.keyword,
                        description: m.description,
                        module: module.to_string(),
                        offset: m.offset,
                        count: 1,
                    });
                }
            }
        }

        findings.sort_by_key(|finding| finding.offset);
        findings
    }
}

/// Adds a suspicious finding for each kind of encoded string found, so
/// that a summary of the obfuscation techniques appears among the
/// suspicious keywords.
fn summarize_encoded_strings(matches: &mut Vec<Match>) {
    let mut summaries: Vec<Match> = Vec::new();

    for m in matches.iter() {
        let (keyword, description) = match (m.category, &m.family) {
            (Category::HexString, _) => (
                "Hex Strings".to_string(),
                "Hex-encoded strings were detected, may be used to obfuscate strings",
            ),
            (Category::Base64String, _) => (
                "Base64 Strings".to_string(),
                "Base64-encoded strings were detected, may be used to obfuscate strings",
            ),
            (Category::FamilyEncoding, family) => (
                format!("{} Strings", family.as_deref().unwrap_or("Family")),
                "Strings encoded with the scheme of a malware family were detected, may be used to obfuscate strings",
            ),
            (Category::VbaString, _) => (
                "VBA obfuscated Strings".to_string(),
                "VBA string expressions were detected, may be used to obfuscate strings",
            ),
            _ => continue,
        };

        match summaries.iter_mut().find(|s| s.keyword == keyword) {
            Some(summary) => summary.offset = summary.offset.min(m.offset),
            None => summaries.push(Match::new(
                Category::Suspicious,
                keyword,
                description,
                m.offset,
            )),
        }
    }

    matches.extend(summaries);
}

/// Analyzes files looking for VBA macros.
///
/// # Example
///
/// ```no_run
/// # use vbascan::Analyzer;
/// let data = std::fs::read("document.doc").unwrap();
/// let report = Analyzer::new()
///     .max_module_size(1024 * 1024)
///     .analyze(&data)
///     .unwrap();
///
/// for finding in report.findings() {
///     println!("{}: {}", finding.label(), finding.keyword);
/// }
/// ```
#[derive(Clone)]
pub struct Analyzer {
    engine: Arc<Engine>,
    max_module_size: usize,
    max_package_part_size: usize,
    parallel: bool,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    /// Creates an analyzer that uses the built-in pattern database.
    pub fn new() -> Self {
        Self {
            engine: Engine::builtin(),
            max_module_size: DEFAULT_MAX_MODULE_SIZE,
            max_package_part_size: DEFAULT_MAX_PACKAGE_PART_SIZE,
            parallel: true,
        }
    }

    /// Uses the given pattern database instead of the built-in one.
    pub fn with_patterns(
        mut self,
        db: &PatternDatabase,
    ) -> Result<Self, PatternError> {
        self.engine = Arc::new(Engine::new(db)?);
        Ok(self)
    }

    /// Maximum size of the decompressed source code of each module, and of
    /// the decompressed project metadata. Modules that exceed the limit are
    /// reported as failed.
    pub fn max_module_size(&mut self, size: usize) -> &mut Self {
        self.max_module_size = size;
        self
    }

    /// Maximum size of the parts read from OOXML packages.
    pub fn max_package_part_size(&mut self, size: usize) -> &mut Self {
        self.max_package_part_size = size;
        self
    }

    /// Decompresses and analyzes modules in parallel. This is the default,
    /// and has effect only if the `parallel` feature is enabled.
    pub fn parallel(&mut self, yes: bool) -> &mut Self {
        self.parallel = yes;
        self
    }

    /// Analyzes a file, which can be an OLE compound file or an OOXML
    /// package.
    ///
    /// A file without VBA macros is not an error, it produces an empty
    /// report.
    pub fn analyze(
        &self,
        data: &[u8],
    ) -> Result<AnalysisReport, AnalysisError> {
        let project = if is_compound_file(data) {
            let cf = CompoundFile::parse(data)?;
            vba::locate_with_limit(&cf, self.max_module_size)?
        } else if package::is_package(data) {
            package::locate_in_package(
                data,
                self.max_package_part_size,
                self.max_module_size,
            )?
        } else {
            return Err(AnalysisError::Format);
        };

        match project {
            Some(project) => Ok(self.analyze_project(&project)),
            None => {
                debug!("no VBA project found");
                Ok(AnalysisReport::default())
            }
        }
    }

    /// Analyzes the modules of a VBA project that was already located.
    pub fn analyze_project(&self, project: &VbaProject) -> AnalysisReport {
        let encoding = project.encoding();
        let process =
            |module: &ModuleStream| self.process_module(module, encoding);

        #[cfg(feature = "parallel")]
        let results: Vec<_> = if self.parallel {
            project.modules.par_iter().map(process).collect()
        } else {
            project.modules.iter().map(process).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = project.modules.iter().map(process).collect();

        let mut builder =
            ReportBuilder::new(Some(ProjectSummary::from(project)));

        for (outcome, findings) in results {
            builder.add_module(outcome, findings);
        }

        builder.build()
    }

    /// Scans source code that doesn't come from a file. `module` is the
    /// module name used in the findings.
    pub fn scan_source(&self, module: &str, source: &str) -> Vec<Finding> {
        self.engine.scan(module, source)
    }

    fn process_module(
        &self,
        module: &ModuleStream,
        encoding: &'static encoding_rs::Encoding,
    ) -> (ModuleOutcome, Vec<Finding>) {
        let start = Instant::now();

        let code = match module.decompress(self.max_module_size) {
            Ok(code) => code,
            Err(error) => {
                warn!(
                    "can not decompress module `{}` ({}): {}",
                    module.name, module.stream_path, error
                );
                return (
                    ModuleOutcome::Failed {
                        name: module.name.clone(),
                        stream_path: module.stream_path.clone(),
                        error,
                    },
                    Vec::new(),
                );
            }
        };

        let code = encoding.decode_without_bom_handling(&code).0.into_owned();
        let findings = self.engine.scan(&module.name, &code);

        debug!(
            "module `{}`: {} bytes, {} findings, {:?}",
            module.name,
            code.len(),
            findings.len(),
            start.elapsed()
        );

        (
            ModuleOutcome::Source(ModuleSource {
                name: module.name.clone(),
                stream_path: module.stream_path.clone(),
                kind: module.kind,
                code,
            }),
            findings,
        )
    }
}

/// Analyzes a file with the default settings and the built-in pattern
/// database.
///
/// See [`Analyzer::analyze`].
pub fn analyze(data: &[u8]) -> Result<AnalysisReport, AnalysisError> {
    Analyzer::new().analyze(data)
}
