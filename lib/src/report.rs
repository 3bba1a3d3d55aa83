/*! Result of analyzing a file.

An [`AnalysisReport`] contains the outcome for each module of the VBA
project, the findings of the analysis and a set of counters that summarize
them. Reports are built by [`crate::Analyzer`] and are immutable once
returned.
*/

use std::fmt::Display;

use serde::{Serialize, Serializer};

use crate::errors::DecompressionError;
use crate::patterns::Category;
use crate::vba::{ModuleKind, ProjectInfo, VbaProject};

/// Decompressed source code of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSource {
    /// Module name.
    pub name: String,
    /// Path of the stream the module was extracted from.
    pub stream_path: String,
    /// Module type.
    pub kind: ModuleKind,
    /// Source code.
    pub code: String,
}

impl ModuleSource {
    /// Name of the file where the module is extracted, the module name
    /// with extension `.bas` or `.cls`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.kind.extension())
    }
}

/// What happened with a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModuleOutcome {
    /// The module was decompressed and analyzed.
    Source(ModuleSource),
    /// The module couldn't be decompressed. It doesn't contribute any
    /// findings.
    Failed {
        /// Module name.
        name: String,
        /// Path of the stream the module was extracted from.
        stream_path: String,
        /// Why decompression failed.
        #[serde(serialize_with = "serialize_display")]
        error: DecompressionError,
    },
}

impl ModuleOutcome {
    /// Module name.
    pub fn name(&self) -> &str {
        match self {
            ModuleOutcome::Source(source) => source.name.as_str(),
            ModuleOutcome::Failed { name, .. } => name.as_str(),
        }
    }
}

fn serialize_display<T: Display, S: Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Something interesting found in the source code of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// Category of the finding.
    pub category: Category,
    /// Malware family, for [`Category::FamilyEncoding`] findings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    /// The keyword, the matched text, or the decoded string for encoded
    /// strings.
    pub keyword: String,
    /// Description of the keyword, or the original text for encoded
    /// strings.
    pub description: String,
    /// Module where the finding was found.
    pub module: String,
    /// Byte offset of the first occurrence within the module source.
    pub offset: usize,
    /// Number of occurrences in the module.
    pub count: usize,
}

impl Finding {
    /// A label for the type of finding, like `AutoExec`, `IOC` or
    /// `Dridex String`.
    pub fn label(&self) -> String {
        match (self.category, &self.family) {
            (Category::FamilyEncoding, Some(family)) => {
                format!("{} String", family)
            }
            (category, _) => category.to_string(),
        }
    }
}

/// Number of distinct findings per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Obfuscated VBA string expressions.
    pub vba_strings: usize,
    /// Indicators of compromise.
    pub iocs: usize,
    /// Auto-exec keywords.
    pub autoexec: usize,
    /// Suspicious keywords.
    pub suspicious: usize,
    /// Hex-encoded strings.
    pub hex_strings: usize,
    /// Base64-encoded strings.
    pub base64_strings: usize,
    /// Strings encoded with a family-specific scheme.
    pub family_strings: usize,
}

impl Counters {
    fn add(&mut self, category: Category) {
        let counter = match category {
            Category::AutoExec => &mut self.autoexec,
            Category::Suspicious => &mut self.suspicious,
            Category::Ioc => &mut self.iocs,
            Category::HexString => &mut self.hex_strings,
            Category::Base64String => &mut self.base64_strings,
            Category::FamilyEncoding => &mut self.family_strings,
            Category::VbaString => &mut self.vba_strings,
        };
        *counter += 1;
    }
}

/// Summary of the VBA project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    /// Information from the project metadata.
    #[serde(flatten)]
    pub info: ProjectInfo,
    /// Path of the `VBA` storage.
    pub storage_path: String,
    /// Package part that contains the project, for OOXML packages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_part: Option<String>,
}

impl From<&VbaProject> for ProjectSummary {
    fn from(project: &VbaProject) -> Self {
        Self {
            info: project.info.clone(),
            storage_path: project.storage_path.clone(),
            package_part: project.package_part.clone(),
        }
    }
}

/// Result of analyzing a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    project: Option<ProjectSummary>,
    modules: Vec<ModuleOutcome>,
    findings: Vec<Finding>,
    counters: Counters,
}

impl AnalysisReport {
    /// Returns `true` if the file contains a VBA project.
    pub fn has_macros(&self) -> bool {
        self.project.is_some()
    }

    /// Summary of the VBA project, `None` if the file doesn't have one.
    pub fn project(&self) -> Option<&ProjectSummary> {
        self.project.as_ref()
    }

    /// Outcome of every module, in the order they appear in the project.
    pub fn modules(&self) -> &[ModuleOutcome] {
        self.modules.as_slice()
    }

    /// Source code of the modules that were decompressed successfully.
    pub fn sources(&self) -> impl Iterator<Item = &ModuleSource> {
        self.modules.iter().filter_map(|outcome| match outcome {
            ModuleOutcome::Source(source) => Some(source),
            ModuleOutcome::Failed { .. } => None,
        })
    }

    /// Findings, ordered by module and by offset within the module.
    pub fn findings(&self) -> &[Finding] {
        self.findings.as_slice()
    }

    /// Counters.
    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}

/// Merges the results of each module into a report, in module order.
pub(crate) struct ReportBuilder {
    report: AnalysisReport,
}

impl ReportBuilder {
    pub fn new(project: Option<ProjectSummary>) -> Self {
        Self { report: AnalysisReport { project, ..Default::default() } }
    }

    pub fn add_module(
        &mut self,
        outcome: ModuleOutcome,
        findings: Vec<Finding>,
    ) -> &mut Self {
        for finding in &findings {
            self.report.counters.add(finding.category);
        }
        self.report.modules.push(outcome);
        self.report.findings.extend(findings);
        self
    }

    pub fn build(self) -> AnalysisReport {
        self.report
    }
}
