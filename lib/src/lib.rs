/*! Extracts VBA macros from Microsoft Office documents and flags suspicious
constructs in their source code.

Both legacy documents stored as OLE compound files (`.doc`, `.xls`, `.ppt`)
and OOXML packages (`.docm`, `.xlsm`, `.pptm`) are supported. The VBA
project is located inside the file, the source code of each module is
decompressed, and then analyzed looking for:

- procedures that run automatically (`AutoOpen`, `Workbook_Open`, ...)
- keywords frequently used by malicious code (`Shell`, `CreateObject`, ...)
- indicators of compromise (URLs, IP addresses, executable file names)
- hex and base64 encoded strings
- strings encoded with the schemes of known malware families
- string expressions built with `Chr`, `StrReverse` and similar functions

The main entry points are [`analyze`] and [`Analyzer`], which produce an
[`AnalysisReport`] with the source code of every module and the findings of
the analysis.

# Example

```rust
# use vbascan::patterns::Category;
let analyzer = vbascan::Analyzer::new();

let findings = analyzer.scan_source(
    "Module1",
    "Sub AutoOpen()\r\n  Shell \"calc.exe\", vbHide\r\nEnd Sub\r\n",
);

assert!(findings
    .iter()
    .any(|f| f.category == Category::AutoExec && f.keyword == "AutoOpen"));

assert!(findings
    .iter()
    .any(|f| f.category == Category::Ioc && f.keyword == "calc.exe"));
```

The lower level building blocks are also public: [`olecf`] parses compound
files, [`vba`] locates VBA projects and [`compression`] implements the
compression algorithm used for VBA source code.
*/

#![deny(missing_docs)]

pub use analysis::analyze;
pub use analysis::Analyzer;
pub use analysis::Engine;
pub use analysis::DEFAULT_MAX_MODULE_SIZE;
pub use analysis::DEFAULT_MAX_PACKAGE_PART_SIZE;

pub use errors::AnalysisError;
pub use errors::CorruptStructureError;
pub use errors::DecompressionError;
pub use errors::PatternError;

pub use report::AnalysisReport;
pub use report::Counters;
pub use report::Finding;
pub use report::ModuleOutcome;
pub use report::ModuleSource;
pub use report::ProjectSummary;

mod analysis;
mod report;

pub mod compression;
pub mod errors;
pub mod olecf;
pub mod patterns;
pub mod vba;

#[cfg(test)]
mod tests;
