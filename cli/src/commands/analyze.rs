use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{arg, value_parser, ArgMatches, Command};
use serde::Serialize;
use sha2::{Digest, Sha256};
use vbascan::{AnalysisReport, Analyzer, ModuleOutcome};
use yansi::Color::{Blue, Green, Red, Yellow};
use yansi::Paint;

use crate::commands::{pattern_database, OutputFormats};
use crate::config::Config;
use crate::help;

const SEPARATOR_WIDTH: usize = 30;

#[rustfmt::skip]
pub fn analyze() -> Command {
    super::command("analyze")
        .about("Extract and analyze the VBA macros in a file")
        .long_about(help::ANALYZE_LONG_HELP)
        .arg(
            arg!(<FILE>)
                .help("Path to the file that will be analyzed")
                .value_parser(value_parser!(PathBuf))
        )
        // Keep options sorted alphabetically by their long name.
        // For instance, --bar goes before --foo.
        .arg(
            arg!(--"max-module-size" <BYTES>)
                .help("Maximum size of the decompressed source of a module")
                .long_help(help::MAX_MODULE_SIZE_LONG_HELP)
                .value_parser(value_parser!(usize))
        )
        .arg(
            arg!(-n --"no-extract")
                .help("Don't save the source code of the modules")
        )
        .arg(
            arg!(-d --"output-dir" <OUTPUT_DIR>)
                .help("Directory where the extracted macros are saved")
                .long_help(help::OUTPUT_DIR_LONG_HELP)
                .value_parser(value_parser!(PathBuf))
        )
        .arg(
            arg!(-o --"output-format" <FORMAT>)
                .help("Output format for results")
                .long_help(help::OUTPUT_FORMAT_LONG_HELP)
                .value_parser(value_parser!(OutputFormats))
        )
        .arg(
            arg!(-p --"patterns" <PATTERNS_FILE>)
                .help("Load additional patterns from a file")
                .long_help(help::PATTERNS_FILE_LONG_HELP)
                .value_parser(value_parser!(PathBuf))
        )
}

/// What the `json` output format prints.
#[derive(Serialize)]
struct JsonOutput<'a> {
    path: String,
    sha256: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dir: Option<String>,
    #[serde(flatten)]
    report: &'a AnalysisReport,
}

pub fn exec_analyze(args: &ArgMatches, config: &Config) -> anyhow::Result<()> {
    let file_path = args.get_one::<PathBuf>("FILE").unwrap();
    let max_module_size = args.get_one::<usize>("max-module-size");
    let patterns_file = args.get_one::<PathBuf>("patterns");
    let output_dir = args.get_one::<PathBuf>("output-dir");

    let data = fs::read(file_path)
        .with_context(|| format!("can not read `{}`", file_path.display()))?;

    let sha256 = format!("{:x}", Sha256::digest(&data));

    let db = pattern_database(config, patterns_file.map(PathBuf::as_path))?;
    let mut analyzer = Analyzer::new().with_patterns(&db)?;

    analyzer
        .max_module_size(
            max_module_size
                .copied()
                .unwrap_or(config.analysis.max_module_size),
        )
        .max_package_part_size(config.analysis.max_package_part_size);

    let report = analyzer.analyze(&data).with_context(|| {
        format!("can not analyze `{}`", file_path.display())
    })?;

    let analysis_path = if args.get_flag("no-extract") {
        None
    } else {
        let path = output_dir
            .cloned()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(&sha256);
        extract_macros(&report, &path)?;
        Some(path)
    };

    match args.get_one::<OutputFormats>("output-format") {
        Some(OutputFormats::Json) => {
            let output = JsonOutput {
                path: file_path.display().to_string(),
                sha256: &sha256,
                output_dir: analysis_path
                    .as_ref()
                    .map(|path| path.display().to_string()),
                report: &report,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Some(OutputFormats::Text) | None => {
            print_report(&report, analysis_path.as_deref());
        }
    }

    Ok(())
}

/// Removes `path` if it exists, creates it again and saves the source code
/// of every module in it.
fn extract_macros(report: &AnalysisReport, path: &Path) -> anyhow::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path).with_context(|| {
            format!("can not remove `{}`", path.display())
        })?;
    }

    fs::create_dir_all(path)
        .with_context(|| format!("can not create `{}`", path.display()))?;

    for (source, file_name) in
        report.sources().zip(output_file_names(report))
    {
        let file_path = path.join(file_name);
        fs::write(&file_path, source.code.as_bytes()).with_context(|| {
            format!("can not write `{}`", file_path.display())
        })?;
    }

    Ok(())
}

/// Returns the name of the file where the source code of each module is
/// saved, in the same order as [`AnalysisReport::sources`].
///
/// Two modules can have the same name, or names that only differ in
/// characters replaced by [`safe_file_name`]. Repeated names, compared
/// case-insensitively, get a numeric suffix: `Module1.bas`, `Module1_1.bas`.
fn output_file_names(report: &AnalysisReport) -> Vec<String> {
    let mut used = HashSet::new();
    report
        .sources()
        .map(|source| {
            let name = safe_file_name(&source.name);
            let extension = source.kind.extension();
            let mut file_name = format!("{name}.{extension}");
            let mut suffix = 1;
            while !used.insert(file_name.to_lowercase()) {
                file_name = format!("{name}_{suffix}.{extension}");
                suffix += 1;
            }
            file_name
        })
        .collect()
}

/// Module names come from the analyzed file, they must not be able to
/// escape the output directory.
fn safe_file_name(name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if name.trim_matches('.').is_empty() {
        format!("_{}", name)
    } else {
        name
    }
}

fn separator() {
    println!("\n{}\n", "-".repeat(SEPARATOR_WIDTH).paint(Blue).bold());
}

fn print_report(report: &AnalysisReport, analysis_path: Option<&Path>) {
    separator();

    if !report.has_macros() {
        println!("{}", "No VBA Macros were found in this file".paint(Green));
        return;
    }

    println!("{}", "VBA Macros found".paint(Red).bold());

    let mut file_names = output_file_names(report).into_iter();

    for module in report.modules() {
        separator();
        match module {
            ModuleOutcome::Source(source) => {
                let file_name = source.file_name();
                println!(
                    "{}",
                    format!("OLE stream    : {}", source.stream_path).paint(Green)
                );
                println!(
                    "{}",
                    format!("VBA filename  : {}", file_name).paint(Green)
                );
                let saved_as = file_names.next();
                if let Some((path, saved_as)) = analysis_path.zip(saved_as) {
                    let saved = path.join(saved_as);
                    println!(
                        "{}",
                        format!("\nSaved in: \"{}\"\n", saved.display())
                            .paint(Yellow)
                    );
                }
            }
            ModuleOutcome::Failed { name, stream_path, error } => {
                println!(
                    "{}",
                    format!("OLE stream    : {}", stream_path).paint(Green)
                );
                println!(
                    "{}",
                    format!("VBA module    : {}", name).paint(Green)
                );
                println!(
                    "{} {}",
                    "Can not decompress:".paint(Red).bold(),
                    error
                );
            }
        }
    }

    separator();
    println!("{}", "Keywords: \n".paint(Red).bold());

    for finding in report.findings() {
        println!("{}", format!("Type: {}", finding.label()).paint(Yellow));
        println!(
            "{}",
            format!(
                "Keyword: {}\nDescription: {}\n",
                finding.keyword.escape_debug(),
                finding.description.escape_debug()
            )
            .paint(Green)
        );
    }

    let counters = report.counters();

    separator();
    println!("{}", "Analysis: \n".paint(Red).bold());

    for (label, count) in [
        ("VBA obfuscated strings", counters.vba_strings),
        ("IOCs", counters.iocs),
        ("AutoExec keywords", counters.autoexec),
        ("Suspicious keywords", counters.suspicious),
        ("Hex obfuscated strings", counters.hex_strings),
        ("Base64 obfuscated strings", counters.base64_strings),
        ("Family obfuscated strings", counters.family_strings),
    ] {
        println!("{}", format!("{}: {}", label, count).paint(Yellow));
    }
}
