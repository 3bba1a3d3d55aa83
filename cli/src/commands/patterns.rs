use clap::{arg, value_parser, ArgMatches, Command, ValueEnum};
use serde::Serialize;
use vbascan::patterns::{
    Category, FamilySignature, Pattern, PatternEntry, Thresholds, VERSION,
};
use yansi::Color::{Cyan, Green, Yellow};
use yansi::Paint;

use crate::commands::{pattern_database, OutputFormats};
use crate::config::Config;
use crate::help;

#[derive(Clone, Copy, ValueEnum)]
enum CategoryArg {
    AutoExec,
    Suspicious,
    Ioc,
    HexString,
    Base64String,
    FamilyEncoding,
    VbaString,
}

impl From<CategoryArg> for Category {
    fn from(value: CategoryArg) -> Self {
        match value {
            CategoryArg::AutoExec => Category::AutoExec,
            CategoryArg::Suspicious => Category::Suspicious,
            CategoryArg::Ioc => Category::Ioc,
            CategoryArg::HexString => Category::HexString,
            CategoryArg::Base64String => Category::Base64String,
            CategoryArg::FamilyEncoding => Category::FamilyEncoding,
            CategoryArg::VbaString => Category::VbaString,
        }
    }
}

#[rustfmt::skip]
pub fn patterns() -> Command {
    super::command("patterns")
        .about("List the patterns used by the analysis")
        .long_about(help::PATTERNS_LONG_HELP)
        .arg(
            arg!(-c --"category" <CATEGORY>)
                .help("Show only the patterns in the given category")
                .value_parser(value_parser!(CategoryArg))
        )
        .arg(
            arg!(-o --"output-format" <FORMAT>)
                .help("Output format for results")
                .long_help(help::OUTPUT_FORMAT_LONG_HELP)
                .value_parser(value_parser!(OutputFormats))
        )
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    version: &'a str,
    patterns: Vec<&'a PatternEntry>,
    families: &'a [FamilySignature],
    thresholds: &'a Thresholds,
}

pub fn exec_patterns(args: &ArgMatches, config: &Config) -> anyhow::Result<()> {
    let category = args.get_one::<CategoryArg>("category").copied();
    let db = pattern_database(config, None)?;

    let entries: Vec<&PatternEntry> = db
        .entries()
        .iter()
        .filter(|entry| {
            category.map_or(true, |c| entry.category == Category::from(c))
        })
        .collect();

    let show_families = category
        .map_or(true, |c| matches!(c, CategoryArg::FamilyEncoding));

    match args.get_one::<OutputFormats>("output-format") {
        Some(OutputFormats::Json) => {
            let output = JsonOutput {
                version: VERSION,
                patterns: entries,
                families: if show_families { db.families() } else { &[] },
                thresholds: db.thresholds(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Some(OutputFormats::Text) | None => {
            println!("Pattern database version {}\n", VERSION);

            for entry in entries {
                let (kind, pattern) = match &entry.pattern {
                    Pattern::Keyword(keyword) => ("keyword", keyword),
                    Pattern::Regex(regex) => ("regex", regex),
                };
                println!(
                    "{} {} {}",
                    format!("[{}]", entry.category).paint(Yellow).bold(),
                    format!("{kind:<7}").paint(Cyan),
                    pattern
                );
                println!("    {}", entry.description.as_str().paint(Green));
            }

            if show_families {
                for family in db.families() {
                    println!(
                        "{} {}",
                        format!("[{}]", Category::FamilyEncoding)
                            .paint(Yellow)
                            .bold(),
                        family.family
                    );
                    println!("    {}", family.description.as_str().paint(Green));
                }
            }
        }
    }

    Ok(())
}
