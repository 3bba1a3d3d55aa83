mod analyze;
mod patterns;

pub use analyze::*;
pub use patterns::*;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{arg, command, crate_authors, Command, ValueEnum};
use vbascan::patterns::PatternDatabase;

use crate::config::{load_patterns_from_file, Config};
use crate::{commands, help, APP_HELP_TEMPLATE};

#[derive(Clone, ValueEnum)]
enum OutputFormats {
    /// Default output format.
    Text,
    /// A single JSON document.
    Json,
}

pub fn command(name: &'static str) -> Command {
    Command::new(name).help_template(
        r#"{about-with-newline}
{usage-heading}
  {usage}

{all-args}
"#,
    )
}

pub fn cli() -> Command {
    command!()
        .name("vbascan")
        .author(crate_authors!("\n")) // requires `cargo` feature
        .arg_required_else_help(true)
        .arg(
            arg!(-C --config <CONFIG_FILE> "Config file")
                .value_parser(existing_path_parser)
                .long_help(help::CONFIG_FILE),
        )
        .help_template(APP_HELP_TEMPLATE)
        .subcommand_required(true)
        .subcommands(vec![commands::analyze(), commands::patterns()])
}

/// Parses a path and makes sure that it exists.
fn existing_path_parser(input: &str) -> Result<PathBuf, anyhow::Error> {
    let path = PathBuf::from(input);
    if path.try_exists()? {
        Ok(path)
    } else {
        Err(anyhow!("file not found"))
    }
}

/// Builds the pattern database used by the commands: the built-in one,
/// extended with the patterns in the config file and in `patterns_file`.
fn pattern_database(
    config: &Config,
    patterns_file: Option<&Path>,
) -> anyhow::Result<PatternDatabase> {
    let mut db = PatternDatabase::builtin().clone();

    db.extend(config.pattern_set());

    if let Some(path) = patterns_file {
        let set = load_patterns_from_file(path).with_context(|| {
            format!("can not load patterns from `{}`", path.display())
        })?;
        db.extend(set);
    }

    Ok(db)
}
