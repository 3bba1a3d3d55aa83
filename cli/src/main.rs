mod commands;
mod config;
mod help;

use std::path::PathBuf;
use std::{io, panic, process};

use anyhow::Context;
use clap::ArgMatches;
use config::{load_config_from_file, Config};
use crossterm::tty::IsTty;
use yansi::Color::Red;
use yansi::Paint;

use crate::commands::cli;

const APP_HELP_TEMPLATE: &str = r#"vbascan {version}, extracts and triages the VBA macros in Office documents.

{author-with-newline}
{before-help}{usage-heading}
  {usage}

{all-args}{after-help}
"#;

const EXIT_ERROR: i32 = 1;
const CONFIG_FILE: &str = ".vbascan.toml";

fn main() -> anyhow::Result<()> {
    // Enable support for ANSI escape codes in Windows. In other platforms
    // this is a no-op.
    if let Err(err) = enable_ansi_support::enable_ansi_support() {
        println!("could not enable ANSI support: {}", err)
    }

    #[cfg(feature = "logging")]
    env_logger::init();

    // If stdout is not a tty (for example, because it was redirected to a
    // file) turn off colors. This way you can redirect the output to a file
    // without ANSI escape codes messing up the file content.
    if !io::stdout().is_tty() {
        yansi::disable();
    }

    let args = cli().get_matches_from(wild::args());

    // Modules are analyzed in rayon's thread pool. A panic in any of them
    // must terminate the process instead of leaving it half-done.
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(EXIT_ERROR);
    }));

    let result = load_config(&args).and_then(|config| {
        match args.subcommand() {
            Some(("analyze", args)) => commands::exec_analyze(args, &config),
            Some(("patterns", args)) => commands::exec_patterns(args, &config),
            _ => unreachable!(),
        }
    });

    if let Err(err) = result {
        if let Some(source) = err.source() {
            eprintln!("{} {}: {}", "error:".paint(Red).bold(), err, source);
        } else {
            eprintln!("{} {}", "error:".paint(Red).bold(), err);
        }
        process::exit(EXIT_ERROR);
    }

    Ok(())
}

/// Loads the file given with `--config`. Without that option the config
/// file in the home directory is used, if it exists and is valid.
fn load_config(args: &ArgMatches) -> anyhow::Result<Config> {
    if let Some(path) = args.get_one::<PathBuf>("config") {
        return load_config_from_file(path).with_context(|| {
            format!("can not load config file `{}`", path.display())
        });
    }

    Ok(match home::home_dir() {
        Some(home_path) if !home_path.as_os_str().is_empty() => {
            load_config_from_file(&home_path.join(CONFIG_FILE))
                .unwrap_or_default()
        }
        _ => Config::default(),
    })
}
