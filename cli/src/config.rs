use std::path::Path;

use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use vbascan::patterns::{FamilySignature, PatternEntry, PatternSet, Thresholds};

/// Configuration for the CLI.
#[derive(Deserialize, Serialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Configuration for the `analyze` command.
    pub analysis: AnalysisConfig,
    /// Patterns added to the built-in database.
    pub patterns: Vec<PatternEntry>,
    /// Family signatures added to the built-in database.
    pub families: Vec<FamilySignature>,
}

/// Configuration for the `analyze` command.
#[derive(Deserialize, Serialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Maximum size of the decompressed source of a module.
    pub max_module_size: usize,
    /// Maximum size of a part read from an OOXML package.
    pub max_package_part_size: usize,
    /// Thresholds that replace the built-in ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<Thresholds>,
}

impl Default for AnalysisConfig {
    fn default() -> AnalysisConfig {
        AnalysisConfig {
            max_module_size: vbascan::DEFAULT_MAX_MODULE_SIZE,
            max_package_part_size: vbascan::DEFAULT_MAX_PACKAGE_PART_SIZE,
            thresholds: None,
        }
    }
}

impl Config {
    /// The patterns, families and thresholds in the config file.
    pub fn pattern_set(&self) -> PatternSet {
        PatternSet {
            patterns: self.patterns.clone(),
            families: self.families.clone(),
            thresholds: self.analysis.thresholds.clone(),
        }
    }
}

/// Load a config file from a given path. Path must contain a valid TOML file
/// or this function will propagate the error.
pub fn load_config_from_file(
    config_file: &Path,
) -> Result<Config, Box<figment::Error>> {
    let config: Config =
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file_exact(config_file))
            .extract()?;
    Ok(config)
}

/// Loads a file with additional patterns. It has the same `[[patterns]]`
/// and `[[families]]` arrays as the config file, and an optional
/// `[thresholds]` table.
pub fn load_patterns_from_file(
    patterns_file: &Path,
) -> Result<PatternSet, Box<figment::Error>> {
    let set: PatternSet =
        Figment::from(Toml::file_exact(patterns_file)).extract()?;
    Ok(set)
}
