//! Configuration merger for CLI arguments and config files
//!
//! CLI arguments override values loaded from files and `MFW_*` variables.

use super::parser::{Cli, Commands};
use crate::config::error::ConfigError;
use crate::config::{ConfigLoader, settings::Settings};

/// Applies CLI overrides on top of file-based configuration
pub struct ConfigurationMerger {
    base_config: Settings,
}

impl ConfigurationMerger {
    pub fn new(base_config: Settings) -> Self {
        Self { base_config }
    }

    /// Load the unvalidated base configuration selected by `--config` / `--env`
    ///
    /// Validation runs after the CLI overrides are merged in.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut loader = ConfigLoader::new()?;
        if let Some(path) = &cli.config {
            loader = loader.with_config_file(path);
        }
        if let Some(env) = &cli.env {
            loader = loader.with_environment(env.clone().into());
        }

        Ok(Self::new(loader.load_unvalidated()?))
    }

    /// Merge CLI arguments with the base configuration and validate the result
    pub fn merge_cli_args(&self, cli: &Cli) -> Result<Settings, ConfigError> {
        let mut config = self.base_config.clone();

        if cli.verbose {
            config.logger.level = "debug".to_string();
        } else if cli.quiet {
            config.logger.level = "error".to_string();
        }

        // Command-specific level wins over the global flags
        if let Some(Commands::Run {
            log_level: Some(level),
            ..
        }) = &cli.command
        {
            config.logger.level = level.clone().into();
        }

        config.validate()?;

        Ok(config)
    }

    pub fn config(&self) -> &Settings {
        &self.base_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::parser::Cli;
    use clap::Parser;
    use std::io::Write;

    fn create_valid_base_config() -> Settings {
        let mut config = Settings::default();
        config.database.url = "postgres://localhost/test".to_string();
        config
    }

    #[test]
    fn test_configuration_merger_new() {
        let base_config = Settings::default();
        let merger = ConfigurationMerger::new(base_config.clone());
        assert_eq!(merger.config(), &base_config);
    }

    #[test]
    fn test_merge_verbose_and_quiet_flags() {
        let merger = ConfigurationMerger::new(create_valid_base_config());

        let cli = Cli::try_parse_from(["mfw-queue", "--verbose"]).unwrap();
        assert_eq!(merger.merge_cli_args(&cli).unwrap().logger.level, "debug");

        let cli = Cli::try_parse_from(["mfw-queue", "--quiet"]).unwrap();
        assert_eq!(merger.merge_cli_args(&cli).unwrap().logger.level, "error");
    }

    #[test]
    fn test_run_log_level_overrides_global() {
        let merger = ConfigurationMerger::new(create_valid_base_config());

        let cli =
            Cli::try_parse_from(["mfw-queue", "--verbose", "run", "--log-level", "warn"]).unwrap();
        let merged_config = merger.merge_cli_args(&cli).unwrap();

        assert_eq!(merged_config.logger.level, "warn");
    }

    #[test]
    fn test_merged_config_is_validated() {
        let mut config = create_valid_base_config();
        config.dispatcher.claim_limit = 0;
        let merger = ConfigurationMerger::new(config);

        let cli = Cli::try_parse_from(["mfw-queue", "stats"]).unwrap();
        assert!(merger.merge_cli_args(&cli).is_err());
    }

    #[test]
    fn test_from_cli_reads_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[database]\nurl = \"postgres://localhost/from_file\"\n\n[dispatcher]\nclaim_limit = 7"
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let cli = Cli::try_parse_from(["mfw-queue", "--config", &path, "stats"]).unwrap();
        let merger = ConfigurationMerger::from_cli(&cli).unwrap();

        assert_eq!(merger.config().database.url, "postgres://localhost/from_file");
        assert_eq!(merger.config().dispatcher.claim_limit, 7);
    }
}
