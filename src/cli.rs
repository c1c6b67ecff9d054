//! Command-line interface parsing for sotkafetch
//!
//! This module handles parsing of CLI arguments using clap. Every global option
//! can also come from the environment (`APP_ENV`, `CACHE_TTL`, ...), and the
//! parsed arguments are turned into [`Settings`] for the fetch layer.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cache::default_cache_dir;
use crate::config::Settings;
use crate::data::sotkanet::SOTKANET_BASE_URL;
use crate::data::{Breakdown, Environment, IndicatorSet, HUS_REGION_ID};

/// Error types for CLI argument parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    /// The environment profile name is not recognized
    #[error("Invalid environment: '{0}'. Valid environments: development, testing, production")]
    InvalidEnvironment(String),

    /// The breakdown name is not recognized
    #[error("Invalid breakdown: '{0}'. Valid breakdowns: total, male, female")]
    InvalidBreakdown(String),

    /// `--from` is after `--to`
    #[error("Invalid year range: --from {from} is after --to {to}")]
    InvalidYearRange { from: i32, to: i32 },
}

/// sotkafetch - Fetch, cache and validate Sotkanet indicators for HUS
#[derive(Parser, Debug)]
#[command(name = "sotkafetch")]
#[command(about = "Fetch, cache and validate Sotkanet health indicators for the HUS region")]
#[command(version)]
pub struct Cli {
    /// Environment profile selecting the default indicator set
    #[arg(long = "env", global = true, env = "APP_ENV", default_value = "development", value_parser = parse_environment_arg)]
    pub environment: Environment,

    /// Sotkanet region id
    #[arg(long, global = true, env = "HUS_REGION_ID", default_value = HUS_REGION_ID)]
    pub region: String,

    /// Sotkanet REST API base URL
    #[arg(long, global = true, env = "SOTKANET_BASE_URL", default_value = SOTKANET_BASE_URL)]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[arg(long, global = true, env = "API_TIMEOUT", default_value_t = 30, value_name = "SECONDS")]
    pub timeout: u64,

    /// Attempts per request, including the first
    #[arg(long, global = true, env = "API_RETRY_COUNT", default_value_t = 3)]
    pub retries: u32,

    /// Delay before the first retry in seconds; doubles on each retry
    #[arg(long, global = true, env = "API_RETRY_DELAY", default_value_t = 1, value_name = "SECONDS")]
    pub retry_delay: u64,

    /// Whether to use the cache
    #[arg(long = "cache", global = true, env = "CACHE_ENABLED", default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub cache_enabled: bool,

    /// Cache time-to-live in seconds
    #[arg(long, global = true, env = "CACHE_TTL", default_value_t = 3600, value_name = "SECONDS")]
    pub cache_ttl: u64,

    /// Cache directory (defaults to the XDG cache directory)
    #[arg(long, global = true, env = "CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Rebuild stored indicator metadata older than this many days
    #[arg(long, global = true, env = "METADATA_MAX_AGE_DAYS", default_value_t = 7, value_name = "DAYS")]
    pub metadata_max_age: u64,

    /// Rebuild stale or mismatched indicator metadata automatically
    #[arg(long, global = true, env = "METADATA_AUTO_REFRESH", default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub metadata_auto_refresh: bool,

    /// First year to fetch or check
    #[arg(long = "from", global = true, default_value_t = 2018, value_name = "YEAR")]
    pub year_from: i32,

    /// Last year to fetch or check
    #[arg(long = "to", global = true, default_value_t = 2023, value_name = "YEAR")]
    pub year_to: i32,

    /// Log filter, e.g. `info` or `sotkafetch=debug`
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch indicator values (cache first)
    Fetch {
        /// Indicator ids; defaults to the environment's indicator set
        #[arg(short, long = "indicator", value_name = "ID")]
        indicators: Vec<String>,

        /// Population breakdown
        #[arg(short, long, default_value = "total", value_parser = parse_breakdown_arg)]
        breakdown: Breakdown,

        /// Write the rows as CSV to this file instead of printing a table
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,

        /// Abandon fetches still running after this many seconds
        #[arg(long, default_value_t = 120, value_name = "SECONDS")]
        batch_timeout: u64,
    },

    /// Check which indicators have data for the region
    Validate {
        /// Indicator ids; defaults to the environment's indicator set
        #[arg(short, long = "indicator", value_name = "ID")]
        indicators: Vec<String>,
    },

    /// Show indicator titles, using stored metadata while it is fresh
    Metadata {
        /// Indicator ids; defaults to the environment's indicator set
        #[arg(short, long = "indicator", value_name = "ID")]
        indicators: Vec<String>,

        /// Fetch metadata again even if the stored copy is fresh
        #[arg(long)]
        refresh: bool,

        /// Report on the stored metadata without contacting the API
        #[arg(long, conflicts_with = "refresh")]
        status: bool,
    },

    /// List the indicator set of the selected environment
    Indicators,

    /// Remove cached responses and stored metadata
    ClearCache,
}

impl Command {
    /// Indicator ids passed on the command line, if the command takes any
    pub fn indicator_args(&self) -> &[String] {
        match self {
            Command::Fetch { indicators, .. }
            | Command::Validate { indicators }
            | Command::Metadata { indicators, .. } => indicators,
            Command::Indicators | Command::ClearCache => &[],
        }
    }
}

/// Parses an environment profile argument.
pub fn parse_environment_arg(s: &str) -> Result<Environment, CliError> {
    Environment::from_str(s).ok_or_else(|| CliError::InvalidEnvironment(s.to_string()))
}

/// Parses a breakdown argument.
pub fn parse_breakdown_arg(s: &str) -> Result<Breakdown, CliError> {
    Breakdown::from_str(s).ok_or_else(|| CliError::InvalidBreakdown(s.to_string()))
}

impl Cli {
    /// Indicators to work on: explicit `--indicator` flags, or the
    /// environment's set when none were given
    pub fn indicator_set(&self) -> IndicatorSet {
        let explicit = self.command.indicator_args();
        if explicit.is_empty() {
            self.environment.indicator_set()
        } else {
            IndicatorSet::new(explicit.iter().cloned())
        }
    }
}

impl Settings {
    /// Creates Settings from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(Settings)` with the resolved configuration
    /// * `Err(CliError)` if the year range is reversed
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        if cli.year_from > cli.year_to {
            return Err(CliError::InvalidYearRange {
                from: cli.year_from,
                to: cli.year_to,
            });
        }

        Ok(Settings {
            environment: cli.environment,
            region_id: cli.region.clone(),
            base_url: cli.base_url.clone(),
            request_timeout: Duration::from_secs(cli.timeout),
            max_attempts: cli.retries.max(1),
            retry_delay: Duration::from_secs(cli.retry_delay),
            retry_jitter: true,
            cache_enabled: cli.cache_enabled,
            cache_ttl: Duration::from_secs(cli.cache_ttl),
            cache_dir: cli.cache_dir.clone().or_else(default_cache_dir),
            metadata_max_age: Duration::from_secs(cli.metadata_max_age.saturating_mul(24 * 60 * 60)),
            metadata_auto_refresh: cli.metadata_auto_refresh,
            years: cli.year_from..=cli.year_to,
            log_level: cli.log_level.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_environment_arg() {
        assert_eq!(parse_environment_arg("production").unwrap(), Environment::Production);
        assert_eq!(parse_environment_arg("test").unwrap(), Environment::Testing);

        let err = parse_environment_arg("staging").unwrap_err();
        assert!(err.to_string().contains("Invalid environment"));
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn test_parse_breakdown_arg() {
        assert_eq!(parse_breakdown_arg("male").unwrap(), Breakdown::Male);
        assert_eq!(parse_breakdown_arg("Female").unwrap(), Breakdown::Female);
        assert_eq!(
            parse_breakdown_arg("other").unwrap_err(),
            CliError::InvalidBreakdown("other".to_string())
        );
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["sotkafetch", "indicators"]).unwrap();
        assert_eq!(cli.command, Command::Indicators);
        assert_eq!(cli.region, "629");
        assert_eq!(cli.timeout, 30);
        assert_eq!(cli.retries, 3);
        assert!(cli.cache_enabled);
        assert_eq!(cli.cache_ttl, 3600);
        assert_eq!((cli.year_from, cli.year_to), (2018, 2023));
    }

    #[test]
    fn test_cli_fetch_with_indicators_and_breakdown() {
        let cli = Cli::try_parse_from([
            "sotkafetch", "fetch", "-i", "186", "--indicator", "322", "--breakdown", "female",
        ])
        .unwrap();

        match &cli.command {
            Command::Fetch {
                indicators,
                breakdown,
                csv,
                ..
            } => {
                assert_eq!(indicators, &["186".to_string(), "322".to_string()]);
                assert_eq!(*breakdown, Breakdown::Female);
                assert!(csv.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.indicator_set().ids(), ["186", "322"]);
    }

    #[test]
    fn test_cli_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "sotkafetch", "validate", "--env", "production", "--from", "2015", "--cache", "false",
        ])
        .unwrap();
        assert_eq!(cli.environment, Environment::Production);
        assert_eq!(cli.year_from, 2015);
        assert!(!cli.cache_enabled);
        assert_eq!(cli.indicator_set().len(), 6);
    }

    #[test]
    fn test_cli_rejects_invalid_breakdown() {
        let result = Cli::try_parse_from(["sotkafetch", "fetch", "--breakdown", "children"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_from_cli() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = temp_dir.path().to_string_lossy().to_string();
        let cli = Cli::try_parse_from([
            "sotkafetch",
            "fetch",
            "--cache-ttl",
            "60",
            "--retries",
            "5",
            "--cache-dir",
            dir.as_str(),
            "--from",
            "2020",
            "--to",
            "2021",
        ])
        .unwrap();

        let settings = Settings::from_cli(&cli).unwrap();
        assert_eq!(settings.cache_ttl, Duration::from_secs(60));
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.cache_dir.as_deref(), Some(temp_dir.path()));
        assert_eq!(settings.years, 2020..=2021);
    }

    #[test]
    fn test_cli_metadata_options() {
        let cli = Cli::try_parse_from([
            "sotkafetch",
            "metadata",
            "--refresh",
            "--metadata-max-age",
            "1",
            "--metadata-auto-refresh",
            "false",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Metadata { refresh: true, status: false, .. }));

        let settings = Settings::from_cli(&cli).unwrap();
        assert_eq!(settings.metadata_max_age, Duration::from_secs(24 * 60 * 60));
        assert!(!settings.metadata_auto_refresh);

        assert!(Cli::try_parse_from(["sotkafetch", "metadata", "--refresh", "--status"]).is_err());
    }

    #[test]
    fn test_settings_from_cli_rejects_reversed_years() {
        let cli = Cli::try_parse_from(["sotkafetch", "indicators", "--from", "2023", "--to", "2018"]).unwrap();
        assert_eq!(
            Settings::from_cli(&cli).unwrap_err(),
            CliError::InvalidYearRange {
                from: 2023,
                to: 2018
            }
        );
    }
}
