//! Runtime settings
//!
//! [`Settings`] collects the read-only startup parameters of the fetch layer.
//! Defaults match the public Sotkanet API and the HUS region; the CLI builds
//! its settings from flags and environment variables.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::DEFAULT_METADATA_MAX_AGE;
use crate::data::sotkanet::{DEFAULT_REQUEST_TIMEOUT, SOTKANET_BASE_URL};
use crate::data::{Environment, IndicatorSet, HUS_REGION_ID};
use crate::fetcher::DEFAULT_CACHE_TTL;
use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
use crate::validator::DEFAULT_CHECK_YEARS;

/// Startup parameters for the fetch layer
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Profile selecting the indicator set
    pub environment: Environment,
    pub region_id: String,
    pub base_url: String,
    /// Timeout for a single upstream request
    pub request_timeout: Duration,
    pub max_attempts: u32,
    /// Delay before the first retry
    pub retry_delay: Duration,
    pub retry_jitter: bool,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    /// On-disk cache directory; `None` keeps the cache in memory only
    pub cache_dir: Option<PathBuf>,
    /// Stored indicator metadata older than this is rebuilt
    pub metadata_max_age: Duration,
    pub metadata_auto_refresh: bool,
    /// Default year span for fetches and validation
    pub years: RangeInclusive<i32>,
    /// `tracing` filter directive, e.g. `info` or `sotkafetch=debug`
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            region_id: HUS_REGION_ID.to_string(),
            base_url: SOTKANET_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_BASE_DELAY,
            retry_jitter: true,
            cache_enabled: true,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_dir: None,
            metadata_max_age: DEFAULT_METADATA_MAX_AGE,
            metadata_auto_refresh: true,
            years: DEFAULT_CHECK_YEARS,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Indicator set for the configured environment
    pub fn indicator_set(&self) -> IndicatorSet {
        self.environment.indicator_set()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: self.retry_delay,
            jitter: self.retry_jitter,
        }
    }
}
