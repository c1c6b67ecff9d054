//! Cache-first indicator fetching
//!
//! [`Fetcher`] answers "rows for this request" by consulting the cache, falling
//! back to the upstream source through the retry policy, and serving expired
//! cache entries when the upstream cannot be reached.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::io;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::config::Settings;
use crate::data::{DataPoint, IndicatorRequest, IndicatorSource, UpstreamError, ValidationResult};
use crate::retry::{RetryError, RetryPolicy};
use crate::validator::DataValidator;

/// Default lifetime of cached rows
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Where a successful answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Fetched from the upstream during this call
    Fetched,
    /// Served from an unexpired cache entry
    Cached,
    /// Upstream failed; served from an expired cache entry
    Degraded,
}

/// Rows returned by [`Fetcher::get_data`]
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub rows: Vec<DataPoint>,
    pub freshness: Freshness,
    /// When the rows were obtained from the upstream
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}

impl FetchOutcome {
    fn from_entry(entry: &CacheEntry, freshness: Freshness) -> Self {
        Self {
            rows: entry.rows.clone(),
            freshness,
            fetched_at: entry.fetched_at,
        }
    }

    /// True when stale data was served in place of a failed fetch
    pub fn is_degraded(&self) -> bool {
        self.freshness == Freshness::Degraded
    }
}

/// Coarse classification of a [`FetchError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    NetworkUnavailable,
    UpstreamRejected,
    TimedOut,
}

/// A request that could not be answered, even from stale cache
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Transient failures on every attempt and nothing cached
    #[error("network unavailable for indicator {indicator_id} after {attempts} attempts: {last}")]
    NetworkUnavailable {
        indicator_id: String,
        attempts: u32,
        last: UpstreamError,
    },

    /// The upstream refused the request and nothing was cached
    #[error("upstream rejected indicator {indicator_id}: {reason}")]
    UpstreamRejected {
        indicator_id: String,
        reason: UpstreamError,
    },

    /// The batch deadline passed before this request finished
    #[error("fetch for indicator {indicator_id} abandoned after {timeout:?}")]
    TimedOut {
        indicator_id: String,
        timeout: Duration,
    },
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::NetworkUnavailable { .. } => FetchErrorKind::NetworkUnavailable,
            FetchError::UpstreamRejected { .. } => FetchErrorKind::UpstreamRejected,
            FetchError::TimedOut { .. } => FetchErrorKind::TimedOut,
        }
    }

    pub fn indicator_id(&self) -> &str {
        match self {
            FetchError::NetworkUnavailable { indicator_id, .. }
            | FetchError::UpstreamRejected { indicator_id, .. }
            | FetchError::TimedOut { indicator_id, .. } => indicator_id,
        }
    }

    fn from_retry(indicator_id: &str, err: RetryError<UpstreamError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => FetchError::NetworkUnavailable {
                indicator_id: indicator_id.to_string(),
                attempts,
                last,
            },
            RetryError::Fatal { error, .. } => FetchError::UpstreamRejected {
                indicator_id: indicator_id.to_string(),
                reason: error,
            },
        }
    }
}

/// Per-request result of [`Fetcher::get_many`], in input order
pub type BatchResult = Vec<(IndicatorRequest, Result<FetchOutcome, FetchError>)>;

/// Fetcher tuning
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// When false the cache is neither read nor written
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
    /// Years checked by [`Fetcher::validate`]
    pub check_years: RangeInclusive<i32>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: DEFAULT_CACHE_TTL,
            retry: RetryPolicy::default(),
            check_years: crate::validator::DEFAULT_CHECK_YEARS,
        }
    }
}

impl From<&Settings> for FetcherConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            cache_enabled: settings.cache_enabled,
            cache_ttl: settings.cache_ttl,
            retry: settings.retry_policy(),
            check_years: settings.years.clone(),
        }
    }
}

/// Cache-first fetcher over an [`IndicatorSource`]
pub struct Fetcher {
    source: Arc<dyn IndicatorSource>,
    cache: Arc<CacheStore>,
    config: FetcherConfig,
}

impl Fetcher {
    pub fn new(source: Arc<dyn IndicatorSource>, cache: Arc<CacheStore>, config: FetcherConfig) -> Self {
        Self {
            source,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Returns rows for `request`
    ///
    /// 1. A fresh cache entry is returned without touching the network.
    /// 2. Otherwise the source is called through the retry policy and the
    ///    result is cached.
    /// 3. If that fails, an expired entry is served as [`Freshness::Degraded`].
    pub async fn get_data(&self, request: &IndicatorRequest) -> Result<FetchOutcome, FetchError> {
        let key = CacheKey::from(request);

        if self.config.cache_enabled {
            if let Some(entry) = self.cache.get(&key) {
                debug!(indicator = request.indicator_id(), "cache hit");
                return Ok(FetchOutcome::from_entry(&entry, Freshness::Cached));
            }
            debug!(indicator = request.indicator_id(), "cache miss");
        }

        let result = self
            .config
            .retry
            .run(|_| self.source.fetch(request))
            .await;

        match result {
            Ok(rows) => {
                info!(
                    indicator = request.indicator_id(),
                    rows = rows.len(),
                    "fetched indicator data"
                );
                if self.config.cache_enabled {
                    let entry = self.cache.put(key, rows, self.config.cache_ttl);
                    return Ok(FetchOutcome::from_entry(&entry, Freshness::Fetched));
                }
                Ok(FetchOutcome {
                    rows,
                    freshness: Freshness::Fetched,
                    fetched_at: chrono::Utc::now(),
                })
            }
            Err(err) => {
                if self.config.cache_enabled {
                    if let Some(entry) = self.cache.get_stale(&key) {
                        warn!(
                            indicator = request.indicator_id(),
                            fetched_at = %entry.fetched_at,
                            error = %err,
                            "serving stale cache after failed fetch"
                        );
                        return Ok(FetchOutcome::from_entry(&entry, Freshness::Degraded));
                    }
                }
                let err = FetchError::from_retry(request.indicator_id(), err);
                error!(indicator = request.indicator_id(), error = %err, "fetch failed");
                Err(err)
            }
        }
    }

    /// Fetches every request concurrently
    ///
    /// Results come back in input order, one per request; a failure for one
    /// indicator never affects the others.
    pub async fn get_many(&self, requests: &[IndicatorRequest]) -> BatchResult {
        let fetches = requests.iter().map(|request| self.get_data(request));
        let results = join_all(fetches).await;
        requests.iter().cloned().zip(results).collect()
    }

    /// Like [`Fetcher::get_many`], but requests still running when `timeout`
    /// elapses are abandoned and reported as [`FetchError::TimedOut`].
    pub async fn get_many_with_timeout(&self, requests: &[IndicatorRequest], timeout: Duration) -> BatchResult {
        let deadline = Instant::now() + timeout;
        let fetches = requests.iter().map(|request| async move {
            match timeout_at(deadline, self.get_data(request)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(indicator = request.indicator_id(), ?timeout, "fetch abandoned at batch deadline");
                    Err(FetchError::TimedOut {
                        indicator_id: request.indicator_id().to_string(),
                        timeout,
                    })
                }
            }
        });
        let results = join_all(fetches).await;
        requests.iter().cloned().zip(results).collect()
    }

    /// Checks upstream coverage for each indicator in the configured year span
    pub async fn validate<I, S>(&self, indicator_ids: I, region_id: &str) -> BTreeMap<String, ValidationResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DataValidator::new(Arc::clone(&self.source), self.config.retry.clone())
            .with_check_years(self.config.check_years.clone())
            .validate(indicator_ids, region_id)
            .await
    }

    /// Drops every cached entry
    pub fn clear_cache(&self) -> io::Result<()> {
        info!("clearing indicator cache");
        self.cache.clear()
    }
}
