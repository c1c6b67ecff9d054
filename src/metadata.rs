//! Indicator metadata backed by a persisted snapshot
//!
//! [`MetadataService::ensure`] serves the stored snapshot while it is fresh and
//! built for the current environment, rebuilds it otherwise, and falls back to
//! the stored copy when the rebuild fails.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{MetadataSnapshot, MetadataStatus, MetadataStore, DEFAULT_METADATA_MAX_AGE};
use crate::config::Settings;
use crate::data::{Environment, IndicatorSet, MetadataSource, UpstreamError};
use crate::fetcher::Freshness;
use crate::retry::RetryPolicy;

/// Metadata service tuning
#[derive(Debug, Clone)]
pub struct MetadataConfig {
    /// Snapshots older than this are rebuilt
    pub max_age: Duration,
    /// When false a stale or mismatched snapshot is never rebuilt implicitly
    pub auto_refresh: bool,
    pub retry: RetryPolicy,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_METADATA_MAX_AGE,
            auto_refresh: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&Settings> for MetadataConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            max_age: settings.metadata_max_age,
            auto_refresh: settings.metadata_auto_refresh,
            retry: settings.retry_policy(),
        }
    }
}

/// Snapshot returned by the service and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataOutcome {
    pub snapshot: Arc<MetadataSnapshot>,
    pub freshness: Freshness,
}

impl MetadataOutcome {
    pub fn is_degraded(&self) -> bool {
        self.freshness == Freshness::Degraded
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetadataError {
    /// Every lookup failed and nothing usable was stored
    #[error("indicator metadata unavailable: {0}")]
    Unavailable(UpstreamError),

    #[error("no stored indicator metadata and automatic refresh is disabled")]
    Missing,

    /// Stored snapshot belongs to another profile and refresh is disabled
    #[error("stored indicator metadata was built for the {cached} environment or another indicator set, not {requested}")]
    Mismatch {
        cached: Environment,
        requested: Environment,
    },
}

pub struct MetadataService {
    source: Arc<dyn MetadataSource>,
    store: Arc<MetadataStore>,
    config: MetadataConfig,
}

impl MetadataService {
    pub fn new(source: Arc<dyn MetadataSource>, store: Arc<MetadataStore>, config: MetadataConfig) -> Self {
        Self { source, store, config }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn status(&self, environment: Environment, indicators: &IndicatorSet) -> MetadataStatus {
        self.store.status(environment, indicators, self.config.max_age)
    }

    /// Metadata for `indicators`, rebuilt only when the stored snapshot is
    /// missing, stale, or built for another environment or indicator set
    pub async fn ensure(
        &self,
        environment: Environment,
        indicators: &IndicatorSet,
    ) -> Result<MetadataOutcome, MetadataError> {
        let Some(cached) = self.store.load() else {
            if !self.config.auto_refresh {
                return Err(MetadataError::Missing);
            }
            info!(environment = %environment, "no stored indicator metadata");
            return self.force_refresh(environment, indicators).await;
        };

        let matches = cached.matches(environment, indicators);
        let stale = cached.is_stale(self.config.max_age);
        let age_hours = cached.age_at(chrono::Utc::now()).as_secs() / 3600;

        if matches && !stale {
            debug!(age_hours, "using stored indicator metadata");
            return Ok(MetadataOutcome {
                snapshot: cached,
                freshness: Freshness::Cached,
            });
        }

        if !self.config.auto_refresh {
            if !matches {
                return Err(MetadataError::Mismatch {
                    cached: cached.environment,
                    requested: environment,
                });
            }
            warn!(age_hours, "indicator metadata is stale and automatic refresh is disabled");
            return Ok(MetadataOutcome {
                snapshot: cached,
                freshness: Freshness::Cached,
            });
        }

        if matches {
            info!(age_hours, "indicator metadata is stale, refreshing");
        } else {
            info!(
                cached = %cached.environment,
                requested = %environment,
                "stored indicator metadata does not match, refreshing"
            );
        }

        match self.force_refresh(environment, indicators).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(error = %err, "metadata refresh failed, serving stored copy");
                Ok(MetadataOutcome {
                    snapshot: cached,
                    freshness: Freshness::Degraded,
                })
            }
        }
    }

    /// Fetches metadata for every indicator and replaces the stored snapshot.
    ///
    /// Indicators whose lookup fails are left out; the call fails only when
    /// every lookup fails.
    pub async fn force_refresh(
        &self,
        environment: Environment,
        indicators: &IndicatorSet,
    ) -> Result<MetadataOutcome, MetadataError> {
        info!(environment = %environment, indicators = indicators.len(), "fetching indicator metadata");

        let lookups = indicators
            .iter()
            .map(|id| self.config.retry.run(move |_| self.source.fetch_metadata(id)));
        let results = join_all(lookups).await;

        let mut metadata = BTreeMap::new();
        let mut last_error = None;
        for (id, result) in indicators.iter().zip(results) {
            match result {
                Ok(meta) => {
                    metadata.insert(id.clone(), meta);
                }
                Err(err) => {
                    warn!(indicator = %id, error = %err, "metadata lookup failed");
                    last_error = Some(err.into_error());
                }
            }
        }

        if metadata.is_empty() {
            if let Some(err) = last_error {
                return Err(MetadataError::Unavailable(err));
            }
        }

        let snapshot = self.store.save(MetadataSnapshot::new(environment, indicators, metadata));
        Ok(MetadataOutcome {
            snapshot,
            freshness: Freshness::Fetched,
        })
    }
}
