//! Persisted indicator metadata
//!
//! Metadata changes rarely, so it is kept as a single snapshot tagged with the
//! environment and indicator set it was built for. A snapshot for another
//! profile is detectable and can be rebuilt instead of being shown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::data::{Environment, IndicatorMetadata, IndicatorSet};

/// File name of the snapshot inside the cache directory
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Snapshots older than this are refreshed (7 days)
pub const DEFAULT_METADATA_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Metadata for every indicator of one environment profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub generated_at: DateTime<Utc>,
    pub environment: Environment,
    /// Indicators the snapshot was requested for, in profile order
    pub indicator_ids: Vec<String>,
    /// Metadata keyed by indicator id; ids whose lookup failed are absent
    pub indicators: BTreeMap<String, IndicatorMetadata>,
}

impl MetadataSnapshot {
    pub fn new(
        environment: Environment,
        indicators: &IndicatorSet,
        metadata: BTreeMap<String, IndicatorMetadata>,
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            environment,
            indicator_ids: indicators.ids().to_vec(),
            indicators: metadata,
        }
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.generated_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age_at(now) > max_age
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.is_stale_at(Utc::now(), max_age)
    }

    /// True when built for `environment` and exactly `indicators`, with
    /// metadata present for each of them
    pub fn matches(&self, environment: Environment, indicators: &IndicatorSet) -> bool {
        let cached: BTreeSet<&str> = self.indicator_ids.iter().map(String::as_str).collect();
        let current: BTreeSet<&str> = indicators.iter().map(String::as_str).collect();
        self.environment == environment && cached == current && self.indicators.len() == current.len()
    }

    /// Metadata in profile order
    pub fn iter(&self) -> impl Iterator<Item = (&String, Option<&IndicatorMetadata>)> {
        self.indicator_ids.iter().map(|id| (id, self.indicators.get(id)))
    }
}

/// What is known about the stored snapshot without touching the network
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataStatus {
    pub exists: bool,
    pub age: Option<Duration>,
    pub is_stale: bool,
    pub matches_environment: bool,
    pub indicator_count: usize,
    pub environment: Option<Environment>,
    pub generated_at: Option<DateTime<Utc>>,
}

/// Holds the current metadata snapshot, optionally mirrored to
/// `<dir>/metadata.json`
#[derive(Debug, Default)]
pub struct MetadataStore {
    snapshot: RwLock<Option<Arc<MetadataSnapshot>>>,
    dir: Option<PathBuf>,
}

impl MetadataStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot: RwLock::new(None),
            dir: Some(dir.into()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// The current snapshot, read from disk on first use
    pub fn load(&self) -> Option<Arc<MetadataSnapshot>> {
        let cached = self
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if cached.is_some() {
            return cached;
        }

        let loaded = Arc::new(read_snapshot(self.dir.as_deref()?)?);
        let mut slot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        Some(Arc::clone(slot.get_or_insert(loaded)))
    }

    /// Replaces the snapshot; a failed disk write is logged and ignored
    pub fn save(&self, snapshot: MetadataSnapshot) -> Arc<MetadataSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));

        if let Some(dir) = &self.dir {
            match write_snapshot(dir, &snapshot) {
                Ok(()) => debug!(path = %dir.join(METADATA_FILE_NAME).display(), "saved indicator metadata"),
                Err(err) => warn!(error = %err, "failed to persist indicator metadata"),
            }
        }
        snapshot
    }

    pub fn clear(&self) -> io::Result<()> {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;

        if let Some(dir) = &self.dir {
            match fs::remove_file(dir.join(METADATA_FILE_NAME)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub fn status(&self, environment: Environment, indicators: &IndicatorSet, max_age: Duration) -> MetadataStatus {
        match self.load() {
            Some(snapshot) => MetadataStatus {
                exists: true,
                age: Some(snapshot.age_at(Utc::now())),
                is_stale: snapshot.is_stale(max_age),
                matches_environment: snapshot.matches(environment, indicators),
                indicator_count: snapshot.indicators.len(),
                environment: Some(snapshot.environment),
                generated_at: Some(snapshot.generated_at),
            },
            None => MetadataStatus {
                exists: false,
                age: None,
                is_stale: true,
                matches_environment: false,
                indicator_count: 0,
                environment: None,
                generated_at: None,
            },
        }
    }
}

fn write_snapshot(dir: &Path, snapshot: &MetadataSnapshot) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let tmp = dir.join(format!(".metadata.{}.tmp", std::process::id()));
    fs::write(&tmp, json)?;
    fs::rename(&tmp, dir.join(METADATA_FILE_NAME))
}

fn read_snapshot(dir: &Path) -> Option<MetadataSnapshot> {
    let path = dir.join(METADATA_FILE_NAME);
    let content = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring unreadable metadata file");
            None
        }
    }
}
