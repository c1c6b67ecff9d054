//! Cache store for indicator rows
//!
//! Entries live in memory behind a lock and are handed out as `Arc`s, so a
//! reader sees either the old entry or the new one, never a half-written one.
//! A store built with a directory also mirrors every entry to a JSON file so
//! separate processes share results.
//!
//! The mirror is best-effort and synchronous. Lookups are answered from memory;
//! the disk is read only on a memory miss (once per key per process) and
//! written once per successful fetch. Write failures are logged, never returned.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::data::{Breakdown, DataPoint, IndicatorRequest};

/// Identifies one cached request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub indicator_id: String,
    pub region_id: String,
    pub year_from: i32,
    pub year_to: i32,
    pub breakdown: Breakdown,
}

impl CacheKey {
    /// File name stem used for the on-disk mirror
    ///
    /// Ids are sanitised, so two keys could share a stem; entries store their
    /// full key and a mismatch is treated as a miss.
    pub fn file_stem(&self) -> String {
        format!(
            "{}{}_region_{}_{}-{}_{}",
            ENTRY_PREFIX,
            sanitize(&self.indicator_id),
            sanitize(&self.region_id),
            self.year_from,
            self.year_to,
            self.breakdown
        )
    }
}

impl From<&IndicatorRequest> for CacheKey {
    fn from(request: &IndicatorRequest) -> Self {
        Self {
            indicator_id: request.indicator_id().to_string(),
            region_id: request.region_id().to_string(),
            year_from: request.year_from(),
            year_to: request.year_to(),
            breakdown: request.breakdown(),
        }
    }
}

/// Prefix of every file the store writes; `clear` leaves other files alone
const ENTRY_PREFIX: &str = "indicator_";

/// `indicator_*.json` entries and `.indicator_*.tmp` leftovers from
/// interrupted writes
fn is_store_file(file_name: &str) -> bool {
    match file_name.strip_prefix('.') {
        Some(rest) => rest.starts_with(ENTRY_PREFIX) && rest.ends_with(".tmp"),
        None => file_name.starts_with(ENTRY_PREFIX) && file_name.ends_with(".json"),
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Rows stored for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub rows: Vec<DataPoint>,
    /// When the rows were stored
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Whether the entry has outlived its TTL at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match (now - self.fetched_at).to_std() {
            Ok(age) => age > self.ttl,
            // fetched_at is in the future: clock moved backwards
            Err(_) => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Concurrent cache of indicator rows keyed by request
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    /// Directory for the on-disk mirror, if any
    dir: Option<PathBuf>,
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl CacheStore {
    /// Creates a store that only lives in memory
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Creates a store mirrored to `dir`
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            dir: Some(dir.into()),
        }
    }

    /// Creates a store mirrored to the XDG cache directory
    /// (`~/.cache/sotkafetch/` on Linux).
    ///
    /// Returns `None` if no home directory can be determined.
    pub fn in_default_dir() -> Option<Self> {
        Some(Self::with_dir(default_cache_dir()?))
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Returns the entry for `key` if present and not expired
    ///
    /// Expired entries are left in place for [`CacheStore::get_stale`].
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.lookup(key).filter(|entry| !entry.is_expired())
    }

    /// Returns the entry for `key` whether or not it has expired
    pub fn get_stale(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.lookup(key)
    }

    /// Stores `rows` under `key`, stamped with the current time
    pub fn put(&self, key: CacheKey, rows: Vec<DataPoint>, ttl: Duration) -> Arc<CacheEntry> {
        let entry = Arc::new(CacheEntry {
            key: key.clone(),
            rows,
            fetched_at: Utc::now(),
            ttl,
        });

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&entry));

        if let Some(dir) = &self.dir {
            if let Err(err) = write_entry(dir, &entry) {
                warn!(
                    key = %entry.key.file_stem(),
                    error = %err,
                    "failed to persist cache entry"
                );
            }
        }

        entry
    }

    /// Removes every entry, including the on-disk mirror
    pub fn clear(&self) -> io::Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        if let Some(dir) = &self.dir {
            let read_dir = match fs::read_dir(dir) {
                Ok(read_dir) => read_dir,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(err),
            };
            for dir_entry in read_dir {
                let dir_entry = dir_entry?;
                let owned = dir_entry.file_name().to_str().is_some_and(is_store_file);
                if owned {
                    fs::remove_file(dir_entry.path())?;
                }
            }
        }
        debug!("cache cleared");
        Ok(())
    }

    /// Number of entries held in memory
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let cached = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        if cached.is_some() {
            return cached;
        }

        let loaded = Arc::new(read_entry(self.dir.as_deref()?, key)?);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // A concurrent put may have landed while we were reading the file
        Some(Arc::clone(entries.entry(key.clone()).or_insert(loaded)))
    }
}

/// XDG-compliant cache directory for this application
pub fn default_cache_dir() -> Option<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "sotkafetch")?;
    Some(project_dirs.cache_dir().to_path_buf())
}

fn entry_path(dir: &Path, key: &CacheKey) -> PathBuf {
    dir.join(format!("{}.json", key.file_stem()))
}

/// Writes through a temporary file and renames it into place, so readers in
/// other processes never see a partial file.
fn write_entry(dir: &Path, entry: &CacheEntry) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(entry)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let tmp = dir.join(format!(
        ".{}.{}.{}.tmp",
        entry.key.file_stem(),
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&tmp, json)?;
    fs::rename(&tmp, entry_path(dir, &entry.key))
}

fn read_entry(dir: &Path, key: &CacheKey) -> Option<CacheEntry> {
    let content = fs::read_to_string(entry_path(dir, key)).ok()?;
    let entry: CacheEntry = serde_json::from_str(&content).ok()?;
    (entry.key == *key).then_some(entry)
}
