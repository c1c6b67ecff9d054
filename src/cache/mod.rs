//! Cache for indicator rows
//!
//! Entries carry a fetch timestamp and TTL. Expired entries are hidden from
//! normal lookups but kept, so the fetcher can serve them when the upstream
//! API is unavailable. Indicator metadata is kept separately as one snapshot
//! per cache directory.

mod metadata;
mod store;

pub use metadata::{
    MetadataSnapshot, MetadataStatus, MetadataStore, DEFAULT_METADATA_MAX_AGE, METADATA_FILE_NAME,
};
pub use store::{default_cache_dir, CacheEntry, CacheKey, CacheStore};
