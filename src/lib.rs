//! sotkafetch library
//!
//! Cache-first access to Sotkanet health indicators for the HUS region:
//! upstream client, retry policy, TTL cache with stale fallback, data
//! availability checks and CSV export. The binary and the integration tests
//! build on these modules.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod export;
pub mod fetcher;
pub mod metadata;
pub mod retry;
pub mod validator;

pub use config::Settings;
pub use data::{Breakdown, DataPoint, IndicatorRequest, IndicatorSource, ValidationResult, ValidationStatus};
pub use fetcher::{FetchError, FetchErrorKind, FetchOutcome, Fetcher, FetcherConfig, Freshness};
pub use metadata::{MetadataError, MetadataOutcome, MetadataService};
pub use retry::RetryPolicy;
