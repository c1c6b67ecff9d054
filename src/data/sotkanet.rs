//! Sotkanet REST API client
//!
//! Fetches indicator values for one indicator, region, year range and breakdown
//! from the Sotkanet statistics API and normalises them into [`DataPoint`] rows.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::{Breakdown, DataPoint, IndicatorRequest};
use crate::retry::Retryable;

/// Base URL for the Sotkanet REST API
pub const SOTKANET_BASE_URL: &str = "https://sotkanet.fi/rest/1.1";

/// Fixed timeout for a single upstream request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether an upstream failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// Network failure, timeout or 5xx
    Transient,
    /// 4xx or an unparseable body
    Fatal,
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamErrorKind::Transient => f.write_str("transient"),
            UpstreamErrorKind::Fatal => f.write_str("fatal"),
        }
    }
}

/// Error from a single Sotkanet request
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} upstream error{}: {message}", status_suffix(.status))]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    /// HTTP status, when the server answered
    pub status: Option<u16>,
    pub message: String,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl UpstreamError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Transient,
            status: None,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Fatal,
            status: None,
            message: message.into(),
        }
    }

    /// Classifies a non-success HTTP status: 5xx is transient, anything else fatal.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let kind = if status.is_server_error() {
            UpstreamErrorKind::Transient
        } else {
            UpstreamErrorKind::Fatal
        };
        let reason = status.canonical_reason().unwrap_or("unexpected status");
        let message = if body.trim().is_empty() {
            reason.to_string()
        } else {
            format!("{}: {}", reason, truncate(body.trim(), 200))
        };
        Self {
            kind,
            status: Some(status.as_u16()),
            message,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == UpstreamErrorKind::Transient
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let kind = if err.is_decode() || err.is_builder() {
            UpstreamErrorKind::Fatal
        } else if let Some(code) = err.status() {
            if code.is_server_error() {
                UpstreamErrorKind::Transient
            } else {
                UpstreamErrorKind::Fatal
            }
        } else {
            // Timeouts, refused or reset connections, broken bodies
            UpstreamErrorKind::Transient
        };
        Self {
            kind,
            status,
            message: err.to_string(),
        }
    }
}

impl Retryable for UpstreamError {
    fn is_transient(&self) -> bool {
        UpstreamError::is_transient(self)
    }
}

/// A source of indicator rows
///
/// The fetcher and validator only talk to this trait, so tests can swap the
/// HTTP client for an in-memory stub.
#[async_trait]
pub trait IndicatorSource: Send + Sync {
    /// Fetches rows for one request, sorted by year with no duplicate years.
    async fn fetch(&self, request: &IndicatorRequest) -> Result<Vec<DataPoint>, UpstreamError>;
}

/// A single record from the `/json` endpoint
#[derive(Debug, Deserialize)]
struct SotkanetRecord {
    #[allow(dead_code)]
    indicator: Option<u64>,
    region: Option<u64>,
    year: Option<i32>,
    gender: Option<String>,
    value: Option<f64>,
    #[serde(rename = "absValue")]
    abs_value: Option<f64>,
}

/// A source of indicator metadata
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetches descriptive metadata for one indicator
    async fn fetch_metadata(&self, indicator_id: &str) -> Result<IndicatorMetadata, UpstreamError>;
}

/// Localised text as returned by the metadata endpoint
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize, PartialEq)]
pub struct LocalizedText {
    #[serde(default)]
    pub fi: Option<String>,
    #[serde(default)]
    pub sv: Option<String>,
    #[serde(default)]
    pub en: Option<String>,
}

impl LocalizedText {
    /// Preferred language first, then Finnish, then whatever is present
    pub fn best(&self, lang: &str) -> Option<&str> {
        let preferred = match lang {
            "sv" => self.sv.as_deref(),
            "en" => self.en.as_deref(),
            _ => self.fi.as_deref(),
        };
        preferred
            .or(self.fi.as_deref())
            .or(self.en.as_deref())
            .or(self.sv.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct OrganizationRecord {
    #[serde(default)]
    title: LocalizedText,
}

#[derive(Debug, Deserialize)]
struct MetadataRecord {
    id: u64,
    #[serde(default)]
    title: LocalizedText,
    #[serde(default)]
    organization: Option<OrganizationRecord>,
    #[serde(default)]
    decimals: Option<u8>,
}

/// Descriptive metadata for one indicator
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
pub struct IndicatorMetadata {
    pub id: String,
    pub title: LocalizedText,
    pub organization: Option<LocalizedText>,
    pub decimals: Option<u8>,
}

/// Client for the Sotkanet REST API
#[derive(Debug, Clone)]
pub struct SotkanetClient {
    /// HTTP client for making requests
    http_client: Client,
    /// Base URL for the API (allows override for testing)
    base_url: String,
}

impl SotkanetClient {
    /// Creates a client for the public Sotkanet API with the default 30s timeout
    pub fn new() -> Result<Self, UpstreamError> {
        Self::with_config(SOTKANET_BASE_URL, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a client with a custom base URL and request timeout
    pub fn with_config(base_url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sotkafetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::fatal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query pairs for the `/json` endpoint; years and genders repeat.
    fn query_pairs(request: &IndicatorRequest) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("indicator", request.indicator_id().to_string()),
            ("regions", request.region_id().to_string()),
        ];
        pairs.extend(request.years().map(|year| ("years", year.to_string())));
        pairs.push(("genders", request.breakdown().as_str().to_string()));
        pairs
    }

    async fn get_body(&self, url: &str, query: &[(&'static str, String)]) -> Result<String, UpstreamError> {
        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        debug!(url, status = status.as_u16(), "sotkanet response");
        let body = response.text().await?;

        if !status.is_success() {
            return Err(UpstreamError::from_status(status, &body));
        }
        Ok(body)
    }
}

#[async_trait]
impl MetadataSource for SotkanetClient {
    async fn fetch_metadata(&self, indicator_id: &str) -> Result<IndicatorMetadata, UpstreamError> {
        let url = format!("{}/indicators/{}", self.base_url, indicator_id);
        info!(indicator = indicator_id, "fetching indicator metadata");
        let body = self.get_body(&url, &[]).await?;
        parse_metadata(&body)
    }
}

#[async_trait]
impl IndicatorSource for SotkanetClient {
    async fn fetch(&self, request: &IndicatorRequest) -> Result<Vec<DataPoint>, UpstreamError> {
        let url = format!("{}/json", self.base_url);
        info!(
            indicator = request.indicator_id(),
            region = request.region_id(),
            year_from = request.year_from(),
            year_to = request.year_to(),
            breakdown = %request.breakdown(),
            "fetching indicator data"
        );
        let body = self.get_body(&url, &Self::query_pairs(request)).await?;
        parse_records(&body, request)
    }
}

/// Parses a `/json` response body into rows for `request`
///
/// Records for other regions, breakdowns or years outside the requested range
/// are dropped. When a year appears more than once the first record wins.
pub fn parse_records(body: &str, request: &IndicatorRequest) -> Result<Vec<DataPoint>, UpstreamError> {
    let records: Vec<SotkanetRecord> = serde_json::from_str(body)
        .map_err(|e| UpstreamError::fatal(format!("Failed to parse API response: {}", e)))?;

    let wanted = request.breakdown();
    let years = request.years();
    let mut by_year: BTreeMap<i32, DataPoint> = BTreeMap::new();

    for record in records {
        let Some(year) = record.year else { continue };
        if !years.contains(&year) {
            continue;
        }
        if !region_matches(record.region, request.region_id()) {
            continue;
        }
        let breakdown = match record.gender.as_deref() {
            Some(g) => Breakdown::from_str(g),
            None => Some(Breakdown::Total),
        };
        if breakdown != Some(wanted) {
            continue;
        }

        by_year.entry(year).or_insert_with(|| DataPoint {
            indicator_id: request.indicator_id().to_string(),
            year,
            breakdown: wanted,
            value: record.value,
            absolute_value: record.abs_value,
        });
    }

    Ok(by_year.into_values().collect())
}

fn region_matches(record_region: Option<u64>, region_id: &str) -> bool {
    match record_region {
        Some(region) => region.to_string() == region_id,
        // Single-region queries sometimes omit the field
        None => true,
    }
}

fn parse_metadata(body: &str) -> Result<IndicatorMetadata, UpstreamError> {
    let record: MetadataRecord = serde_json::from_str(body)
        .map_err(|e| UpstreamError::fatal(format!("Failed to parse indicator metadata: {}", e)))?;

    Ok(IndicatorMetadata {
        id: record.id.to_string(),
        title: record.title,
        organization: record.organization.map(|o| o.title),
        decimals: record.decimals,
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
