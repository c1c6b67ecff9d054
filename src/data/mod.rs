//! Core data models for Sotkanet indicator retrieval
//!
//! This module contains the request, row and validation types shared by the
//! cache, the API client, the validator and the fetcher.

pub mod indicators;
pub mod sotkanet;

pub use indicators::{all_indicators, get_indicator_by_id, Environment, Indicator, IndicatorSet};
pub use sotkanet::{
    IndicatorMetadata, IndicatorSource, LocalizedText, MetadataSource, SotkanetClient, UpstreamError, UpstreamErrorKind,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Sotkanet region id for the Helsinki and Uusimaa hospital district (HUS)
pub const HUS_REGION_ID: &str = "629";

/// Population subgroup a value applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Breakdown {
    Total,
    Male,
    Female,
}

impl Breakdown {
    /// All breakdowns in display order
    pub const ALL: [Breakdown; 3] = [Breakdown::Total, Breakdown::Male, Breakdown::Female];

    /// The `genders` value used by the Sotkanet API
    pub fn as_str(&self) -> &'static str {
        match self {
            Breakdown::Total => "total",
            Breakdown::Male => "male",
            Breakdown::Female => "female",
        }
    }

    /// Parses a breakdown name, accepting a few common aliases.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Breakdown> {
        match s.to_lowercase().trim() {
            "total" | "all" => Some(Breakdown::Total),
            "male" | "men" | "m" => Some(Breakdown::Male),
            "female" | "women" | "f" => Some(Breakdown::Female),
            _ => None,
        }
    }
}

impl fmt::Display for Breakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised when building an [`IndicatorRequest`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// The year range is reversed
    #[error("Invalid year range: {year_from} is after {year_to}")]
    InvalidYearRange { year_from: i32, year_to: i32 },

    /// Indicator or region id was blank
    #[error("Missing {0}")]
    EmptyId(&'static str),
}

/// One logical fetch: a single indicator for a region, year range and breakdown
///
/// Fields are private so the `year_from <= year_to` invariant checked in
/// [`IndicatorRequest::new`] cannot be broken afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IndicatorRequest {
    indicator_id: String,
    region_id: String,
    year_from: i32,
    year_to: i32,
    breakdown: Breakdown,
}

impl IndicatorRequest {
    /// Creates a request, rejecting blank ids and reversed year ranges.
    pub fn new(
        indicator_id: impl Into<String>,
        region_id: impl Into<String>,
        year_from: i32,
        year_to: i32,
        breakdown: Breakdown,
    ) -> Result<Self, RequestError> {
        let indicator_id = indicator_id.into().trim().to_string();
        let region_id = region_id.into().trim().to_string();

        if indicator_id.is_empty() {
            return Err(RequestError::EmptyId("indicator id"));
        }
        if region_id.is_empty() {
            return Err(RequestError::EmptyId("region id"));
        }
        if year_from > year_to {
            return Err(RequestError::InvalidYearRange { year_from, year_to });
        }

        Ok(Self {
            indicator_id,
            region_id,
            year_from,
            year_to,
            breakdown,
        })
    }

    pub fn indicator_id(&self) -> &str {
        &self.indicator_id
    }

    pub fn region_id(&self) -> &str {
        &self.region_id
    }

    pub fn year_from(&self) -> i32 {
        self.year_from
    }

    pub fn year_to(&self) -> i32 {
        self.year_to
    }

    pub fn breakdown(&self) -> Breakdown {
        self.breakdown
    }

    /// Inclusive range of requested years
    pub fn years(&self) -> RangeInclusive<i32> {
        self.year_from..=self.year_to
    }
}

impl fmt::Display for IndicatorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "indicator {} region {} {}-{} ({})",
            self.indicator_id, self.region_id, self.year_from, self.year_to, self.breakdown
        )
    }
}

/// A single published value for one indicator, year and breakdown
///
/// `value` and `absolute_value` are `None` when Sotkanet has no figure for the
/// year. They are never replaced with zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub indicator_id: String,
    pub year: i32,
    pub breakdown: Breakdown,
    pub value: Option<f64>,
    pub absolute_value: Option<f64>,
}

/// Outcome of an availability check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationStatus {
    /// At least one year has a published value
    Ok,
    /// The upstream answered but nothing was published
    NoData,
    /// The check itself failed
    Error(String),
}

/// Data availability for one indicator in the configured region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub indicator_id: String,
    pub has_data: bool,
    /// Years with a non-null value
    pub years_with_data: BTreeSet<i32>,
    /// Years that were checked
    pub requested_years: RangeInclusive<i32>,
    /// Checked years without a non-null value
    pub missing_years: BTreeSet<i32>,
    /// Breakdowns the upstream returned rows for
    pub available_breakdowns: BTreeSet<Breakdown>,
    /// Number of rows returned, including null ones
    pub data_points: usize,
    pub status: ValidationStatus,
}

impl ValidationResult {
    /// Builds a result from the rows returned for a validation request
    pub fn from_rows(
        indicator_id: impl Into<String>,
        requested_years: RangeInclusive<i32>,
        rows: &[DataPoint],
    ) -> Self {
        let years_with_data: BTreeSet<i32> = rows
            .iter()
            .filter(|row| row.value.is_some())
            .map(|row| row.year)
            .collect();
        let missing_years = requested_years
            .clone()
            .filter(|year| !years_with_data.contains(year))
            .collect();
        let has_data = !years_with_data.is_empty();
        let available_breakdowns = rows.iter().map(|row| row.breakdown).collect();

        Self {
            indicator_id: indicator_id.into(),
            has_data,
            years_with_data,
            requested_years,
            missing_years,
            available_breakdowns,
            data_points: rows.len(),
            status: if has_data {
                ValidationStatus::Ok
            } else {
                ValidationStatus::NoData
            },
        }
    }

    /// Result for a validation request that failed outright
    pub fn failed(
        indicator_id: impl Into<String>,
        requested_years: RangeInclusive<i32>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            indicator_id: indicator_id.into(),
            has_data: false,
            years_with_data: BTreeSet::new(),
            missing_years: requested_years.clone().collect(),
            available_breakdowns: BTreeSet::new(),
            requested_years,
            data_points: 0,
            status: ValidationStatus::Error(message.into()),
        }
    }

    /// Share of checked years that have data, as a percentage
    pub fn completeness(&self) -> f64 {
        let requested = self.requested_years.clone().count();
        if requested == 0 {
            return 0.0;
        }
        self.years_with_data
            .iter()
            .filter(|year| self.requested_years.contains(year))
            .count() as f64
            / requested as f64
            * 100.0
    }
}

/// One line per indicator: status, coverage percentage and covered years
impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            ValidationStatus::Ok => {
                let years: Vec<String> = self.years_with_data.iter().map(|y| y.to_string()).collect();
                write!(
                    f,
                    "{:<6} ok       {:>3.0}%  years: {}",
                    self.indicator_id,
                    self.completeness(),
                    years.join(", ")
                )
            }
            ValidationStatus::NoData => write!(f, "{:<6} no data", self.indicator_id),
            ValidationStatus::Error(message) => write!(f, "{:<6} error    {}", self.indicator_id, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(year: i32, value: Option<f64>) -> DataPoint {
        DataPoint {
            indicator_id: "186".to_string(),
            year,
            breakdown: Breakdown::Total,
            value,
            absolute_value: None,
        }
    }

    #[test]
    fn test_request_rejects_reversed_years() {
        let err = IndicatorRequest::new("186", HUS_REGION_ID, 2023, 2018, Breakdown::Total)
            .unwrap_err();
        assert_eq!(
            err,
            RequestError::InvalidYearRange {
                year_from: 2023,
                year_to: 2018
            }
        );
    }

    #[test]
    fn test_request_accepts_single_year() {
        let request =
            IndicatorRequest::new("186", HUS_REGION_ID, 2020, 2020, Breakdown::Male).unwrap();
        assert_eq!(request.years().count(), 1);
        assert_eq!(request.breakdown(), Breakdown::Male);
    }

    #[test]
    fn test_request_trims_and_rejects_blank_ids() {
        let request =
            IndicatorRequest::new(" 186 ", " 629", 2018, 2023, Breakdown::Total).unwrap();
        assert_eq!(request.indicator_id(), "186");
        assert_eq!(request.region_id(), "629");

        assert_eq!(
            IndicatorRequest::new("  ", "629", 2018, 2023, Breakdown::Total).unwrap_err(),
            RequestError::EmptyId("indicator id")
        );
        assert_eq!(
            IndicatorRequest::new("186", "", 2018, 2023, Breakdown::Total).unwrap_err(),
            RequestError::EmptyId("region id")
        );
    }

    #[test]
    fn test_breakdown_parsing() {
        assert_eq!(Breakdown::from_str("total"), Some(Breakdown::Total));
        assert_eq!(Breakdown::from_str("MALE"), Some(Breakdown::Male));
        assert_eq!(Breakdown::from_str(" women "), Some(Breakdown::Female));
        assert_eq!(Breakdown::from_str("other"), None);
    }

    #[test]
    fn test_breakdown_serializes_as_api_name() {
        let json = serde_json::to_string(&Breakdown::Female).unwrap();
        assert_eq!(json, "\"female\"");
    }

    #[test]
    fn test_validation_result_ignores_null_rows() {
        let rows = vec![point(2021, Some(1.0)), point(2022, None), point(2023, Some(3.0))];
        let result = ValidationResult::from_rows("186", 2021..=2023, &rows);

        assert!(result.has_data);
        assert_eq!(result.years_with_data, BTreeSet::from([2021, 2023]));
        assert_eq!(result.missing_years, BTreeSet::from([2022]));
        assert_eq!(result.data_points, 3);
        assert_eq!(result.status, ValidationStatus::Ok);
        assert!((result.completeness() - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_validation_result_without_rows_has_no_data() {
        let result = ValidationResult::from_rows("322", 2018..=2023, &[]);
        assert!(!result.has_data);
        assert_eq!(result.status, ValidationStatus::NoData);
        assert_eq!(result.missing_years.len(), 6);
        assert_eq!(result.completeness(), 0.0);
    }

    #[test]
    fn test_failed_validation_result() {
        let result = ValidationResult::failed("5527", 2018..=2019, "boom");
        assert!(!result.has_data);
        assert_eq!(result.status, ValidationStatus::Error("boom".to_string()));
        assert_eq!(result.missing_years, BTreeSet::from([2018, 2019]));
        assert!(result.available_breakdowns.is_empty());
    }

    #[test]
    fn test_validation_result_records_breakdowns() {
        let rows = vec![point(2021, Some(1.0)), point(2022, None)];
        let result = ValidationResult::from_rows("186", 2021..=2022, &rows);
        assert_eq!(result.available_breakdowns, BTreeSet::from([Breakdown::Total]));

        let empty = ValidationResult::from_rows("186", 2021..=2022, &[]);
        assert!(empty.available_breakdowns.is_empty());
    }

    #[test]
    fn test_validation_display_shows_percentage() {
        let rows: Vec<DataPoint> = (2018..=2023).map(|y| point(y, Some(1.0))).collect();
        let full = ValidationResult::from_rows("186", 2018..=2023, &rows);
        assert_eq!(
            full.to_string(),
            "186    ok       100%  years: 2018, 2019, 2020, 2021, 2022, 2023"
        );

        let half = ValidationResult::from_rows("322", 2020..=2021, &[point(2021, Some(2.0))]);
        assert!(half.to_string().contains(" 50%"), "got {}", half);
        assert!(!half.to_string().contains("5000"));
    }

    #[test]
    fn test_validation_display_for_missing_and_failed() {
        let none = ValidationResult::from_rows("5527", 2018..=2023, &[]);
        assert_eq!(none.to_string(), "5527   no data");

        let failed = ValidationResult::failed("4461", 2018..=2023, "HTTP 404");
        assert_eq!(failed.to_string(), "4461   error    HTTP 404");
    }
}
