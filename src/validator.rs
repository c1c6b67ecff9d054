//! Data availability checks
//!
//! Queries each indicator once across a year span and reports which years carry
//! a published value, so callers can hide indicators with no coverage.

use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{info, warn};

use crate::data::{Breakdown, IndicatorRequest, IndicatorSource, ValidationResult, ValidationStatus};
use crate::retry::RetryPolicy;

/// Years checked when no span is configured
pub const DEFAULT_CHECK_YEARS: RangeInclusive<i32> = 2018..=2023;

/// Checks upstream coverage for a set of indicators
pub struct DataValidator {
    source: Arc<dyn IndicatorSource>,
    retry: RetryPolicy,
    check_years: RangeInclusive<i32>,
}

impl DataValidator {
    pub fn new(source: Arc<dyn IndicatorSource>, retry: RetryPolicy) -> Self {
        Self {
            source,
            retry,
            check_years: DEFAULT_CHECK_YEARS,
        }
    }

    /// Sets the checked year span
    pub fn with_check_years(mut self, years: RangeInclusive<i32>) -> Self {
        self.check_years = years;
        self
    }

    pub fn check_years(&self) -> RangeInclusive<i32> {
        self.check_years.clone()
    }

    /// Validates every indicator concurrently
    ///
    /// A failing request yields a result with `ValidationStatus::Error` rather
    /// than aborting the others.
    pub async fn validate<I, S>(&self, indicator_ids: I, region_id: &str) -> BTreeMap<String, ValidationResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = indicator_ids.into_iter().map(Into::into).collect();
        let checks = ids.iter().map(|id| self.check(id, region_id));
        let results = join_all(checks).await;

        let results: BTreeMap<String, ValidationResult> = results
            .into_iter()
            .map(|result| (result.indicator_id.clone(), result))
            .collect();

        let summary = ValidationSummary::from_results(&results);
        info!(
            total = summary.total,
            with_data = summary.with_data,
            without_data = summary.without_data,
            region = region_id,
            "validation finished"
        );
        results
    }

    async fn check(&self, indicator_id: &str, region_id: &str) -> ValidationResult {
        let years = self.check_years.clone();
        let request = match IndicatorRequest::new(
            indicator_id,
            region_id,
            *years.start(),
            *years.end(),
            Breakdown::Total,
        ) {
            Ok(request) => request,
            Err(err) => return ValidationResult::failed(indicator_id, years, err.to_string()),
        };

        let outcome = self
            .retry
            .run(|_| self.source.fetch(&request))
            .await;

        match outcome {
            Ok(rows) => {
                let result = ValidationResult::from_rows(request.indicator_id(), years, &rows);
                if result.has_data {
                    info!(
                        indicator = request.indicator_id(),
                        years = result.years_with_data.len(),
                        completeness = result.completeness(),
                        "data available"
                    );
                } else {
                    warn!(indicator = request.indicator_id(), "no data for region");
                }
                result
            }
            Err(err) => {
                warn!(indicator = request.indicator_id(), error = %err, "validation request failed");
                ValidationResult::failed(request.indicator_id(), years, err.to_string())
            }
        }
    }
}

/// Counts over a validation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub with_data: usize,
    pub without_data: usize,
    /// Indicators with every checked year covered
    pub complete: usize,
    /// Indicators with some but not all checked years covered
    pub partial: usize,
    pub errors: usize,
}

impl ValidationSummary {
    pub fn from_results(results: &BTreeMap<String, ValidationResult>) -> Self {
        let mut summary = ValidationSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in results.values() {
            if result.has_data {
                summary.with_data += 1;
                if result.missing_years.is_empty() {
                    summary.complete += 1;
                } else {
                    summary.partial += 1;
                }
            } else {
                summary.without_data += 1;
            }
            if matches!(result.status, ValidationStatus::Error(_)) {
                summary.errors += 1;
            }
        }
        summary
    }
}
