//! CSV export of indicator rows
//!
//! One CSV row per indicator, year and breakdown. Missing values are written
//! as empty fields, never as zero.

use thiserror::Error;

use crate::data::DataPoint;

/// Column order of the export
pub const CSV_HEADER: [&str; 5] = ["indicator_id", "year", "breakdown", "value", "absolute_value"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to flush CSV writer: {0}")]
    Flush(String),

    #[error("CSV output is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Writes `rows` as CSV with a header line
pub fn rows_to_csv<'a, I>(rows: I) -> Result<String, ExportError>
where
    I: IntoIterator<Item = &'a DataPoint>,
{
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(CSV_HEADER)?;

    for row in rows {
        let year = row.year.to_string();
        let value = format_optional(row.value);
        let absolute_value = format_optional(row.absolute_value);
        wtr.write_record([
            row.indicator_id.as_str(),
            year.as_str(),
            row.breakdown.as_str(),
            value.as_str(),
            absolute_value.as_str(),
        ])?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| ExportError::Flush(e.to_string()))?;
    Ok(String::from_utf8(data)?)
}

fn format_optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
