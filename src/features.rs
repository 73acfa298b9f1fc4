//! Date-derived features and the feature schema.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::record::{EmployeeRecord, DEPARTMENT_COLUMN, RAW_NUMERIC_COLUMNS, REQUIRED_COLUMNS};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;
pub const DAYS_PER_YEAR: f64 = 365.0;
pub const NUMERIC_FEATURE_COUNT: usize = 13;

pub const YEARS_SINCE_LAST_PROMOTION: &str = "years_since_last_promotion";
pub const EMPLOYMENT_AGE: &str = "employment_age";

/// Numeric feature columns in output order.
pub const NUMERIC_FEATURES: [&str; NUMERIC_FEATURE_COUNT] = [
    "salary",
    "tenure",
    "engagement_score",
    "working_hours_per_month",
    "kpi_score",
    "work_life_balance_score",
    "overtime_hours",
    "job_satisfaction",
    "number_of_projects",
    "distance_from_home",
    "trainings_and_certifications",
    YEARS_SINCE_LAST_PROMOTION,
    EMPLOYMENT_AGE,
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    F64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
}

/// One record after date derivation, ready for column transforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRow {
    /// Values in [`NUMERIC_FEATURES`] order; `None` is missing.
    pub numeric: [Option<f64>; NUMERIC_FEATURE_COUNT],
    pub department: Option<String>,
}

pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// Parses a date-like cell, keeping only the calendar date.
///
/// Returns `None` for anything unparseable; callers treat that as missing.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(datetime.date());
        }
    }

    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|datetime| datetime.date_naive())
}

/// Whole days between `date` and `reference_date`, in 365-day years.
pub fn years_between(reference_date: NaiveDate, date: NaiveDate) -> f64 {
    (reference_date - date).num_days() as f64 / DAYS_PER_YEAR
}

pub fn derive_row(record: &EmployeeRecord, reference_date: NaiveDate) -> DerivedRow {
    let hire_date = record.hire_date.as_deref().and_then(parse_date);
    let last_promotion_date = record.last_promotion_date.as_deref().and_then(parse_date);

    let mut numeric = [None; NUMERIC_FEATURE_COUNT];
    for (slot, value) in numeric.iter_mut().zip(record.raw_numeric_values()) {
        *slot = value.filter(|v| v.is_finite());
    }
    numeric[RAW_NUMERIC_COLUMNS.len()] =
        last_promotion_date.map(|date| years_between(reference_date, date));
    numeric[RAW_NUMERIC_COLUMNS.len() + 1] =
        hire_date.map(|date| years_between(reference_date, date));

    DerivedRow {
        numeric,
        department: record.department.clone(),
    }
}

pub fn derive_features(records: &[EmployeeRecord], reference_date: NaiveDate) -> Vec<DerivedRow> {
    let rows: Vec<DerivedRow> = records
        .iter()
        .map(|record| derive_row(record, reference_date))
        .collect();

    debug!(
        component = "features",
        event = "features.derive.finish",
        rows = rows.len(),
        reference_date = %reference_date,
        missing_employment_age = rows.iter().filter(|row| row.numeric[12].is_none()).count(),
        missing_years_since_last_promotion =
            rows.iter().filter(|row| row.numeric[11].is_none()).count()
    );

    rows
}

/// Output schema for a fitted department vocabulary.
pub fn build_feature_schema(categories: &[String]) -> FeatureSchema {
    let mut columns: Vec<FeatureColumn> = NUMERIC_FEATURES
        .iter()
        .map(|name| FeatureColumn {
            name: (*name).to_string(),
            dtype: FeatureDType::F64,
        })
        .collect();
    for category in categories {
        columns.push(FeatureColumn {
            name: format!("{DEPARTMENT_COLUMN}_{category}"),
            dtype: FeatureDType::F64,
        });
    }

    let fingerprint = schema_fingerprint(FEATURE_SCHEMA_VERSION, &columns);

    debug!(
        component = "features",
        event = "features.schema.built",
        version = FEATURE_SCHEMA_VERSION,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version: FEATURE_SCHEMA_VERSION,
        fingerprint,
        columns,
    }
}

/// Fingerprint of the raw input contract: required columns and numeric feature order.
pub fn input_schema_fingerprint() -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{FEATURE_SCHEMA_VERSION};"));
    hasher.update("required:");
    for column in REQUIRED_COLUMNS {
        hasher.update(format!("{column},"));
    }
    hasher.update(";numeric:");
    for column in NUMERIC_FEATURES {
        hasher.update(format!("{column},"));
    }
    hasher.update(format!(";days_per_year:{DAYS_PER_YEAR};"));
    hex::encode(hasher.finalize())
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), SchemaError> {
    if expected_version != actual.version {
        return Err(SchemaError::VersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(SchemaError::FingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn schema_fingerprint(version: u32, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(":f64;");
    }
    hex::encode(hasher.finalize())
}
