//! Employee record schema and CSV ingestion.
//!
//! Columns are resolved by header name once per file. Required columns that
//! are absent from the header are recorded on the batch; the pipeline rejects
//! them.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const EMPLOYEE_ID_COLUMN: &str = "EmployeeID";
pub const HIRE_DATE_COLUMN: &str = "hire_date";
pub const LAST_PROMOTION_DATE_COLUMN: &str = "last_promotion_date";
pub const DEPARTMENT_COLUMN: &str = "department";

/// Raw numeric columns in feature order.
pub const RAW_NUMERIC_COLUMNS: [&str; 11] = [
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
];

pub const REQUIRED_COLUMNS: [&str; 14] = [
    HIRE_DATE_COLUMN,
    LAST_PROMOTION_DATE_COLUMN,
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
    DEPARTMENT_COLUMN,
];

const MISSING_TOKENS: [&str; 8] = ["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None"];

const EMPLOYEE_ID_OFFSET: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("batch is missing required columns: {missing:?}")]
pub struct DataShapeError {
    pub missing: Vec<String>,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: column {column} value '{value}' is not a number")]
    InvalidNumber {
        row: usize,
        column: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub hire_date: Option<String>,
    #[serde(default)]
    pub last_promotion_date: Option<String>,
    #[serde(default)]
    pub salary: Option<f64>,
    #[serde(default)]
    pub tenure: Option<f64>,
    #[serde(default)]
    pub engagement_score: Option<f64>,
    #[serde(default)]
    pub working_hours_per_month: Option<f64>,
    #[serde(default)]
    pub kpi_score: Option<f64>,
    #[serde(default)]
    pub work_life_balance_score: Option<f64>,
    #[serde(default)]
    pub overtime_hours: Option<f64>,
    #[serde(default)]
    pub job_satisfaction: Option<f64>,
    #[serde(default)]
    pub number_of_projects: Option<f64>,
    #[serde(default)]
    pub distance_from_home: Option<f64>,
    #[serde(default)]
    pub trainings_and_certifications: Option<f64>,
    #[serde(default)]
    pub department: Option<String>,
    /// Columns outside the record schema, kept verbatim.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl EmployeeRecord {
    /// Raw numeric values in [`RAW_NUMERIC_COLUMNS`] order.
    pub fn raw_numeric_values(&self) -> [Option<f64>; 11] {
        [
            self.salary,
            self.tenure,
            self.engagement_score,
            self.working_hours_per_month,
            self.kpi_score,
            self.work_life_balance_score,
            self.overtime_hours,
            self.job_satisfaction,
            self.number_of_projects,
            self.distance_from_home,
            self.trainings_and_certifications,
        ]
    }

    fn raw_numeric_slot(&mut self, column: &str) -> Option<&mut Option<f64>> {
        match column {
            "salary" => Some(&mut self.salary),
            "tenure" => Some(&mut self.tenure),
            "engagement_score" => Some(&mut self.engagement_score),
            "working_hours_per_month" => Some(&mut self.working_hours_per_month),
            "kpi_score" => Some(&mut self.kpi_score),
            "work_life_balance_score" => Some(&mut self.work_life_balance_score),
            "overtime_hours" => Some(&mut self.overtime_hours),
            "job_satisfaction" => Some(&mut self.job_satisfaction),
            "number_of_projects" => Some(&mut self.number_of_projects),
            "distance_from_home" => Some(&mut self.distance_from_home),
            "trainings_and_certifications" => Some(&mut self.trainings_and_certifications),
            _ => None,
        }
    }
}

/// A batch of records plus the column names its source declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    columns: Vec<String>,
    records: Vec<EmployeeRecord>,
}

impl RecordBatch {
    /// Builds a batch that declares every schema column.
    pub fn new(records: Vec<EmployeeRecord>) -> Self {
        let mut columns = vec![EMPLOYEE_ID_COLUMN.to_string()];
        columns.extend(REQUIRED_COLUMNS.iter().map(|column| (*column).to_string()));
        Self { columns, records }
    }

    pub fn with_columns(columns: Vec<String>, records: Vec<EmployeeRecord>) -> Self {
        Self { columns, records }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[EmployeeRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<EmployeeRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn missing_required_columns(&self) -> Vec<String> {
        let declared: BTreeSet<&str> = self.columns.iter().map(String::as_str).collect();
        REQUIRED_COLUMNS
            .iter()
            .filter(|column| !declared.contains(**column))
            .map(|column| (*column).to_string())
            .collect()
    }

    pub fn require_schema(&self) -> Result<(), DataShapeError> {
        let missing = self.missing_required_columns();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DataShapeError { missing })
        }
    }

    /// Identifier for the record at `index`, falling back to `1000 + index`.
    pub fn employee_id(&self, index: usize) -> String {
        self.records
            .get(index)
            .and_then(|record| record.employee_id.clone())
            .unwrap_or_else(|| (EMPLOYEE_ID_OFFSET + index).to_string())
    }
}

pub fn load_records_csv(path: &Path) -> Result<RecordBatch, RecordError> {
    let file = fs::File::open(path)?;
    let batch = read_records_csv(file)?;
    info!(
        component = "records",
        event = "records.load.finish",
        path = %path.display(),
        rows = batch.len(),
        missing_columns = ?batch.missing_required_columns()
    );
    Ok(batch)
}

pub fn read_records_csv<R: Read>(reader: R) -> Result<RecordBatch, RecordError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        records.push(parse_record(&headers, &record, row)?);
    }

    debug!(
        component = "records",
        event = "records.parse.finish",
        columns = headers.len(),
        rows = records.len()
    );

    Ok(RecordBatch::with_columns(headers, records))
}

fn parse_record(
    headers: &[String],
    record: &StringRecord,
    row: usize,
) -> Result<EmployeeRecord, RecordError> {
    let mut out = EmployeeRecord::default();

    for (idx, header) in headers.iter().enumerate() {
        let raw = record.get(idx).unwrap_or_default();
        let value = present(raw);

        match header.as_str() {
            EMPLOYEE_ID_COLUMN => out.employee_id = value.map(str::to_string),
            HIRE_DATE_COLUMN => out.hire_date = value.map(str::to_string),
            LAST_PROMOTION_DATE_COLUMN => out.last_promotion_date = value.map(str::to_string),
            DEPARTMENT_COLUMN => out.department = value.map(str::to_string),
            other => {
                if let Some(&column) = RAW_NUMERIC_COLUMNS.iter().find(|c| **c == other) {
                    let parsed = value.map(|v| parse_number(v, row, column)).transpose()?;
                    if let Some(slot) = out.raw_numeric_slot(column) {
                        *slot = parsed;
                    }
                } else {
                    out.extra.insert(other.to_string(), raw.to_string());
                }
            }
        }
    }

    Ok(out)
}

fn present(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if MISSING_TOKENS.contains(&trimmed) {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_number(raw: &str, row: usize, column: &'static str) -> Result<f64, RecordError> {
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(RecordError::InvalidNumber {
            row,
            column,
            value: raw.to_string(),
        }),
    }
}
