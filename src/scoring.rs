//! Attrition scoring, risk labels and report export.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::features::{
    assert_schema_compatible, today_utc, FeatureSchema, SchemaError, FEATURE_SCHEMA_VERSION,
};
use crate::pipeline::{FeatureMatrix, PipelineError, PreprocessingPipeline};
use crate::record::{
    EmployeeRecord, RecordBatch, DEPARTMENT_COLUMN, EMPLOYEE_ID_COLUMN, HIRE_DATE_COLUMN,
    LAST_PROMOTION_DATE_COLUMN, RAW_NUMERIC_COLUMNS,
};

/// Probabilities strictly above this are high risk.
pub const HIGH_RISK_THRESHOLD: f64 = 0.6;

pub const PROBABILITY_COLUMN: &str = "Attrition_Probability";
pub const RISK_FLAG_COLUMN: &str = "Risk_Flag";
pub const RISK_LABEL_COLUMN: &str = "Risk_Label";

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("feature width mismatch: model expects {expected}, pipeline produces {actual}")]
    WidthMismatch { expected: usize, actual: usize },
    #[error("feature column mismatch at position {position}: model expects '{expected}', pipeline produces '{actual}'")]
    ColumnMismatch {
        position: usize,
        expected: String,
        actual: String,
    },
    #[error("classifier returned {actual} probabilities for {expected} rows")]
    PredictionCount { expected: usize, actual: usize },
    #[error("classifier returned invalid probability {value} for row {row}")]
    InvalidProbability { row: usize, value: f64 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("model JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLabel {
    #[serde(rename = "High Risk")]
    High,
    #[serde(rename = "Low Risk")]
    Low,
}

impl RiskLabel {
    pub fn from_probability(probability: f64) -> Self {
        if probability > HIGH_RISK_THRESHOLD {
            Self::High
        } else {
            Self::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "High Risk",
            Self::Low => "Low Risk",
        }
    }

    pub fn flag(self) -> &'static str {
        match self {
            Self::High => "🔴 High Risk",
            Self::Low => "🟢 Low Risk",
        }
    }
}

/// An externally trained attrition model.
pub trait Classifier: Send + Sync {
    /// One probability in `[0, 1]` per feature row.
    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>, ScoringError>;

    /// Rejects a pipeline whose output layout the model was not trained on.
    fn ensure_compatible(&self, _schema: &FeatureSchema) -> Result<(), ScoringError> {
        Ok(())
    }
}

/// Logistic regression weights exported by the training job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub feature_columns: Option<Vec<String>>,
    #[serde(default)]
    pub feature_fingerprint: Option<String>,
}

impl LogisticModel {
    pub fn load(path: &Path) -> Result<Self, ScoringError> {
        let bytes = fs::read(path)?;
        let model: Self = serde_json::from_slice(&bytes)?;
        info!(
            component = "scoring",
            event = "scoring.model.loaded",
            path = %path.display(),
            coefficients = model.coefficients.len()
        );
        Ok(model)
    }

    fn logit(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(row)
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }
}

impl Classifier for LogisticModel {
    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>, ScoringError> {
        if features.width != self.coefficients.len() {
            return Err(ScoringError::WidthMismatch {
                expected: self.coefficients.len(),
                actual: features.width,
            });
        }
        Ok(features
            .rows
            .iter()
            .map(|row| sigmoid(self.logit(row)))
            .collect())
    }

    fn ensure_compatible(&self, schema: &FeatureSchema) -> Result<(), ScoringError> {
        if schema.width() != self.coefficients.len() {
            return Err(ScoringError::WidthMismatch {
                expected: self.coefficients.len(),
                actual: schema.width(),
            });
        }
        if let Some(fingerprint) = &self.feature_fingerprint {
            assert_schema_compatible(FEATURE_SCHEMA_VERSION, fingerprint, schema)?;
        }
        if let Some(columns) = &self.feature_columns {
            for (position, (expected, actual)) in columns.iter().zip(&schema.columns).enumerate() {
                if *expected != actual.name {
                    return Err(ScoringError::ColumnMismatch {
                        position,
                        expected: expected.clone(),
                        actual: actual.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEmployee {
    pub employee_id: String,
    pub record: EmployeeRecord,
    pub attrition_probability: f64,
    pub risk_label: RiskLabel,
}

impl ScoredEmployee {
    pub fn new(employee_id: String, record: EmployeeRecord, attrition_probability: f64) -> Self {
        Self {
            employee_id,
            record,
            attrition_probability,
            risk_label: RiskLabel::from_probability(attrition_probability),
        }
    }

    pub fn is_high_risk(&self) -> bool {
        self.risk_label == RiskLabel::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportScope {
    FullOrganization,
    HighRiskOnly,
}

pub fn score_batch(
    pipeline: &PreprocessingPipeline,
    classifier: &dyn Classifier,
    batch: &RecordBatch,
) -> Result<Vec<ScoredEmployee>, ScoringError> {
    score_batch_at(pipeline, classifier, batch, today_utc())
}

pub fn score_batch_at(
    pipeline: &PreprocessingPipeline,
    classifier: &dyn Classifier,
    batch: &RecordBatch,
    reference_date: NaiveDate,
) -> Result<Vec<ScoredEmployee>, ScoringError> {
    let features = pipeline.transform_at(batch, reference_date)?;
    let probabilities = classifier.predict_proba(&features)?;
    if probabilities.len() != batch.len() {
        return Err(ScoringError::PredictionCount {
            expected: batch.len(),
            actual: probabilities.len(),
        });
    }
    if let Some((row, value)) = probabilities
        .iter()
        .enumerate()
        .find(|(_, p)| !(0.0..=1.0).contains(*p))
    {
        return Err(ScoringError::InvalidProbability { row, value: *value });
    }

    let scored: Vec<ScoredEmployee> = batch
        .records()
        .iter()
        .zip(probabilities)
        .enumerate()
        .map(|(idx, (record, probability))| {
            ScoredEmployee::new(batch.employee_id(idx), record.clone(), probability)
        })
        .collect();

    info!(
        component = "scoring",
        event = "scoring.batch.finish",
        rows = scored.len(),
        high_risk = scored.iter().filter(|row| row.is_high_risk()).count()
    );

    Ok(scored)
}

/// Writes scored rows as CSV and returns how many rows were written.
pub fn write_scored_csv<W: Write>(
    writer: W,
    rows: &[ScoredEmployee],
    scope: ReportScope,
) -> Result<usize, ScoringError> {
    let extra_columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.record.extra.keys().map(String::as_str))
        .collect();

    let mut out = csv::Writer::from_writer(writer);

    let mut header = vec![
        EMPLOYEE_ID_COLUMN,
        HIRE_DATE_COLUMN,
        LAST_PROMOTION_DATE_COLUMN,
    ];
    header.extend(RAW_NUMERIC_COLUMNS);
    header.push(DEPARTMENT_COLUMN);
    header.extend(extra_columns.iter().copied());
    header.extend([PROBABILITY_COLUMN, RISK_FLAG_COLUMN, RISK_LABEL_COLUMN]);
    out.write_record(&header)?;

    let mut written = 0usize;
    for row in rows {
        if scope == ReportScope::HighRiskOnly && !row.is_high_risk() {
            continue;
        }
        let record = &row.record;
        let mut cells = vec![
            row.employee_id.clone(),
            record.hire_date.clone().unwrap_or_default(),
            record.last_promotion_date.clone().unwrap_or_default(),
        ];
        cells.extend(
            record
                .raw_numeric_values()
                .iter()
                .map(|value| value.map(|v| v.to_string()).unwrap_or_default()),
        );
        cells.push(record.department.clone().unwrap_or_default());
        for column in &extra_columns {
            cells.push(record.extra.get(*column).cloned().unwrap_or_default());
        }
        cells.push(row.attrition_probability.to_string());
        cells.push(row.risk_label.flag().to_string());
        cells.push(row.risk_label.as_str().to_string());
        out.write_record(&cells)?;
        written += 1;
    }

    out.flush()?;
    Ok(written)
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
