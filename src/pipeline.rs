//! Preprocessing pipeline: derive, impute, scale, encode, persist.
//!
//! A pipeline starts unfitted. `fit` or `load` moves it to fitted; nothing
//! moves it back. `transform` borrows immutably, so a fitted pipeline can be
//! shared across threads behind an `Arc`.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::features::{
    build_feature_schema, derive_features, input_schema_fingerprint, today_utc, FeatureSchema,
};
use crate::record::{DataShapeError, RecordBatch};
use crate::transform::{ColumnTransformState, TransformError};

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    DataShape(#[from] DataShapeError),
    #[error("pipeline is not fitted; call fit or load first")]
    NotFitted,
    #[error("cannot fit on an empty batch")]
    EmptyBatch,
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("artifact format version mismatch: expected {expected}, got {actual}")]
    FormatVersionMismatch { expected: u32, actual: u32 },
    #[error("input schema fingerprint mismatch: expected {expected}, got {actual}")]
    InputFingerprintMismatch { expected: String, actual: String },
    #[error("artifact checksum mismatch: recorded {recorded}, computed {computed}")]
    ChecksumMismatch { recorded: String, computed: String },
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),
}

/// Everything learned at fit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedState {
    pub fit_reference_date: NaiveDate,
    pub fit_rows: usize,
    pub columns: ColumnTransformState,
}

/// Dense, row-major pipeline output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub fingerprint: String,
    pub width: usize,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PipelineArtifact {
    format_version: u32,
    input_fingerprint: String,
    state_sha256: String,
    state: FittedState,
}

#[derive(Debug, Clone, PartialEq)]
struct Fitted {
    state: FittedState,
    schema: FeatureSchema,
}

impl Fitted {
    fn new(state: FittedState) -> Self {
        let schema = build_feature_schema(&state.columns.categorical.categories);
        Self { state, schema }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreprocessingPipeline {
    fitted: Option<Fitted>,
}

impl PreprocessingPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_artifact(path: &Path) -> Result<Self, PipelineError> {
        let mut pipeline = Self::new();
        pipeline.load(path)?;
        Ok(pipeline)
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn schema(&self) -> Option<&FeatureSchema> {
        self.fitted.as_ref().map(|fitted| &fitted.schema)
    }

    pub fn state(&self) -> Option<&FittedState> {
        self.fitted.as_ref().map(|fitted| &fitted.state)
    }

    /// Fits against today's UTC date.
    pub fn fit(&mut self, batch: &RecordBatch) -> Result<(), PipelineError> {
        self.fit_at(batch, today_utc())
    }

    pub fn fit_at(
        &mut self,
        batch: &RecordBatch,
        reference_date: NaiveDate,
    ) -> Result<(), PipelineError> {
        batch.require_schema()?;
        if batch.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }
        if self.is_fitted() {
            warn!(
                component = "pipeline",
                event = "pipeline.fit.refit",
                rows = batch.len()
            );
        }

        info!(
            component = "pipeline",
            event = "pipeline.fit.start",
            rows = batch.len(),
            reference_date = %reference_date
        );

        let derived = derive_features(batch.records(), reference_date);
        let state = FittedState {
            fit_reference_date: reference_date,
            fit_rows: batch.len(),
            columns: ColumnTransformState::fit(&derived)?,
        };
        let fitted = Fitted::new(state);

        info!(
            component = "pipeline",
            event = "pipeline.fit.finish",
            rows = batch.len(),
            width = fitted.schema.width(),
            categories = ?fitted.state.columns.categorical.categories,
            fingerprint = %fitted.schema.fingerprint
        );

        self.fitted = Some(fitted);
        Ok(())
    }

    /// Transforms against today's UTC date.
    pub fn transform(&self, batch: &RecordBatch) -> Result<FeatureMatrix, PipelineError> {
        self.transform_at(batch, today_utc())
    }

    pub fn transform_at(
        &self,
        batch: &RecordBatch,
        reference_date: NaiveDate,
    ) -> Result<FeatureMatrix, PipelineError> {
        let fitted = self.fitted.as_ref().ok_or(PipelineError::NotFitted)?;
        batch.require_schema()?;

        let derived = derive_features(batch.records(), reference_date);
        let rows: Vec<Vec<f64>> = derived
            .iter()
            .map(|row| fitted.state.columns.transform_row(row))
            .collect();

        debug!(
            component = "pipeline",
            event = "pipeline.transform.finish",
            rows = rows.len(),
            width = fitted.schema.width(),
            reference_date = %reference_date
        );

        Ok(FeatureMatrix {
            fingerprint: fitted.schema.fingerprint.clone(),
            width: fitted.schema.width(),
            rows,
        })
    }

    pub fn fit_transform(&mut self, batch: &RecordBatch) -> Result<FeatureMatrix, PipelineError> {
        self.fit_transform_at(batch, today_utc())
    }

    pub fn fit_transform_at(
        &mut self,
        batch: &RecordBatch,
        reference_date: NaiveDate,
    ) -> Result<FeatureMatrix, PipelineError> {
        self.fit_at(batch, reference_date)?;
        self.transform_at(batch, reference_date)
    }

    pub fn to_artifact_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        let fitted = self.fitted.as_ref().ok_or(PipelineError::NotFitted)?;
        let artifact = PipelineArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            input_fingerprint: input_schema_fingerprint(),
            state_sha256: state_sha256(&fitted.state)?,
            state: fitted.state.clone(),
        };
        Ok(serde_json::to_vec_pretty(&artifact)?)
    }

    /// Replaces the learned state with the one encoded in `bytes`.
    pub fn load_artifact_bytes(&mut self, bytes: &[u8]) -> Result<(), PipelineError> {
        let artifact: PipelineArtifact = serde_json::from_slice(bytes)?;

        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(PipelineError::FormatVersionMismatch {
                expected: ARTIFACT_FORMAT_VERSION,
                actual: artifact.format_version,
            });
        }

        let expected_fingerprint = input_schema_fingerprint();
        if artifact.input_fingerprint != expected_fingerprint {
            return Err(PipelineError::InputFingerprintMismatch {
                expected: expected_fingerprint,
                actual: artifact.input_fingerprint,
            });
        }

        let computed = state_sha256(&artifact.state)?;
        if !computed.eq_ignore_ascii_case(&artifact.state_sha256) {
            return Err(PipelineError::ChecksumMismatch {
                recorded: artifact.state_sha256,
                computed,
            });
        }

        artifact
            .state
            .columns
            .validate()
            .map_err(PipelineError::InvalidArtifact)?;

        self.fitted = Some(Fitted::new(artifact.state));
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let bytes = self.to_artifact_bytes()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        write_atomic(path, &bytes)?;

        info!(
            component = "pipeline",
            event = "pipeline.artifact.saved",
            path = %path.display(),
            bytes = bytes.len()
        );
        Ok(())
    }

    pub fn load(&mut self, path: &Path) -> Result<(), PipelineError> {
        let bytes = fs::read(path)?;
        self.load_artifact_bytes(&bytes)?;

        if let Some(schema) = self.schema() {
            info!(
                component = "pipeline",
                event = "pipeline.artifact.loaded",
                path = %path.display(),
                width = schema.width(),
                fingerprint = %schema.fingerprint
            );
        }
        Ok(())
    }
}

fn state_sha256(state: &FittedState) -> Result<String, PipelineError> {
    let bytes = serde_json::to_vec(state)?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            PipelineError::InvalidArtifact(format!("invalid output path: {}", path.display()))
        })?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}
