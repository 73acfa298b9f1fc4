//! Column transforms: numeric impute-and-scale, categorical impute-and-encode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::features::{DerivedRow, NUMERIC_FEATURES, NUMERIC_FEATURE_COUNT};
use crate::record::DEPARTMENT_COLUMN;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("column '{column}' produced a non-finite {statistic}")]
    NonFiniteStatistic {
        column: String,
        statistic: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericColumnStats {
    pub name: String,
    pub median: f64,
    pub mean: f64,
    /// Population standard deviation of the imputed column.
    pub std_dev: f64,
    pub zero_variance: bool,
}

impl NumericColumnStats {
    fn fit(name: &str, observed: &mut [f64], rows: usize) -> Result<Self, TransformError> {
        let median = if observed.is_empty() {
            warn!(
                component = "transform",
                event = "transform.fit.column_all_missing",
                column = name,
                rows
            );
            0.0
        } else {
            median_of(observed)
        };

        // Moments are taken on values divided by the largest magnitude so sums
        // and squares stay finite; missing cells count as the median.
        let imputed_count = (rows - observed.len()) as f64;
        let scale = observed
            .iter()
            .fold(median.abs(), |acc, value| acc.max(value.abs()));
        let (mean, std_dev, zero_variance) = if rows == 0 || scale == 0.0 {
            (median, 0.0, true)
        } else {
            let n = rows as f64;
            let scaled_median = median / scale;
            let scaled_mean = (observed.iter().map(|v| v / scale).sum::<f64>()
                + scaled_median * imputed_count)
                / n;
            let scaled_variance = (observed
                .iter()
                .map(|v| {
                    let d = v / scale - scaled_mean;
                    d * d
                })
                .sum::<f64>()
                + (scaled_median - scaled_mean).powi(2) * imputed_count)
                / n;
            (
                scaled_mean * scale,
                scaled_variance.sqrt() * scale,
                is_constant(scaled_variance, scaled_mean, n),
            )
        };

        let stats = Self {
            name: name.to_string(),
            median,
            mean,
            std_dev,
            zero_variance,
        };
        stats.ensure_finite()?;
        Ok(stats)
    }

    fn ensure_finite(&self) -> Result<(), TransformError> {
        for (statistic, value) in [
            ("median", self.median),
            ("mean", self.mean),
            ("standard deviation", self.std_dev),
        ] {
            if !value.is_finite() {
                return Err(TransformError::NonFiniteStatistic {
                    column: self.name.clone(),
                    statistic,
                });
            }
        }
        Ok(())
    }

    pub fn transform_value(&self, value: Option<f64>) -> f64 {
        if self.zero_variance {
            return 0.0;
        }
        let value = value.unwrap_or(self.median);
        (value - self.mean) / self.std_dev
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericImputeScale {
    pub columns: Vec<NumericColumnStats>,
}

impl NumericImputeScale {
    pub fn fit(rows: &[DerivedRow]) -> Result<Self, TransformError> {
        let columns = NUMERIC_FEATURES
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let mut observed: Vec<f64> =
                    rows.iter().filter_map(|row| row.numeric[idx]).collect();
                NumericColumnStats::fit(name, &mut observed, rows.len())
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { columns })
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    fn transform_into(&self, row: &DerivedRow, out: &mut Vec<f64>) {
        for (stats, value) in self.columns.iter().zip(row.numeric.iter()) {
            out.push(stats.transform_value(*value));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalImputeEncode {
    pub column: String,
    /// Fit-time vocabulary, sorted and unique.
    pub categories: Vec<String>,
    pub most_frequent: Option<String>,
}

impl CategoricalImputeEncode {
    pub fn fit(rows: &[DerivedRow]) -> Self {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for value in rows.iter().filter_map(|row| row.department.as_deref()) {
            *counts.entry(value).or_insert(0) += 1;
        }

        // BTreeMap order plus strict comparison keeps the smallest category on ties.
        let mut most_frequent: Option<(&str, usize)> = None;
        for (category, count) in &counts {
            if most_frequent.map_or(true, |(_, best)| *count > best) {
                most_frequent = Some((*category, *count));
            }
        }

        if counts.is_empty() {
            warn!(
                component = "transform",
                event = "transform.fit.column_all_missing",
                column = DEPARTMENT_COLUMN,
                rows = rows.len()
            );
        }

        Self {
            column: DEPARTMENT_COLUMN.to_string(),
            categories: counts.keys().map(|category| (*category).to_string()).collect(),
            most_frequent: most_frequent.map(|(category, _)| category.to_string()),
        }
    }

    pub fn width(&self) -> usize {
        self.categories.len()
    }

    /// Position of the category a value encodes to, if any.
    pub fn category_index(&self, value: Option<&str>) -> Option<usize> {
        let value = value.or(self.most_frequent.as_deref())?;
        self.categories
            .binary_search_by(|category| category.as_str().cmp(value))
            .ok()
    }

    fn transform_into(&self, row: &DerivedRow, out: &mut Vec<f64>) {
        let start = out.len();
        out.resize(start + self.categories.len(), 0.0);
        if let Some(idx) = self.category_index(row.department.as_deref()) {
            out[start + idx] = 1.0;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTransformState {
    pub numeric: NumericImputeScale,
    pub categorical: CategoricalImputeEncode,
}

impl ColumnTransformState {
    pub fn fit(rows: &[DerivedRow]) -> Result<Self, TransformError> {
        Ok(Self {
            numeric: NumericImputeScale::fit(rows)?,
            categorical: CategoricalImputeEncode::fit(rows),
        })
    }

    pub fn width(&self) -> usize {
        self.numeric.width() + self.categorical.width()
    }

    pub fn transform_row(&self, row: &DerivedRow) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.width());
        self.numeric.transform_into(row, &mut out);
        self.categorical.transform_into(row, &mut out);
        out
    }

    /// Checks that a deserialized state still matches the column layout.
    pub fn validate(&self) -> Result<(), String> {
        if self.numeric.columns.len() != NUMERIC_FEATURE_COUNT {
            return Err(format!(
                "expected {NUMERIC_FEATURE_COUNT} numeric columns, found {}",
                self.numeric.columns.len()
            ));
        }
        for (stats, expected) in self.numeric.columns.iter().zip(NUMERIC_FEATURES) {
            if stats.name != expected {
                return Err(format!(
                    "numeric column '{}' found where '{expected}' was expected",
                    stats.name
                ));
            }
            stats.ensure_finite().map_err(|err| err.to_string())?;
            if stats.std_dev < 0.0 {
                return Err(format!("column '{}' has a negative standard deviation", stats.name));
            }
        }
        if self.categorical.column != DEPARTMENT_COLUMN {
            return Err(format!(
                "categorical column '{}' is not '{DEPARTMENT_COLUMN}'",
                self.categorical.column
            ));
        }
        if self
            .categorical
            .categories
            .windows(2)
            .any(|pair| pair[0] >= pair[1])
        {
            return Err("categories must be sorted and unique".to_string());
        }
        Ok(())
    }
}

fn median_of(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        values[mid - 1] / 2.0 + values[mid] / 2.0
    } else {
        values[mid]
    }
}

/// Scale-invariant: callers may pass moments of rescaled values.
fn is_constant(variance: f64, mean: f64, n: f64) -> bool {
    if variance == 0.0 || !variance.is_finite() {
        return true;
    }
    let eps = f64::EPSILON;
    let bound = n * eps * variance + (n * mean * eps).powi(2);
    variance <= bound
}
