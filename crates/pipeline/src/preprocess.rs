//! Preprocessing: auto-synthesized column pipeline and label encoding
//! (PRD-03).
//!
//! When a submission carries no preprocessor artifact, the worker inspects
//! the training features and synthesizes one: numeric columns get median
//! imputation + standard scaling, categorical columns get constant
//! imputation + one-hot encoding. Unknown categories at transform time
//! encode as all-zero, mirroring a tolerant one-hot encoder.

use crate::artifact::Transformer;
use crate::error::PipelineError;
use crate::frame::{Column, Frame};

/// Constant used to impute missing categorical cells.
pub const MISSING_CATEGORY: &str = "missing";

// ---------------------------------------------------------------------------
// Auto-synthesized column pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct NumericStats {
    name: String,
    median: f64,
    mean: f64,
    std: f64,
}

#[derive(Debug, Clone)]
struct CategoricalStats {
    name: String,
    categories: Vec<String>,
}

/// Column-wise preprocessing pipeline.
///
/// Unfitted until [`Transformer::fit`] runs; `transform` before `fit` is an
/// error. Output width = numeric column count + total one-hot category
/// count, with numeric columns first in frame order.
#[derive(Debug)]
pub struct ColumnPreprocessor {
    numeric: Vec<NumericStats>,
    categorical: Vec<CategoricalStats>,
    fitted: bool,
}

impl ColumnPreprocessor {
    pub fn new() -> Self {
        Self {
            numeric: Vec::new(),
            categorical: Vec::new(),
            fitted: false,
        }
    }

    /// Width of the transformed feature matrix.
    pub fn output_width(&self) -> usize {
        self.numeric.len()
            + self
                .categorical
                .iter()
                .map(|c| c.categories.len())
                .sum::<usize>()
    }
}

impl Default for ColumnPreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for ColumnPreprocessor {
    fn fit(&mut self, features: &Frame) -> Result<(), PipelineError> {
        self.numeric.clear();
        self.categorical.clear();

        for (name, column) in features.columns() {
            match column {
                Column::Numeric(values) => {
                    let present: Vec<f64> = values.iter().flatten().copied().collect();
                    let median = median_of(&present);
                    // Mean/std are computed over median-imputed values so
                    // transform-time imputation lands at a scaled median.
                    let imputed: Vec<f64> =
                        values.iter().map(|v| v.unwrap_or(median)).collect();
                    let mean = imputed.iter().sum::<f64>() / imputed.len().max(1) as f64;
                    let variance = imputed
                        .iter()
                        .map(|v| (v - mean).powi(2))
                        .sum::<f64>()
                        / imputed.len().max(1) as f64;
                    self.numeric.push(NumericStats {
                        name: name.to_string(),
                        median,
                        mean,
                        std: variance.sqrt(),
                    });
                }
                Column::Text(values) => {
                    let mut categories: Vec<String> = values
                        .iter()
                        .map(|v| v.clone().unwrap_or_else(|| MISSING_CATEGORY.to_string()))
                        .collect();
                    categories.sort();
                    categories.dedup();
                    self.categorical.push(CategoricalStats {
                        name: name.to_string(),
                        categories,
                    });
                }
            }
        }

        self.fitted = true;
        Ok(())
    }

    fn transform(&self, features: &Frame) -> Result<Vec<Vec<f64>>, PipelineError> {
        if !self.fitted {
            return Err(PipelineError::Dataset(
                "Preprocessor used before fitting".to_string(),
            ));
        }

        let n_rows = features.n_rows();
        let mut rows = vec![Vec::with_capacity(self.output_width()); n_rows];

        for stats in &self.numeric {
            let column = features.column(&stats.name).ok_or_else(|| {
                PipelineError::Dataset(format!(
                    "Column '{}' missing at transform time",
                    stats.name
                ))
            })?;
            let Column::Numeric(values) = column else {
                return Err(PipelineError::Dataset(format!(
                    "Column '{}' changed type between fit and transform",
                    stats.name
                )));
            };
            for (row, value) in rows.iter_mut().zip(values) {
                let v = value.unwrap_or(stats.median);
                let scaled = if stats.std > 0.0 {
                    (v - stats.mean) / stats.std
                } else {
                    0.0
                };
                row.push(scaled);
            }
        }

        for stats in &self.categorical {
            let column = features.column(&stats.name).ok_or_else(|| {
                PipelineError::Dataset(format!(
                    "Column '{}' missing at transform time",
                    stats.name
                ))
            })?;
            let Column::Text(values) = column else {
                return Err(PipelineError::Dataset(format!(
                    "Column '{}' changed type between fit and transform",
                    stats.name
                )));
            };
            for (row, value) in rows.iter_mut().zip(values) {
                let label = value.clone().unwrap_or_else(|| MISSING_CATEGORY.to_string());
                // Unknown categories encode as all-zero.
                for category in &stats.categories {
                    row.push(if *category == label { 1.0 } else { 0.0 });
                }
            }
        }

        Ok(rows)
    }
}

/// Synthesize a preprocessor from the training features.
///
/// Returns `None` when the feature set is empty (no columns to process),
/// in which case the pipeline records that no preprocessing was needed.
pub fn build_auto_preprocessor(features: &Frame) -> Option<ColumnPreprocessor> {
    if features.n_cols() == 0 {
        return None;
    }
    Some(ColumnPreprocessor::new())
}

fn median_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// ---------------------------------------------------------------------------
// Passthrough
// ---------------------------------------------------------------------------

/// Supplied-artifact transformer that forwards numeric columns untouched.
/// Missing cells become 0.0; text columns are rejected.
#[derive(Debug)]
pub struct Passthrough;

impl Transformer for Passthrough {
    fn fit(&mut self, _features: &Frame) -> Result<(), PipelineError> {
        Ok(())
    }

    fn transform(&self, features: &Frame) -> Result<Vec<Vec<f64>>, PipelineError> {
        let n_rows = features.n_rows();
        let mut rows = vec![Vec::with_capacity(features.n_cols()); n_rows];
        for (name, column) in features.columns() {
            let Column::Numeric(values) = column else {
                return Err(PipelineError::Dataset(format!(
                    "Passthrough preprocessor requires numeric features; '{name}' is not"
                )));
            };
            for (row, value) in rows.iter_mut().zip(values) {
                row.push(value.unwrap_or(0.0));
            }
        }
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Label encoding
// ---------------------------------------------------------------------------

/// Mapping between class labels and the float codes estimators operate on.
///
/// Artifact-declared classes take the leading codes (their order defines
/// probability column order); labels seen only in the dataset are appended.
#[derive(Debug, Clone)]
pub struct LabelEncoding {
    classes: Vec<String>,
}

impl LabelEncoding {
    pub fn fit(labels: &[String], declared: Option<&[String]>) -> Self {
        let mut classes: Vec<String> = declared.map(<[String]>::to_vec).unwrap_or_default();
        for label in labels {
            if !classes.contains(label) {
                classes.push(label.clone());
            }
        }
        Self { classes }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Encode labels to their class codes.
    pub fn encode(&self, labels: &[String]) -> Vec<f64> {
        labels
            .iter()
            .map(|label| {
                self.classes
                    .iter()
                    .position(|c| c == label)
                    .map(|idx| idx as f64)
                    // Unknown at encode time cannot happen for labels seen
                    // by fit; guard with an out-of-range code regardless.
                    .unwrap_or(-1.0)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
