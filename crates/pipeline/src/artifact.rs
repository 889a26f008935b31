//! Opaque model and preprocessor artifacts (PRD-03).
//!
//! Uploaded artifacts are JSON documents with an `algorithm` tag and a
//! free-form `params` object. Loaded objects are used exclusively through
//! the [`Estimator`] / [`Transformer`] capability interfaces; optional
//! capabilities (`fit`, `predict_proba`, declared classes) are probed at
//! runtime rather than assumed.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use evalhub_core::task_type::TaskKind;

use crate::error::PipelineError;
use crate::frame::Frame;
use crate::preprocess::{ColumnPreprocessor, Passthrough};

/// Known filenames for the model artifact inside an extracted package.
pub const MODEL_ARTIFACT_NAMES: &[&str] = &["model.json"];

/// Known filenames for the optional preprocessor artifact.
pub const PREPROCESSOR_ARTIFACT_NAMES: &[&str] = &["preprocessor.json"];

// ---------------------------------------------------------------------------
// Capability interfaces
// ---------------------------------------------------------------------------

/// A loaded model object.
///
/// `predict` is the only mandatory capability. Everything else is probed
/// with a `supports_*` check before use; calling an unsupported capability
/// returns [`PipelineError::UnsupportedCapability`].
pub trait Estimator: Send + std::fmt::Debug {
    /// Task type the artifact declares for itself, if any.
    fn declared_task(&self) -> Option<TaskKind>;

    /// Class labels the artifact declares, if any. Only meaningful for
    /// classifiers; the label order defines probability column order.
    fn classes(&self) -> Option<&[String]> {
        None
    }

    fn supports_fit(&self) -> bool {
        false
    }

    /// Fit on a feature matrix and encoded target values.
    fn fit(&mut self, _x: &[Vec<f64>], _y: &[f64]) -> Result<(), PipelineError> {
        Err(PipelineError::UnsupportedCapability("fit"))
    }

    /// Predict one value per row: a label code for classifiers, a raw
    /// value for regressors.
    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, PipelineError>;

    fn supports_proba(&self) -> bool {
        false
    }

    /// Per-class probabilities, one row per input row.
    fn predict_proba(&self, _x: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, PipelineError> {
        Err(PipelineError::UnsupportedCapability("predict_proba"))
    }
}

/// A loaded (or synthesized) preprocessing object.
pub trait Transformer: Send + std::fmt::Debug {
    fn fit(&mut self, features: &Frame) -> Result<(), PipelineError>;
    fn transform(&self, features: &Frame) -> Result<Vec<Vec<f64>>, PipelineError>;
}

// ---------------------------------------------------------------------------
// Artifact loading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ArtifactDoc {
    algorithm: String,
    #[serde(default)]
    params: serde_json::Value,
}

fn read_artifact(path: &Path) -> Result<ArtifactDoc, PipelineError> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| PipelineError::InvalidArtifact(format!("{}: {e}", path.display())))
}

fn parse_params<T: serde::de::DeserializeOwned>(
    algorithm: &str,
    params: serde_json::Value,
) -> Result<T, PipelineError> {
    serde_json::from_value(params)
        .map_err(|e| PipelineError::InvalidArtifact(format!("{algorithm} params: {e}")))
}

/// Load a model artifact and build the estimator it describes.
pub fn load_estimator(path: &Path) -> Result<Box<dyn Estimator>, PipelineError> {
    let doc = read_artifact(path)?;
    match doc.algorithm.as_str() {
        "linear_regression" => {
            let params: LinearRegressionParams = parse_params(&doc.algorithm, doc.params)?;
            Ok(Box::new(LinearRegressor::new(params)))
        }
        "logistic_regression" => {
            let params: LogisticRegressionParams = parse_params(&doc.algorithm, doc.params)?;
            Ok(Box::new(LogisticClassifier::new(params)))
        }
        "majority_class" => {
            let params: MajorityClassParams = parse_params(&doc.algorithm, doc.params)?;
            Ok(Box::new(MajorityClassifier::new(params)))
        }
        other => Err(PipelineError::InvalidArtifact(format!(
            "Unknown algorithm '{other}'"
        ))),
    }
}

/// Load a preprocessor artifact and build the transformer it describes.
pub fn load_transformer(path: &Path) -> Result<Box<dyn Transformer>, PipelineError> {
    let doc = read_artifact(path)?;
    match doc.algorithm.as_str() {
        "standard_pipeline" => Ok(Box::new(ColumnPreprocessor::new())),
        "passthrough" => Ok(Box::new(Passthrough)),
        other => Err(PipelineError::InvalidArtifact(format!(
            "Unknown preprocessor '{other}'"
        ))),
    }
}

/// Verify a row's width against the fitted coefficient width.
fn check_width(expected: usize, x: &[Vec<f64>]) -> Result<(), PipelineError> {
    if let Some(row) = x.first() {
        if row.len() != expected {
            return Err(PipelineError::InvalidArtifact(format!(
                "Feature width {} does not match model width {expected}",
                row.len()
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Linear regression
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct LinearRegressionParams {
    #[serde(default)]
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
}

/// Ordinary least squares regressor. Fitting solves the normal equations
/// with a small ridge term for numerical stability.
#[derive(Debug)]
pub struct LinearRegressor {
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LinearRegressor {
    pub fn new(params: LinearRegressionParams) -> Self {
        Self {
            coefficients: params.coefficients,
            intercept: params.intercept,
        }
    }
}

impl Estimator for LinearRegressor {
    fn declared_task(&self) -> Option<TaskKind> {
        Some(TaskKind::Regression)
    }

    fn supports_fit(&self) -> bool {
        true
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), PipelineError> {
        let n_features = x.first().map(Vec::len).unwrap_or(0);
        let solved = solve_least_squares(x, y, n_features)?;
        self.intercept = solved[0];
        self.coefficients = solved[1..].to_vec();
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, PipelineError> {
        check_width(self.coefficients.len(), x)?;
        Ok(x.iter()
            .map(|row| {
                self.intercept
                    + row
                        .iter()
                        .zip(&self.coefficients)
                        .map(|(v, c)| v * c)
                        .sum::<f64>()
            })
            .collect())
    }
}

/// Solve `min ||Xb - y||` for `b = [intercept, coefficients...]` via the
/// normal equations with Gaussian elimination. A tiny ridge term keeps
/// singular systems solvable.
fn solve_least_squares(
    x: &[Vec<f64>],
    y: &[f64],
    n_features: usize,
) -> Result<Vec<f64>, PipelineError> {
    if x.is_empty() {
        return Err(PipelineError::Dataset(
            "Cannot fit a model on an empty training set".to_string(),
        ));
    }

    let dim = n_features + 1; // bias column first
    let mut ata = vec![vec![0.0_f64; dim]; dim];
    let mut atb = vec![0.0_f64; dim];

    for (row, &target) in x.iter().zip(y) {
        let mut augmented = Vec::with_capacity(dim);
        augmented.push(1.0);
        augmented.extend_from_slice(row);
        for i in 0..dim {
            atb[i] += augmented[i] * target;
            for j in 0..dim {
                ata[i][j] += augmented[i] * augmented[j];
            }
        }
    }

    // Ridge term for numerical stability on collinear features.
    for i in 0..dim {
        ata[i][i] += 1e-8;
    }

    // Gaussian elimination with partial pivoting.
    for col in 0..dim {
        let pivot = (col..dim)
            .max_by(|&a, &b| ata[a][col].abs().total_cmp(&ata[b][col].abs()))
            .unwrap_or(col);
        ata.swap(col, pivot);
        atb.swap(col, pivot);

        let pivot_value = ata[col][col];
        if pivot_value.abs() < 1e-12 {
            return Err(PipelineError::Dataset(
                "Training features are degenerate; cannot fit a linear model".to_string(),
            ));
        }

        for row in (col + 1)..dim {
            let factor = ata[row][col] / pivot_value;
            for k in col..dim {
                ata[row][k] -= factor * ata[col][k];
            }
            atb[row] -= factor * atb[col];
        }
    }

    let mut solution = vec![0.0_f64; dim];
    for row in (0..dim).rev() {
        let mut acc = atb[row];
        for k in (row + 1)..dim {
            acc -= ata[row][k] * solution[k];
        }
        solution[row] = acc / ata[row][row];
    }

    Ok(solution)
}

// ---------------------------------------------------------------------------
// Logistic regression
// ---------------------------------------------------------------------------

fn default_learning_rate() -> f64 {
    0.1
}

fn default_epochs() -> usize {
    300
}

#[derive(Debug, Deserialize)]
pub struct LogisticRegressionParams {
    #[serde(default)]
    pub weights: Vec<f64>,
    #[serde(default)]
    pub bias: f64,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
}

impl Default for LogisticRegressionParams {
    fn default() -> Self {
        Self {
            weights: Vec::new(),
            bias: 0.0,
            classes: Vec::new(),
            learning_rate: default_learning_rate(),
            epochs: default_epochs(),
        }
    }
}

/// Binary classifier with sigmoid probability output. Fitting runs plain
/// gradient descent for a fixed number of epochs.
#[derive(Debug)]
pub struct LogisticClassifier {
    weights: Vec<f64>,
    bias: f64,
    classes: Vec<String>,
    learning_rate: f64,
    epochs: usize,
}

impl LogisticClassifier {
    pub fn new(params: LogisticRegressionParams) -> Self {
        Self {
            weights: params.weights,
            bias: params.bias,
            classes: params.classes,
            learning_rate: params.learning_rate,
            epochs: params.epochs.max(1),
        }
    }

    fn raw_score(&self, row: &[f64]) -> f64 {
        self.bias
            + row
                .iter()
                .zip(&self.weights)
                .map(|(v, w)| v * w)
                .sum::<f64>()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Estimator for LogisticClassifier {
    fn declared_task(&self) -> Option<TaskKind> {
        Some(TaskKind::Classification)
    }

    fn classes(&self) -> Option<&[String]> {
        if self.classes.is_empty() {
            None
        } else {
            Some(&self.classes)
        }
    }

    fn supports_fit(&self) -> bool {
        true
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), PipelineError> {
        if x.is_empty() {
            return Err(PipelineError::Dataset(
                "Cannot fit a model on an empty training set".to_string(),
            ));
        }
        if y.iter().any(|&code| code != 0.0 && code != 1.0) {
            return Err(PipelineError::Dataset(
                "Logistic regression requires a binary target".to_string(),
            ));
        }

        let n_features = x.first().map(Vec::len).unwrap_or(0);
        if self.weights.len() != n_features {
            self.weights = vec![0.0; n_features];
            self.bias = 0.0;
        }

        let n = x.len() as f64;
        for _ in 0..self.epochs {
            let mut grad_w = vec![0.0_f64; n_features];
            let mut grad_b = 0.0_f64;
            for (row, &target) in x.iter().zip(y) {
                let error = sigmoid(self.raw_score(row)) - target;
                grad_b += error;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += error * v;
                }
            }
            self.bias -= self.learning_rate * grad_b / n;
            for (w, g) in self.weights.iter_mut().zip(&grad_w) {
                *w -= self.learning_rate * g / n;
            }
        }
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, PipelineError> {
        check_width(self.weights.len(), x)?;
        Ok(x.iter()
            .map(|row| {
                if sigmoid(self.raw_score(row)) >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            })
            .collect())
    }

    fn supports_proba(&self) -> bool {
        true
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, PipelineError> {
        check_width(self.weights.len(), x)?;
        Ok(x.iter()
            .map(|row| {
                let p = sigmoid(self.raw_score(row));
                vec![1.0 - p, p]
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Majority class
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct MajorityClassParams {
    /// Pre-trained majority label code; recomputed on fit.
    #[serde(default)]
    pub label_code: Option<f64>,
    #[serde(default)]
    pub classes: Vec<String>,
}

/// Baseline classifier that always predicts the most frequent training
/// label. Deliberately exposes no probability output so the pipeline's
/// AUC-when-computable branch is exercised.
#[derive(Debug)]
pub struct MajorityClassifier {
    label_code: Option<f64>,
    classes: Vec<String>,
}

impl MajorityClassifier {
    pub fn new(params: MajorityClassParams) -> Self {
        Self {
            label_code: params.label_code,
            classes: params.classes,
        }
    }
}

impl Estimator for MajorityClassifier {
    fn declared_task(&self) -> Option<TaskKind> {
        Some(TaskKind::Classification)
    }

    fn classes(&self) -> Option<&[String]> {
        if self.classes.is_empty() {
            None
        } else {
            Some(&self.classes)
        }
    }

    fn supports_fit(&self) -> bool {
        true
    }

    fn fit(&mut self, _x: &[Vec<f64>], y: &[f64]) -> Result<(), PipelineError> {
        let mut counts: Vec<(f64, usize)> = Vec::new();
        for &code in y {
            match counts.iter_mut().find(|(c, _)| *c == code) {
                Some((_, n)) => *n += 1,
                None => counts.push((code, 1)),
            }
        }
        self.label_code = counts
            .into_iter()
            .max_by_key(|(_, n)| *n)
            .map(|(code, _)| code);
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, PipelineError> {
        let code = self.label_code.ok_or_else(|| {
            PipelineError::InvalidArtifact(
                "majority_class artifact has no label_code and was not fitted".to_string(),
            )
        })?;
        Ok(vec![code; x.len()])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
