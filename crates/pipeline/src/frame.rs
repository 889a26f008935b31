//! Column-typed dataset frame parsed from CSV (PRD-03).
//!
//! Columns are inferred as numeric when every non-empty cell parses as a
//! float, otherwise text. Empty cells are tracked as missing values so the
//! preprocessing stage can impute them.

use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::PipelineError;

/// Fixed shuffle seed so splits are reproducible across re-runs of the
/// same job.
pub const SPLIT_SEED: u64 = 42;

/// Fraction of rows held out for testing when splitting is requested.
pub const TEST_FRACTION: f64 = 0.2;

// ---------------------------------------------------------------------------
// Column
// ---------------------------------------------------------------------------

/// A single dataset column with per-cell missing tracking.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl Column {
    /// Number of rows in the column.
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of distinct non-missing values.
    pub fn distinct_count(&self) -> usize {
        match self {
            Self::Numeric(v) => {
                let mut values: Vec<f64> = v.iter().flatten().copied().collect();
                values.sort_by(f64::total_cmp);
                values.dedup();
                values.len()
            }
            Self::Text(v) => {
                let mut values: Vec<&String> = v.iter().flatten().collect();
                values.sort();
                values.dedup();
                values.len()
            }
        }
    }

    /// Whether the column holds discrete values: text always, numeric only
    /// when every non-missing value is integral.
    pub fn is_discrete(&self) -> bool {
        match self {
            Self::Text(_) => true,
            Self::Numeric(v) => v.iter().flatten().all(|x| x.fract() == 0.0),
        }
    }

    /// Canonical label string for a cell, used for classification targets.
    /// Integral numeric values render without a fractional part.
    pub fn label_at(&self, row: usize) -> Option<String> {
        match self {
            Self::Text(v) => v.get(row)?.clone(),
            Self::Numeric(v) => {
                let x = (*v.get(row)?)?;
                if x.fract() == 0.0 {
                    Some(format!("{}", x as i64))
                } else {
                    Some(format!("{x}"))
                }
            }
        }
    }

    /// All labels as canonical strings. Errors on missing values, since a
    /// classification target must be fully populated.
    pub fn labels(&self) -> Result<Vec<String>, PipelineError> {
        (0..self.len())
            .map(|i| {
                self.label_at(i).ok_or_else(|| {
                    PipelineError::Dataset("Target column contains empty values".to_string())
                })
            })
            .collect()
    }

    /// All values as floats. Errors on missing values or text columns, since a
    /// regression target must be fully populated and numeric.
    pub fn numeric_values(&self) -> Result<Vec<f64>, PipelineError> {
        match self {
            Self::Numeric(v) => v
                .iter()
                .map(|x| {
                    x.ok_or_else(|| {
                        PipelineError::Dataset(
                            "Target column contains empty values".to_string(),
                        )
                    })
                })
                .collect(),
            Self::Text(_) => Err(PipelineError::Dataset(
                "Target column is not numeric".to_string(),
            )),
        }
    }

    /// Select a subset of rows by index.
    pub fn select_rows(&self, indices: &[usize]) -> Column {
        match self {
            Self::Numeric(v) => Self::Numeric(indices.iter().map(|&i| v[i]).collect()),
            Self::Text(v) => Self::Text(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A named collection of equal-length columns.
#[derive(Debug, Clone)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl Frame {
    /// Parse a CSV file with a header row into a typed frame.
    pub fn from_csv_path(path: &Path) -> Result<Frame, PipelineError> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| PipelineError::Dataset(format!("Failed to open CSV: {e}")))?;

        let names: Vec<String> = reader
            .headers()
            .map_err(|e| PipelineError::Dataset(format!("Failed to read CSV header: {e}")))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
        for record in reader.records() {
            let record =
                record.map_err(|e| PipelineError::Dataset(format!("Malformed CSV row: {e}")))?;
            for (col, cell) in cells.iter_mut().enumerate() {
                let raw = record.get(col).unwrap_or("").trim();
                cell.push(if raw.is_empty() {
                    None
                } else {
                    Some(raw.to_string())
                });
            }
        }

        let n_rows = cells.first().map(|c| c.len()).unwrap_or(0);
        let columns = cells.into_iter().map(infer_column).collect();

        Ok(Frame {
            names,
            columns,
            n_rows,
        })
    }

    /// Build a frame directly from named columns. Used by tests and the
    /// preprocessing stage.
    pub fn from_columns(names: Vec<String>, columns: Vec<Column>) -> Frame {
        let n_rows = columns.first().map(|c| c.len()).unwrap_or(0);
        Frame {
            names,
            columns,
            n_rows,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        let idx = self.names.iter().position(|n| n == name)?;
        self.columns.get(idx)
    }

    /// Split the frame into features and the named target column.
    ///
    /// Fails with [`PipelineError::InvalidTargetColumn`] when the column is
    /// absent.
    pub fn split_target(mut self, target: &str) -> Result<(Frame, Column), PipelineError> {
        let idx = self
            .names
            .iter()
            .position(|n| n == target)
            .ok_or_else(|| PipelineError::InvalidTargetColumn(target.to_string()))?;

        self.names.remove(idx);
        let target_column = self.columns.remove(idx);
        Ok((self, target_column))
    }

    /// Select a subset of rows by index, preserving column order.
    pub fn select_rows(&self, indices: &[usize]) -> Frame {
        Frame {
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| c.select_rows(indices))
                .collect(),
            n_rows: indices.len(),
        }
    }
}

/// Infer a column's type: numeric iff every non-empty cell parses as f64
/// and at least one cell is populated.
fn infer_column(cells: Vec<Option<String>>) -> Column {
    let mut any_value = false;
    let all_numeric = cells.iter().flatten().all(|raw| {
        any_value = true;
        raw.parse::<f64>().is_ok()
    });

    if any_value && all_numeric {
        Column::Numeric(
            cells
                .into_iter()
                .map(|c| c.and_then(|raw| raw.parse().ok()))
                .collect(),
        )
    } else {
        Column::Text(cells)
    }
}

// ---------------------------------------------------------------------------
// Train/test split
// ---------------------------------------------------------------------------

/// Row indices for the train and test partitions.
#[derive(Debug, Clone)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Split `n_rows` row indices into train/test partitions.
///
/// When `stratify_labels` is provided, each label group contributes its
/// proportional share (at least one row for groups of two or more) to the
/// test partition. Shuffling uses a fixed seed for reproducibility.
pub fn train_test_split(
    n_rows: usize,
    test_fraction: f64,
    stratify_labels: Option<&[String]>,
) -> Result<Split, PipelineError> {
    if n_rows < 2 {
        return Err(PipelineError::Dataset(
            "At least two rows are required to split the dataset".to_string(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(SPLIT_SEED);

    match stratify_labels {
        None => {
            let mut indices: Vec<usize> = (0..n_rows).collect();
            indices.shuffle(&mut rng);
            let n_test = ((n_rows as f64 * test_fraction).round() as usize)
                .clamp(1, n_rows - 1);
            let test = indices[..n_test].to_vec();
            let train = indices[n_test..].to_vec();
            Ok(Split { train, test })
        }
        Some(labels) => {
            // Group row indices by label, preserving first-seen order.
            let mut groups: Vec<(&String, Vec<usize>)> = Vec::new();
            for (i, label) in labels.iter().enumerate() {
                match groups.iter_mut().find(|(l, _)| *l == label) {
                    Some((_, rows)) => rows.push(i),
                    None => groups.push((label, vec![i])),
                }
            }

            let mut train = Vec::new();
            let mut test = Vec::new();
            for (_, mut rows) in groups {
                rows.shuffle(&mut rng);
                let n_test = if rows.len() < 2 {
                    0
                } else {
                    ((rows.len() as f64 * test_fraction).round() as usize)
                        .clamp(1, rows.len() - 1)
                };
                test.extend_from_slice(&rows[..n_test]);
                train.extend_from_slice(&rows[n_test..]);
            }

            if test.is_empty() {
                return Err(PipelineError::Dataset(
                    "Stratified split produced an empty test partition".to_string(),
                ));
            }
            Ok(Split { train, test })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // -- parsing --------------------------------------------------------------

    #[test]
    fn parses_numeric_and_text_columns() {
        let file = write_csv("age,city,score\n30,berlin,0.5\n40,paris,0.7\n");
        let frame = Frame::from_csv_path(file.path()).unwrap();

        assert_eq!(frame.n_rows(), 2);
        assert_eq!(frame.n_cols(), 3);
        assert_matches!(frame.column("age"), Some(Column::Numeric(_)));
        assert_matches!(frame.column("city"), Some(Column::Text(_)));
        assert_matches!(frame.column("score"), Some(Column::Numeric(_)));
    }

    #[test]
    fn empty_cells_become_missing() {
        let file = write_csv("age,city\n30,\n,paris\n");
        let frame = Frame::from_csv_path(file.path()).unwrap();

        assert_eq!(
            frame.column("age"),
            Some(&Column::Numeric(vec![Some(30.0), None]))
        );
        assert_eq!(
            frame.column("city"),
            Some(&Column::Text(vec![None, Some("paris".to_string())]))
        );
    }

    #[test]
    fn mixed_column_falls_back_to_text() {
        let file = write_csv("v\n1\ntwo\n3\n");
        let frame = Frame::from_csv_path(file.path()).unwrap();
        assert_matches!(frame.column("v"), Some(Column::Text(_)));
    }

    // -- target extraction ----------------------------------------------------

    #[test]
    fn split_target_removes_column() {
        let file = write_csv("a,b,label\n1,2,yes\n3,4,no\n");
        let frame = Frame::from_csv_path(file.path()).unwrap();
        let (features, target) = frame.split_target("label").unwrap();

        assert_eq!(features.column_names(), &["a", "b"]);
        assert_eq!(target.labels().unwrap(), vec!["yes", "no"]);
    }

    #[test]
    fn missing_target_column_is_an_error() {
        let file = write_csv("a,b\n1,2\n");
        let frame = Frame::from_csv_path(file.path()).unwrap();
        let err = frame.split_target("label").unwrap_err();
        assert_matches!(err, PipelineError::InvalidTargetColumn(col) if col == "label");
    }

    // -- column stats ---------------------------------------------------------

    #[test]
    fn distinct_count_ignores_missing() {
        let col = Column::Text(vec![
            Some("a".into()),
            Some("b".into()),
            Some("a".into()),
            None,
        ]);
        assert_eq!(col.distinct_count(), 2);
    }

    #[test]
    fn integral_numeric_is_discrete() {
        let col = Column::Numeric(vec![Some(0.0), Some(1.0), Some(2.0)]);
        assert!(col.is_discrete());

        let col = Column::Numeric(vec![Some(0.5), Some(1.0)]);
        assert!(!col.is_discrete());
    }

    #[test]
    fn numeric_labels_render_without_fraction() {
        let col = Column::Numeric(vec![Some(1.0), Some(0.0)]);
        assert_eq!(col.labels().unwrap(), vec!["1", "0"]);
    }

    #[test]
    fn regression_target_rejects_text() {
        let col = Column::Text(vec![Some("a".into())]);
        assert_matches!(col.numeric_values(), Err(PipelineError::Dataset(_)));
    }

    // -- splitting ------------------------------------------------------------

    #[test]
    fn unstratified_split_partitions_all_rows() {
        let split = train_test_split(10, TEST_FRACTION, None).unwrap();
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.len(), 8);

        let mut all: Vec<usize> = split.train.iter().chain(&split.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn split_is_deterministic() {
        let a = train_test_split(20, TEST_FRACTION, None).unwrap();
        let b = train_test_split(20, TEST_FRACTION, None).unwrap();
        assert_eq!(a.test, b.test);
        assert_eq!(a.train, b.train);
    }

    #[test]
    fn stratified_split_keeps_both_classes_in_test() {
        let labels: Vec<String> = (0..10)
            .map(|i| if i % 2 == 0 { "yes".into() } else { "no".into() })
            .collect();
        let split = train_test_split(10, TEST_FRACTION, Some(&labels)).unwrap();

        let test_labels: Vec<&str> = split.test.iter().map(|&i| labels[i].as_str()).collect();
        assert!(test_labels.contains(&"yes"));
        assert!(test_labels.contains(&"no"));
    }

    #[test]
    fn singleton_class_stays_in_train() {
        let labels = vec![
            "a".to_string(),
            "a".to_string(),
            "a".to_string(),
            "a".to_string(),
            "rare".to_string(),
        ];
        let split = train_test_split(5, TEST_FRACTION, Some(&labels)).unwrap();
        let rare_row = 4;
        assert!(split.train.contains(&rare_row));
        assert!(!split.test.contains(&rare_row));
    }

    #[test]
    fn too_few_rows_rejected() {
        assert_matches!(
            train_test_split(1, TEST_FRACTION, None),
            Err(PipelineError::Dataset(_))
        );
    }
}
