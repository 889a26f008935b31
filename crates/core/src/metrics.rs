//! Metric name constants and scoring math for evaluation runs (PRD-03).
//!
//! These are the canonical metric keys stored in `evaluation_jobs.results`,
//! `model_versions.latest_metrics`, and `metric_records.metrics`. The
//! scoring functions operate on label codes (classification) or raw values
//! (regression) produced by the pipeline crate.

// ---------------------------------------------------------------------------
// Metric name constants
// ---------------------------------------------------------------------------

/// Fraction of test rows predicted correctly.
pub const METRIC_ACCURACY: &str = "accuracy";

/// F1 score averaged over classes, weighted by class support.
pub const METRIC_F1_SCORE: &str = "f1_score";

/// Area under the ROC curve (binary targets with probability output only).
pub const METRIC_AUC: &str = "auc";

/// Root mean squared error.
pub const METRIC_RMSE: &str = "rmse";

/// Coefficient of determination.
pub const METRIC_R2_SCORE: &str = "r2_score";

/// Key under which insight strings are appended to the results payload.
pub const RESULT_KEY_INSIGHTS: &str = "insights";

// ---------------------------------------------------------------------------
// Rounding
// ---------------------------------------------------------------------------

/// Round a metric value to 4 decimal places, the precision persisted on
/// job results and metric records.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// ---------------------------------------------------------------------------
// Classification metrics
// ---------------------------------------------------------------------------

/// Fraction of predictions equal to the true label code.
///
/// Returns 0.0 for empty input.
pub fn accuracy(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true
        .iter()
        .zip(y_pred)
        .filter(|(t, p)| t == p)
        .count();
    correct as f64 / y_true.len() as f64
}

/// F1 score averaged over classes, weighted by each class's support in
/// `y_true`. Classes with zero precision+recall contribute 0.
pub fn weighted_f1(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }

    let mut classes: Vec<f64> = y_true.to_vec();
    classes.sort_by(f64::total_cmp);
    classes.dedup();

    let total = y_true.len() as f64;
    let mut weighted_sum = 0.0;

    for class in classes {
        let tp = y_true
            .iter()
            .zip(y_pred)
            .filter(|(t, p)| **t == class && **p == class)
            .count() as f64;
        let fp = y_true
            .iter()
            .zip(y_pred)
            .filter(|(t, p)| **t != class && **p == class)
            .count() as f64;
        let fn_ = y_true
            .iter()
            .zip(y_pred)
            .filter(|(t, p)| **t == class && **p != class)
            .count() as f64;

        let support = tp + fn_;
        let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
        let recall = if support > 0.0 { tp / support } else { 0.0 };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        weighted_sum += f1 * support / total;
    }

    weighted_sum
}

/// Area under the ROC curve for a binary target.
///
/// `y_true` holds 0.0/1.0 label codes; `scores` holds the positive-class
/// probability for each row. Computed via the rank-statistic formulation
/// (equivalent to the Mann-Whitney U), with average ranks for tied scores.
///
/// Returns `None` when only one class is present, where AUC is undefined.
pub fn roc_auc_binary(y_true: &[f64], scores: &[f64]) -> Option<f64> {
    let positives = y_true.iter().filter(|t| **t == 1.0).count();
    let negatives = y_true.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    // Sort row indices by ascending score and assign average ranks to ties.
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0_f64; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; tied scores share the average rank of the run.
        let avg_rank = (i + 1 + j + 1) as f64 / 2.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = y_true
        .iter()
        .zip(&ranks)
        .filter(|(t, _)| **t == 1.0)
        .map(|(_, r)| *r)
        .sum();

    let n_pos = positives as f64;
    let n_neg = negatives as f64;
    let u = positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0;
    Some(u / (n_pos * n_neg))
}

// ---------------------------------------------------------------------------
// Regression metrics
// ---------------------------------------------------------------------------

/// Root mean squared error. Returns 0.0 for empty input.
pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let mse: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / y_true.len() as f64;
    mse.sqrt()
}

/// Coefficient of determination (R²).
///
/// Returns 0.0 when the target has zero variance and the predictions do not
/// match it exactly, and 1.0 when residuals are zero.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    // -- round4 ---------------------------------------------------------------

    #[test]
    fn round4_truncates_to_four_places() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round4(0.99999), 1.0);
        assert_eq!(round4(1.0), 1.0);
    }

    // -- accuracy -------------------------------------------------------------

    #[test]
    fn accuracy_all_correct() {
        assert_eq!(accuracy(&[0.0, 1.0, 1.0], &[0.0, 1.0, 1.0]), 1.0);
    }

    #[test]
    fn accuracy_half_correct() {
        assert_eq!(accuracy(&[0.0, 1.0, 0.0, 1.0], &[0.0, 1.0, 1.0, 0.0]), 0.5);
    }

    #[test]
    fn accuracy_empty_is_zero() {
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    // -- weighted_f1 ----------------------------------------------------------

    #[test]
    fn weighted_f1_perfect_predictions() {
        let y = [0.0, 0.0, 1.0, 1.0, 2.0];
        assert!((weighted_f1(&y, &y) - 1.0).abs() < EPS);
    }

    #[test]
    fn weighted_f1_all_wrong_is_zero() {
        let y_true = [0.0, 0.0, 1.0, 1.0];
        let y_pred = [1.0, 1.0, 0.0, 0.0];
        assert!(weighted_f1(&y_true, &y_pred).abs() < EPS);
    }

    #[test]
    fn weighted_f1_respects_class_support() {
        // Class 0 (3 rows) perfectly predicted, class 1 (1 row) missed.
        // F1(0) with one false positive: precision 3/4, recall 1 -> 6/7.
        // Weighted: (6/7 * 3 + 0 * 1) / 4.
        let y_true = [0.0, 0.0, 0.0, 1.0];
        let y_pred = [0.0, 0.0, 0.0, 0.0];
        let expected = (6.0 / 7.0) * 3.0 / 4.0;
        assert!((weighted_f1(&y_true, &y_pred) - expected).abs() < EPS);
    }

    // -- roc_auc_binary -------------------------------------------------------

    #[test]
    fn auc_perfect_separation() {
        let y = [0.0, 0.0, 1.0, 1.0];
        let scores = [0.1, 0.2, 0.8, 0.9];
        assert!((roc_auc_binary(&y, &scores).unwrap() - 1.0).abs() < EPS);
    }

    #[test]
    fn auc_inverted_separation() {
        let y = [1.0, 1.0, 0.0, 0.0];
        let scores = [0.1, 0.2, 0.8, 0.9];
        assert!(roc_auc_binary(&y, &scores).unwrap().abs() < EPS);
    }

    #[test]
    fn auc_random_scores_half() {
        // All scores tied: every ordering is equally likely, AUC = 0.5.
        let y = [0.0, 1.0, 0.0, 1.0];
        let scores = [0.5, 0.5, 0.5, 0.5];
        assert!((roc_auc_binary(&y, &scores).unwrap() - 0.5).abs() < EPS);
    }

    #[test]
    fn auc_single_class_undefined() {
        assert!(roc_auc_binary(&[1.0, 1.0], &[0.4, 0.6]).is_none());
        assert!(roc_auc_binary(&[0.0, 0.0], &[0.4, 0.6]).is_none());
    }

    // -- rmse -----------------------------------------------------------------

    #[test]
    fn rmse_zero_for_exact_predictions() {
        assert_eq!(rmse(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn rmse_constant_offset() {
        // Every prediction off by 2 -> RMSE is 2.
        let y_true = [1.0, 2.0, 3.0];
        let y_pred = [3.0, 4.0, 5.0];
        assert!((rmse(&y_true, &y_pred) - 2.0).abs() < EPS);
    }

    // -- r2_score -------------------------------------------------------------

    #[test]
    fn r2_perfect_fit_is_one() {
        assert_eq!(r2_score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0);
    }

    #[test]
    fn r2_mean_predictor_is_zero() {
        let y_true = [1.0, 2.0, 3.0];
        let y_pred = [2.0, 2.0, 2.0];
        assert!(r2_score(&y_true, &y_pred).abs() < EPS);
    }

    #[test]
    fn r2_zero_variance_target() {
        assert_eq!(r2_score(&[2.0, 2.0], &[2.0, 2.0]), 1.0);
        assert_eq!(r2_score(&[2.0, 2.0], &[1.0, 3.0]), 0.0);
    }
}
