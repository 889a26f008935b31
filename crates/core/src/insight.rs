//! Rule-based insight generation from computed metrics (PRD-05).
//!
//! Exactly one rule set runs per job, selected by the task kind resolved
//! during evaluation. Rules are simple threshold checks over the rounded
//! metric map; when none fires, a single positive default is emitted.

use std::collections::BTreeMap;

use crate::metrics::{METRIC_ACCURACY, METRIC_AUC, METRIC_F1_SCORE, METRIC_R2_SCORE, METRIC_RMSE};
use crate::task_type::TaskKind;

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Below this F1, warn about possible class imbalance.
pub const F1_LOW_THRESHOLD: f64 = 0.7;

/// Below this AUC, warn about weak class discrimination.
pub const AUC_LOW_THRESHOLD: f64 = 0.7;

/// Above this AUC (combined with F1 below [`F1_MODERATE_THRESHOLD`]),
/// flag a threshold/imbalance mismatch.
pub const AUC_HIGH_THRESHOLD: f64 = 0.9;

/// F1 ceiling for the threshold-mismatch rule.
pub const F1_MODERATE_THRESHOLD: f64 = 0.8;

/// Below this accuracy, warn about near-random performance.
pub const ACCURACY_LOW_THRESHOLD: f64 = 0.6;

/// Below this R², warn about low explained variance.
pub const R2_LOW_THRESHOLD: f64 = 0.5;

/// Above this R², note a strong fit.
pub const R2_HIGH_THRESHOLD: f64 = 0.85;

/// Above this RMSE, warn about large average error.
pub const RMSE_HIGH_THRESHOLD: f64 = 1.0;

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Generate rule-based insights for a metric map.
///
/// `metrics` is the rounded metric map persisted on the job; missing keys
/// simply skip their rules. Returns at least one string.
pub fn generate_insights(task: TaskKind, metrics: &BTreeMap<String, f64>) -> Vec<String> {
    let mut insights = Vec::new();

    match task {
        TaskKind::Regression => {
            let rmse = metrics.get(METRIC_RMSE);
            let r2 = metrics.get(METRIC_R2_SCORE);

            if let Some(&r2) = r2 {
                if r2 < R2_LOW_THRESHOLD {
                    insights.push(format!(
                        "Low R² score ({r2:.2}): the model explains less than half of \
                         the variance in the target. Consider adding more predictive features."
                    ));
                } else if r2 > R2_HIGH_THRESHOLD {
                    insights.push(format!(
                        "Strong R² score ({r2:.2}): the model explains a large portion \
                         of the variance in the target."
                    ));
                }
            }

            if let Some(&rmse) = rmse {
                if rmse > RMSE_HIGH_THRESHOLD {
                    insights.push(format!(
                        "High RMSE ({rmse:.2}): predictions are, on average, far from \
                         the actual values. Check for outliers or consider feature scaling."
                    ));
                }
            }
        }

        TaskKind::Classification => {
            let f1 = metrics.get(METRIC_F1_SCORE).copied();
            let auc = metrics.get(METRIC_AUC).copied();
            let accuracy = metrics.get(METRIC_ACCURACY).copied();

            if let Some(f1) = f1 {
                if f1 < F1_LOW_THRESHOLD {
                    insights.push(
                        "F1 score is low. This may indicate a class imbalance; review \
                         precision and recall for each class."
                            .to_string(),
                    );
                }
            }

            if let Some(auc) = auc {
                if auc < AUC_LOW_THRESHOLD {
                    insights.push(
                        "AUC score is modest. The model has limited ability to \
                         distinguish between classes."
                            .to_string(),
                    );
                }
            }

            if let (Some(auc), Some(f1)) = (auc, f1) {
                if auc > AUC_HIGH_THRESHOLD && f1 < F1_MODERATE_THRESHOLD {
                    insights.push(
                        "High AUC but moderate F1 score. This can happen with an \
                         unoptimized classification threshold or imbalanced classes."
                            .to_string(),
                    );
                }
            }

            if let Some(accuracy) = accuracy {
                if accuracy < ACCURACY_LOW_THRESHOLD {
                    insights.push(
                        "Accuracy is low. The model is performing only slightly better \
                         than random chance."
                            .to_string(),
                    );
                }
            }
        }
    }

    if insights.is_empty() {
        insights.push(
            "Solid performance metrics. The model appears to be well-calibrated for \
             this dataset."
                .to_string(),
        );
    }

    insights
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn metric_map(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    // -- classification rules -------------------------------------------------

    #[test]
    fn low_f1_warns_about_imbalance() {
        let metrics = metric_map(&[(METRIC_F1_SCORE, 0.65), (METRIC_ACCURACY, 0.9)]);
        let insights = generate_insights(TaskKind::Classification, &metrics);
        assert!(insights.iter().any(|i| i.contains("class imbalance")));
    }

    #[test]
    fn low_auc_warns_about_discrimination() {
        let metrics = metric_map(&[(METRIC_AUC, 0.6), (METRIC_F1_SCORE, 0.9)]);
        let insights = generate_insights(TaskKind::Classification, &metrics);
        assert!(insights.iter().any(|i| i.contains("AUC score is modest")));
    }

    #[test]
    fn high_auc_moderate_f1_flags_threshold_mismatch() {
        let metrics = metric_map(&[(METRIC_AUC, 0.95), (METRIC_F1_SCORE, 0.75)]);
        let insights = generate_insights(TaskKind::Classification, &metrics);
        assert!(insights.iter().any(|i| i.contains("High AUC but moderate F1")));
    }

    #[test]
    fn low_accuracy_warns_near_random() {
        let metrics = metric_map(&[(METRIC_ACCURACY, 0.5), (METRIC_F1_SCORE, 0.9)]);
        let insights = generate_insights(TaskKind::Classification, &metrics);
        assert!(insights.iter().any(|i| i.contains("Accuracy is low")));
    }

    #[test]
    fn good_classification_metrics_yield_default() {
        let metrics = metric_map(&[
            (METRIC_ACCURACY, 0.95),
            (METRIC_F1_SCORE, 0.94),
            (METRIC_AUC, 0.89),
        ]);
        let insights = generate_insights(TaskKind::Classification, &metrics);
        assert_eq!(insights.len(), 1);
        assert!(insights[0].contains("Solid performance"));
    }

    #[test]
    fn missing_auc_skips_auc_rules() {
        // Probability output absent: no AUC key, no AUC-based insight.
        let metrics = metric_map(&[(METRIC_ACCURACY, 0.95), (METRIC_F1_SCORE, 0.93)]);
        let insights = generate_insights(TaskKind::Classification, &metrics);
        assert!(!insights.iter().any(|i| i.contains("AUC")));
    }

    // -- regression rules -----------------------------------------------------

    #[test]
    fn low_r2_warns_about_variance() {
        let metrics = metric_map(&[(METRIC_R2_SCORE, 0.3), (METRIC_RMSE, 0.5)]);
        let insights = generate_insights(TaskKind::Regression, &metrics);
        assert!(insights.iter().any(|i| i.contains("Low R² score")));
    }

    #[test]
    fn high_r2_notes_strong_fit() {
        let metrics = metric_map(&[(METRIC_R2_SCORE, 0.92), (METRIC_RMSE, 0.5)]);
        let insights = generate_insights(TaskKind::Regression, &metrics);
        assert!(insights.iter().any(|i| i.contains("Strong R² score")));
    }

    #[test]
    fn high_rmse_warns_about_error() {
        let metrics = metric_map(&[(METRIC_R2_SCORE, 0.7), (METRIC_RMSE, 2.5)]);
        let insights = generate_insights(TaskKind::Regression, &metrics);
        assert!(insights.iter().any(|i| i.contains("High RMSE")));
    }

    #[test]
    fn mid_range_regression_yields_default() {
        let metrics = metric_map(&[(METRIC_R2_SCORE, 0.7), (METRIC_RMSE, 0.4)]);
        let insights = generate_insights(TaskKind::Regression, &metrics);
        assert_eq!(insights.len(), 1);
        assert!(insights[0].contains("Solid performance"));
    }

    // -- rule set selection ---------------------------------------------------

    #[test]
    fn only_selected_rule_set_runs() {
        // Metrics that would fire rules under both kinds; the regression
        // rule set must ignore classification keys entirely.
        let metrics = metric_map(&[
            (METRIC_ACCURACY, 0.2),
            (METRIC_F1_SCORE, 0.2),
            (METRIC_R2_SCORE, 0.95),
        ]);
        let insights = generate_insights(TaskKind::Regression, &metrics);
        assert!(insights.iter().all(|i| !i.contains("Accuracy")));
        assert!(insights.iter().any(|i| i.contains("Strong R² score")));
    }
}
