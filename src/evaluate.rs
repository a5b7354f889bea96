//! Holdout metrics and stratified cross-validation
//!
//! Purely diagnostic: nothing here writes to disk or touches a persisted
//! pipeline.

use crate::data::TrainingRecord;
use crate::error::ChurnError;
use crate::pipeline::InferencePipeline;
use crate::schema::FeatureRow;
use crate::train::{fit_pipeline, TrainingConfig};
use std::cmp::Ordering;
use tracing::{debug, info};

/// The classifier's native label cut
pub const NATIVE_THRESHOLD: f64 = 0.5;

/// Number of folds used when none is given
pub const DEFAULT_FOLDS: usize = 5;

/// Holdout scores of a fitted pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoldoutMetrics {
    pub accuracy: f64,
    /// F1 of the churn class
    pub f1: f64,
    /// Area under the ROC curve, from probabilities
    pub roc_auc: f64,
    /// Matthews correlation coefficient
    pub mcc: f64,
}

/// Binary confusion counts with churn as the positive class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    pub fn from_labels(y_true: &[u8], y_pred: &[u8]) -> Self {
        let mut cm = Self::default();
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t == 1, p == 1) {
                (true, true) => cm.true_positives += 1,
                (false, true) => cm.false_positives += 1,
                (false, false) => cm.true_negatives += 1,
                (true, false) => cm.false_negatives += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.true_positives + self.true_negatives) as f64 / total as f64
    }

    /// F1 of the positive class; 0 when there are no positive predictions or labels
    pub fn f1(&self) -> f64 {
        let denom = 2 * self.true_positives + self.false_positives + self.false_negatives;
        if denom == 0 {
            return 0.0;
        }
        2.0 * self.true_positives as f64 / denom as f64
    }

    /// Matthews correlation coefficient; 0 when any marginal is empty
    pub fn mcc(&self) -> f64 {
        let tp = self.true_positives as f64;
        let fp = self.false_positives as f64;
        let tn = self.true_negatives as f64;
        let fn_ = self.false_negatives as f64;

        let denom = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();
        if denom == 0.0 {
            return 0.0;
        }
        (tp * tn - fp * fn_) / denom
    }
}

/// ROC AUC via the Mann-Whitney rank statistic, averaging ranks over ties
///
/// Fails with `EvaluationError` when `y_true` holds a single class.
pub fn roc_auc(y_true: &[u8], scores: &[f64]) -> crate::Result<f64> {
    if y_true.len() != scores.len() {
        return Err(ChurnError::Evaluation(format!(
            "{} labels but {} scores",
            y_true.len(),
            scores.len()
        )));
    }

    let n_pos = y_true.iter().filter(|&&y| y == 1).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(ChurnError::Evaluation(
            "ROC AUC is undefined when only one class is present".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; tied block [start, end) shares the mean rank
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }

    let positive_rank_sum: f64 = y_true
        .iter()
        .zip(&ranks)
        .filter(|&(&y, _)| y == 1)
        .map(|(_, &r)| r)
        .sum();
    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Ok((positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Holdout metrics at the classifier's native 0.5 cut
pub fn evaluate(pipeline: &InferencePipeline, holdout: &[TrainingRecord]) -> crate::Result<HoldoutMetrics> {
    evaluate_at(pipeline, holdout, NATIVE_THRESHOLD)
}

/// Holdout metrics with labels derived as `probability > threshold`
pub fn evaluate_at(
    pipeline: &InferencePipeline,
    holdout: &[TrainingRecord],
    threshold: f64,
) -> crate::Result<HoldoutMetrics> {
    if holdout.is_empty() {
        return Err(ChurnError::Evaluation("holdout set is empty".to_string()));
    }

    let rows: Vec<FeatureRow> = holdout.iter().map(|r| r.features.clone()).collect();
    let y_true: Vec<u8> = holdout.iter().map(|r| r.churn).collect();
    let probabilities = pipeline.predict_proba(&rows).to_vec();
    let y_pred: Vec<u8> = probabilities.iter().map(|&p| u8::from(p > threshold)).collect();

    let cm = ConfusionMatrix::from_labels(&y_true, &y_pred);
    let metrics = HoldoutMetrics {
        accuracy: cm.accuracy(),
        f1: cm.f1(),
        roc_auc: roc_auc(&y_true, &probabilities)?,
        mcc: cm.mcc(),
    };

    info!(
        threshold,
        accuracy = metrics.accuracy,
        f1 = metrics.f1,
        roc_auc = metrics.roc_auc,
        mcc = metrics.mcc,
        "holdout metrics"
    );
    Ok(metrics)
}

/// Stratified K-fold splitter over binary labels
///
/// Deterministic: each class's indices are taken in source order and dealt
/// into contiguous folds, the first `n_class % k` folds receiving one extra row.
#[derive(Debug, Clone, Copy)]
pub struct StratifiedKFold {
    n_splits: usize,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize) -> Self {
        Self { n_splits }
    }

    /// (train indices, test indices) per fold, both sorted
    pub fn split(&self, labels: &[u8]) -> crate::Result<Vec<(Vec<usize>, Vec<usize>)>> {
        if self.n_splits < 2 {
            return Err(ChurnError::Evaluation(format!(
                "cross-validation needs at least 2 folds, got {}",
                self.n_splits
            )));
        }

        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); self.n_splits];
        for class in [0u8, 1u8] {
            let members: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter(|&(_, &y)| y == class)
                .map(|(i, _)| i)
                .collect();
            if members.len() < self.n_splits {
                return Err(ChurnError::Evaluation(format!(
                    "class {class} has {} rows, fewer than {} folds",
                    members.len(),
                    self.n_splits
                )));
            }

            let fold_size = members.len() / self.n_splits;
            let remainder = members.len() % self.n_splits;
            let mut start = 0;
            for (i, fold) in folds.iter_mut().enumerate() {
                let end = start + fold_size + usize::from(i < remainder);
                fold.extend_from_slice(&members[start..end]);
                start = end;
            }
        }

        Ok(folds
            .into_iter()
            .map(|mut test| {
                test.sort_unstable();
                let train = (0..labels.len())
                    .filter(|i| test.binary_search(i).is_err())
                    .collect();
                (train, test)
            })
            .collect())
    }
}

/// Per-fold F1 scores of a cross-validation run
#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidationReport {
    pub scores: Vec<f64>,
}

impl CrossValidationReport {
    pub fn mean(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().sum::<f64>() / self.scores.len() as f64
    }

    /// Population standard deviation
    pub fn std(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self.scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>()
            / self.scores.len() as f64;
        variance.sqrt()
    }

    pub fn min(&self) -> f64 {
        self.scores.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.scores.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Stratified K-fold cross-validation of the full pipeline, scored by F1
///
/// Preprocessor, class weights and classifier are refit on every fold's
/// training part; the fold's test part is scored at the native cut.
pub fn cross_validate(
    config: &TrainingConfig,
    training: &[TrainingRecord],
    k: usize,
) -> crate::Result<CrossValidationReport> {
    let labels: Vec<u8> = training.iter().map(|r| r.churn).collect();
    let folds = StratifiedKFold::new(k).split(&labels)?;

    let mut scores = Vec::with_capacity(k);
    for (fold, (train_idx, test_idx)) in folds.iter().enumerate() {
        let fold_train: Vec<TrainingRecord> = train_idx.iter().map(|&i| training[i].clone()).collect();
        let (pipeline, _) = fit_pipeline(config, &fold_train)?;

        let rows: Vec<FeatureRow> = test_idx.iter().map(|&i| training[i].features.clone()).collect();
        let y_true: Vec<u8> = test_idx.iter().map(|&i| labels[i]).collect();
        let y_pred: Vec<u8> = pipeline
            .predict_proba(&rows)
            .iter()
            .map(|&p| u8::from(p > NATIVE_THRESHOLD))
            .collect();

        let f1 = ConfusionMatrix::from_labels(&y_true, &y_pred).f1();
        debug!(fold, train_rows = train_idx.len(), test_rows = test_idx.len(), f1, "fold scored");
        scores.push(f1);
    }

    let report = CrossValidationReport { scores };
    info!(k, mean = report.mean(), std = report.std(), "cross-validation");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::{fast_config, synthetic_records, train};

    #[test]
    fn test_confusion_matrix_metrics() {
        let y_true = [1, 1, 1, 0, 0, 0, 0, 0];
        let y_pred = [1, 1, 0, 1, 0, 0, 0, 0];
        let cm = ConfusionMatrix::from_labels(&y_true, &y_pred);

        assert_eq!(cm.true_positives, 2);
        assert_eq!(cm.false_negatives, 1);
        assert_eq!(cm.false_positives, 1);
        assert_eq!(cm.true_negatives, 4);
        assert!((cm.accuracy() - 0.75).abs() < 1e-12);
        assert!((cm.f1() - 2.0 / 3.0).abs() < 1e-12);
        // (2*4 - 1*1) / sqrt(3*3*5*5)
        assert!((cm.mcc() - 7.0 / 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_undefined_f1_and_mcc_are_zero() {
        let cm = ConfusionMatrix::from_labels(&[0, 0, 0], &[0, 0, 0]);
        assert_eq!(cm.f1(), 0.0);
        assert_eq!(cm.mcc(), 0.0);
        assert_eq!(cm.accuracy(), 1.0);
    }

    #[test]
    fn test_roc_auc() {
        assert_eq!(roc_auc(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9]).unwrap(), 1.0);
        assert_eq!(roc_auc(&[1, 1, 0, 0], &[0.1, 0.2, 0.8, 0.9]).unwrap(), 0.0);
        assert_eq!(roc_auc(&[0, 1, 0, 1], &[0.5, 0.5, 0.5, 0.5]).unwrap(), 0.5);
        // one positive ties one negative: (1 + 0.5) / 2
        assert_eq!(roc_auc(&[0, 0, 1], &[0.2, 0.6, 0.6]).unwrap(), 0.75);
    }

    #[test]
    fn test_roc_auc_single_class_is_evaluation_error() {
        let err = roc_auc(&[1, 1, 1], &[0.2, 0.4, 0.9]).unwrap_err();
        assert!(matches!(err, ChurnError::Evaluation(_)));
    }

    #[test]
    fn test_stratified_kfold_partitions_every_row_once() {
        let labels: Vec<u8> = (0..53).map(|i| u8::from(i % 4 == 0)).collect();
        let folds = StratifiedKFold::new(5).split(&labels).unwrap();
        assert_eq!(folds.len(), 5);

        let mut seen = vec![0usize; labels.len()];
        for (train, test) in &folds {
            assert_eq!(train.len() + test.len(), labels.len());
            let positives = test.iter().filter(|&&i| labels[i] == 1).count();
            assert!((2..=3).contains(&positives));
            for &i in test {
                seen[i] += 1;
            }
        }
        assert!(seen.iter().all(|&c| c == 1));

        assert_eq!(folds, StratifiedKFold::new(5).split(&labels).unwrap());
    }

    #[test]
    fn test_stratified_kfold_rejects_small_classes() {
        let labels = [0, 0, 0, 0, 0, 0, 1, 1];
        assert!(StratifiedKFold::new(5).split(&labels).is_err());
        assert!(StratifiedKFold::new(1).split(&labels).is_err());
    }

    #[test]
    fn test_cross_validation_report_statistics() {
        let report = CrossValidationReport {
            scores: vec![0.5, 0.7, 0.6, 0.8, 0.4],
        };
        assert!((report.mean() - 0.6).abs() < 1e-12);
        assert!((report.std() - 0.02f64.sqrt()).abs() < 1e-12);
        assert_eq!(report.min(), 0.4);
        assert_eq!(report.max(), 0.8);
    }

    #[test]
    fn test_evaluate_on_learnable_data() {
        let outcome = train(&synthetic_records(300), &fast_config()).unwrap();
        let metrics = evaluate(&outcome.pipeline, &outcome.holdout).unwrap();

        assert!(metrics.roc_auc > 0.8, "auc {}", metrics.roc_auc);
        assert!((0.0..=1.0).contains(&metrics.accuracy));
        assert!((-1.0..=1.0).contains(&metrics.mcc));

        let lowered = evaluate_at(&outcome.pipeline, &outcome.holdout, 0.40).unwrap();
        assert_eq!(lowered.roc_auc, metrics.roc_auc);
    }

    #[test]
    fn test_cross_validate_reports_one_score_per_fold() {
        let records = synthetic_records(150);
        let report = cross_validate(&fast_config(), &records, DEFAULT_FOLDS).unwrap();
        assert_eq!(report.scores.len(), DEFAULT_FOLDS);
        assert!(report.scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(report.std() >= 0.0);
    }
}
