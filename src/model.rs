//! Gradient-boosted decision tree classifier for churn probability
//!
//! Newton boosting on the logistic loss with per-class sample weights.
//! Each round fits a depth-wise regression tree to the weighted gradients
//! of a row subsample, splitting on pre-computed quantile borders.

use crate::error::ChurnError;
use linfa::traits::{Fit, PredictInplace};
use linfa::DatasetBase;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Data, Ix2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Per-class loss weights used at fit time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    /// Weight of the no-churn class (label 0)
    pub negative: f64,
    /// Weight of the churn class (label 1)
    pub positive: f64,
}

impl Default for ClassWeights {
    fn default() -> Self {
        Self {
            negative: 1.0,
            positive: 1.0,
        }
    }
}

impl ClassWeights {
    /// "Balanced" weights: `n_samples / (n_classes * n_class_samples)`
    ///
    /// The majority class ends up below 1 and the minority class above 1.
    pub fn balanced(labels: &[u8]) -> crate::Result<Self> {
        let n = labels.len();
        let positives = labels.iter().filter(|&&y| y == 1).count();
        let negatives = labels.iter().filter(|&&y| y == 0).count();

        if positives + negatives != n {
            return Err(ChurnError::Fit("labels must be 0 or 1".to_string()));
        }
        if positives == 0 || negatives == 0 {
            return Err(ChurnError::Fit(
                "class weights need both churn classes in the training split".to_string(),
            ));
        }

        Ok(Self {
            negative: n as f64 / (2.0 * negatives as f64),
            positive: n as f64 / (2.0 * positives as f64),
        })
    }

    pub fn weight(&self, label: usize) -> f64 {
        if label == 1 {
            self.positive
        } else {
            self.negative
        }
    }
}

/// Boosting hyperparameters
///
/// Defaults are the pre-tuned production constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbtParams {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Shrinkage applied to every leaf value
    pub learning_rate: f64,
    /// Maximum depth of each tree
    pub max_depth: usize,
    /// Fraction of rows sampled, without replacement, for each tree
    pub subsample: f64,
    /// Fraction of features considered at each tree level
    pub colsample_bylevel: f64,
    /// Minimum number of training rows in a leaf
    pub min_samples_leaf: usize,
    /// L2 regularization on leaf values
    pub l2_leaf_reg: f64,
    /// Maximum number of histogram bins per feature
    pub max_bins: usize,
    /// Seed for row and column sampling
    pub seed: u64,
    /// Per-class sample weights
    pub class_weights: ClassWeights,
}

impl Default for GbtParams {
    fn default() -> Self {
        Self {
            n_estimators: 1000,
            learning_rate: 0.006232617777096432,
            max_depth: 9,
            subsample: 0.6803560166453312,
            colsample_bylevel: 0.9966486140633338,
            min_samples_leaf: 63,
            l2_leaf_reg: 3.0,
            max_bins: 254,
            seed: 42,
            class_weights: ClassWeights::default(),
        }
    }
}

impl GbtParams {
    pub fn with_n_estimators(mut self, n_estimators: usize) -> Self {
        self.n_estimators = n_estimators;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_subsample(mut self, subsample: f64) -> Self {
        self.subsample = subsample;
        self
    }

    pub fn with_colsample_bylevel(mut self, colsample_bylevel: f64) -> Self {
        self.colsample_bylevel = colsample_bylevel;
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples_leaf: usize) -> Self {
        self.min_samples_leaf = min_samples_leaf;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_class_weights(mut self, class_weights: ClassWeights) -> Self {
        self.class_weights = class_weights;
        self
    }

    fn validate(&self) -> crate::Result<()> {
        if self.n_estimators == 0 {
            return Err(ChurnError::Fit("n_estimators must be at least 1".to_string()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ChurnError::Fit("learning_rate must be positive".to_string()));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(ChurnError::Fit("subsample must be in (0, 1]".to_string()));
        }
        if !(self.colsample_bylevel > 0.0 && self.colsample_bylevel <= 1.0) {
            return Err(ChurnError::Fit("colsample_bylevel must be in (0, 1]".to_string()));
        }
        if self.max_bins < 2 || self.max_bins > usize::from(u16::MAX) {
            return Err(ChurnError::Fit(format!(
                "max_bins must be between 2 and {}",
                u16::MAX
            )));
        }
        if self.l2_leaf_reg < 0.0 {
            return Err(ChurnError::Fit("l2_leaf_reg must be non-negative".to_string()));
        }
        Ok(())
    }
}

/// A node of a regression tree over raw feature values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    /// Rows with `x[feature] <= threshold` go left
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        value: f64,
    },
}

impl TreeNode {
    /// Leaf value reached by `row`
    pub fn predict(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left.as_ref() } else { right.as_ref() };
                }
            }
        }
    }

    /// Leaves have depth 0
    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

/// Fitted boosted ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    params: GbtParams,
    /// Weighted log-odds of the training labels
    base_score: f64,
    n_features: usize,
    trees: Vec<TreeNode>,
}

impl GradientBoostedTrees {
    pub fn params(&self) -> &GbtParams {
        &self.params
    }

    pub fn class_weights(&self) -> ClassWeights {
        self.params.class_weights
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[TreeNode] {
        &self.trees
    }

    /// Raw log-odds score of one row
    pub fn decision_function(&self, row: ArrayView1<f64>) -> f64 {
        let boosted: f64 = self.trees.iter().map(|tree| tree.predict(row)).sum();
        self.base_score + self.params.learning_rate * boosted
    }

    /// Positive-class probability of one row
    pub fn probability(&self, row: ArrayView1<f64>) -> f64 {
        sigmoid(self.decision_function(row))
    }
}

impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<f64>> for GradientBoostedTrees {
    fn predict_inplace<'a>(&'a self, x: &'a ArrayBase<D, Ix2>, y: &mut Array1<f64>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );
        for (row, target) in x.outer_iter().zip(y.iter_mut()) {
            *target = self.probability(row);
        }
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<f64> {
        Array1::zeros(x.nrows())
    }
}

impl Fit<Array2<f64>, Array1<usize>, ChurnError> for GbtParams {
    type Object = GradientBoostedTrees;

    /// Fit the ensemble on transformed features and 0/1 targets
    fn fit(
        &self,
        dataset: &DatasetBase<Array2<f64>, Array1<usize>>,
    ) -> Result<Self::Object, ChurnError> {
        self.validate()?;

        let x = &dataset.records;
        let y = &dataset.targets;
        let (n_samples, n_features) = x.dim();

        if n_samples == 0 || n_features == 0 {
            return Err(ChurnError::Fit("cannot fit on an empty feature matrix".to_string()));
        }
        if y.len() != n_samples {
            return Err(ChurnError::Fit(format!(
                "{} feature rows but {} targets",
                n_samples,
                y.len()
            )));
        }
        if y.iter().any(|&label| label > 1) {
            return Err(ChurnError::Fit("targets must be 0 or 1".to_string()));
        }

        let weights: Vec<f64> = y.iter().map(|&label| self.class_weights.weight(label)).collect();
        let mass = |class: usize| -> f64 {
            y.iter()
                .zip(&weights)
                .filter(|(label, _)| **label == class)
                .map(|(_, weight)| *weight)
                .sum()
        };
        let (positive_mass, negative_mass) = (mass(1), mass(0));
        if positive_mass <= 0.0 || negative_mass <= 0.0 {
            return Err(ChurnError::Fit(
                "classifier needs both churn classes in the training split".to_string(),
            ));
        }
        let base_score = (positive_mass / negative_mass).ln();

        let binned = BinnedFeatures::new(x, self.max_bins);
        let mut rng = StdRng::seed_from_u64(self.seed);

        let rows_per_tree = ((n_samples as f64 * self.subsample).round() as usize).clamp(1, n_samples);
        let features_per_level =
            ((n_features as f64 * self.colsample_bylevel).round() as usize).clamp(1, n_features);

        let mut raw = vec![base_score; n_samples];
        let mut grad = vec![0.0; n_samples];
        let mut hess = vec![0.0; n_samples];
        let mut trees = Vec::with_capacity(self.n_estimators);

        for round in 0..self.n_estimators {
            for i in 0..n_samples {
                let p = sigmoid(raw[i]);
                let target = y[i] as f64;
                grad[i] = weights[i] * (p - target);
                hess[i] = weights[i] * (p * (1.0 - p)).max(1e-16);
            }

            let mut rows = if rows_per_tree < n_samples {
                rand::seq::index::sample(&mut rng, n_samples, rows_per_tree).into_vec()
            } else {
                (0..n_samples).collect()
            };
            rows.sort_unstable();

            let level_features: Vec<Vec<usize>> = (0..self.max_depth)
                .map(|_| {
                    let mut features = if features_per_level < n_features {
                        rand::seq::index::sample(&mut rng, n_features, features_per_level).into_vec()
                    } else {
                        (0..n_features).collect()
                    };
                    features.sort_unstable();
                    features
                })
                .collect();

            let builder = TreeBuilder {
                binned: &binned,
                grad: &grad,
                hess: &hess,
                level_features: &level_features,
                max_depth: self.max_depth,
                min_samples_leaf: self.min_samples_leaf.max(1),
                l2_leaf_reg: self.l2_leaf_reg,
            };
            let tree = builder.build(rows, 0);

            for (i, score) in raw.iter_mut().enumerate() {
                *score += self.learning_rate * tree.predict(x.row(i));
            }
            trees.push(tree);

            if (round + 1) % 100 == 0 {
                debug!(round = round + 1, "boosting progress");
            }
        }

        Ok(GradientBoostedTrees {
            params: self.clone(),
            base_score,
            n_features,
            trees,
        })
    }
}

/// Feature values mapped to histogram bins
struct BinnedFeatures {
    /// Ascending split borders per feature; bin `b` holds values `<= borders[b]`
    borders: Vec<Vec<f64>>,
    /// Bin index per feature, per row
    bins: Vec<Vec<u16>>,
}

impl BinnedFeatures {
    fn new(x: &Array2<f64>, max_bins: usize) -> Self {
        let mut borders = Vec::with_capacity(x.ncols());
        let mut bins = Vec::with_capacity(x.ncols());

        for column in x.columns() {
            let values: Vec<f64> = column.to_vec();
            let feature_borders = feature_borders(&values, max_bins);
            let feature_bins = values
                .iter()
                .map(|&v| feature_borders.partition_point(|&b| b < v) as u16)
                .collect();
            borders.push(feature_borders);
            bins.push(feature_bins);
        }

        Self { borders, bins }
    }
}

/// Split borders for one feature: midpoints between distinct values when
/// they fit in `max_bins`, quantiles otherwise
fn feature_borders(values: &[f64], max_bins: usize) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);

    let mut distinct = sorted.clone();
    distinct.dedup();

    if distinct.len() <= max_bins {
        return distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    }

    let n = sorted.len();
    let mut borders: Vec<f64> = (1..max_bins).map(|k| sorted[k * n / max_bins]).collect();
    borders.dedup();
    if let Some(&max) = sorted.last() {
        borders.retain(|&b| b < max);
    }
    borders
}

struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

struct TreeBuilder<'a> {
    binned: &'a BinnedFeatures,
    grad: &'a [f64],
    hess: &'a [f64],
    level_features: &'a [Vec<usize>],
    max_depth: usize,
    min_samples_leaf: usize,
    l2_leaf_reg: f64,
}

impl TreeBuilder<'_> {
    fn build(&self, rows: Vec<usize>, depth: usize) -> TreeNode {
        let g_total: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h_total: f64 = rows.iter().map(|&r| self.hess[r]).sum();
        let leaf = TreeNode::Leaf {
            value: -g_total / (h_total + self.l2_leaf_reg),
        };

        if depth >= self.max_depth || rows.len() < 2 * self.min_samples_leaf {
            return leaf;
        }

        let Some(split) = self.best_split(&rows, depth, g_total, h_total) else {
            return leaf;
        };

        let feature_bins = &self.binned.bins[split.feature];
        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| usize::from(feature_bins[r]) <= split.bin);

        TreeNode::Split {
            feature: split.feature,
            threshold: self.binned.borders[split.feature][split.bin],
            left: Box::new(self.build(left, depth + 1)),
            right: Box::new(self.build(right, depth + 1)),
        }
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.l2_leaf_reg)
    }

    fn best_split(
        &self,
        rows: &[usize],
        depth: usize,
        g_total: f64,
        h_total: f64,
    ) -> Option<SplitCandidate> {
        let parent_score = self.score(g_total, h_total);
        let mut best: Option<SplitCandidate> = None;

        for &feature in &self.level_features[depth] {
            let borders = &self.binned.borders[feature];
            if borders.is_empty() {
                continue;
            }

            // (gradient, hessian, count) per bin
            let mut histogram = vec![(0.0, 0.0, 0usize); borders.len() + 1];
            let feature_bins = &self.binned.bins[feature];
            for &r in rows {
                let slot = &mut histogram[usize::from(feature_bins[r])];
                slot.0 += self.grad[r];
                slot.1 += self.hess[r];
                slot.2 += 1;
            }

            let (mut g_left, mut h_left, mut n_left) = (0.0, 0.0, 0usize);
            for (bin, &(g, h, count)) in histogram.iter().take(borders.len()).enumerate() {
                g_left += g;
                h_left += h;
                n_left += count;

                let n_right = rows.len() - n_left;
                if n_left < self.min_samples_leaf {
                    continue;
                }
                if n_right < self.min_samples_leaf {
                    break;
                }

                let gain = self.score(g_left, h_left)
                    + self.score(g_total - g_left, h_total - h_left)
                    - parent_score;
                if gain > best.as_ref().map_or(0.0, |b| b.gain) {
                    best = Some(SplitCandidate { feature, bin, gain });
                }
            }
        }

        best
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linfa::traits::Predict;

    fn separable_dataset() -> DatasetBase<Array2<f64>, Array1<usize>> {
        let n = 40;
        let records = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 {
                i as f64 / n as f64
            } else {
                (i % 7) as f64
            }
        });
        let targets = Array1::from_shape_fn(n, |i| usize::from(i >= n / 2));
        DatasetBase::new(records, targets)
    }

    fn small_params() -> GbtParams {
        GbtParams::default()
            .with_n_estimators(50)
            .with_learning_rate(0.3)
            .with_max_depth(3)
            .with_min_samples_leaf(2)
            .with_subsample(1.0)
            .with_colsample_bylevel(1.0)
    }

    #[test]
    fn test_balanced_weights_for_80_20_split() {
        let mut labels = vec![0u8; 80];
        labels.extend(vec![1u8; 20]);

        let weights = ClassWeights::balanced(&labels).unwrap();
        assert!((weights.negative - 0.625).abs() < 1e-12);
        assert!((weights.positive - 2.5).abs() < 1e-12);
        assert!((weights.positive / weights.negative - 4.0).abs() < 1e-9);
        assert!(weights.negative < 1.0 && weights.positive > 1.0);
    }

    #[test]
    fn test_balanced_weights_single_class_is_fit_error() {
        let err = ClassWeights::balanced(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, ChurnError::Fit(_)));
    }

    #[test]
    fn test_fit_separates_classes() {
        let dataset = separable_dataset();
        let model = small_params().fit(&dataset).unwrap();

        let probabilities = model.predict(&dataset.records);
        assert_eq!(probabilities.len(), 40);
        assert!(probabilities.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert!(probabilities[0] < 0.5);
        assert!(probabilities[39] > 0.5);
        assert_eq!(model.trees().len(), 50);
    }

    #[test]
    fn test_trees_respect_max_depth() {
        let dataset = separable_dataset();
        let model = small_params().with_max_depth(2).fit(&dataset).unwrap();
        assert!(model.trees().iter().all(|tree| tree.depth() <= 2));
    }

    #[test]
    fn test_min_samples_leaf_blocks_splits() {
        let dataset = separable_dataset();
        let model = small_params().with_min_samples_leaf(25).fit(&dataset).unwrap();
        // 40 rows cannot be split into two leaves of 25
        assert!(model.trees().iter().all(|tree| tree.depth() == 0));
    }

    #[test]
    fn test_fit_is_deterministic_for_a_seed() {
        let dataset = separable_dataset();
        let params = small_params().with_subsample(0.7).with_colsample_bylevel(0.5);
        let first = params.fit(&dataset).unwrap();
        let second = params.fit(&dataset).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_single_class_targets_is_fit_error() {
        let records = Array2::zeros((5, 2));
        let dataset = DatasetBase::new(records, Array1::zeros(5));
        let err = small_params().fit(&dataset).unwrap_err();
        assert!(matches!(err, ChurnError::Fit(_)));
    }

    #[test]
    fn test_class_weights_shift_base_score() {
        let dataset = separable_dataset();
        let mut targets = dataset.targets.clone();
        for t in targets.iter_mut().skip(20).take(10) {
            *t = 0; // 30 negatives, 10 positives
        }
        let skewed = DatasetBase::new(dataset.records.clone(), targets.clone());

        let labels: Vec<u8> = targets.iter().map(|&t| t as u8).collect();
        let weights = ClassWeights::balanced(&labels).unwrap();

        let plain = small_params().fit(&skewed).unwrap();
        let weighted = small_params().with_class_weights(weights).fit(&skewed).unwrap();
        assert!(plain.base_score() < 0.0);
        assert!(weighted.base_score().abs() < 1e-12);
    }

    #[test]
    fn test_feature_borders() {
        assert_eq!(feature_borders(&[1.0, 3.0, 3.0, 5.0], 10), vec![2.0, 4.0]);
        assert!(feature_borders(&[7.0, 7.0], 10).is_empty());

        let values: Vec<f64> = (0..1000).map(f64::from).collect();
        let borders = feature_borders(&values, 16);
        assert!(borders.len() < 16);
        assert!(borders.windows(2).all(|w| w[0] < w[1]));
    }
}
