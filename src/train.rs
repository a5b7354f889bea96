//! Training orchestration: stratified split, class weighting and pipeline fitting

use crate::data::{load_training_records, write_training_records, TrainingRecord};
use crate::error::ChurnError;
use crate::model::{ClassWeights, GbtParams};
use crate::pipeline::InferencePipeline;
use crate::preprocess::PreprocessorBuilder;
use crate::schema::FeatureRow;
use linfa::traits::Fit;
use linfa::DatasetBase;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_ARTIFACT_PATH: &str = "models/classifier.bin";
pub const DEFAULT_SPLITS_DIR: &str = "data/processed";
pub const TRAIN_SPLIT_FILE: &str = "train.csv";
pub const TEST_SPLIT_FILE: &str = "test.csv";

/// Everything that controls a training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    /// Fraction of rows held out for evaluation
    pub test_size: f64,
    /// Seed for the stratified split
    pub seed: u64,
    /// Classifier hyperparameters; class weights are overwritten at fit time
    pub params: GbtParams,
    pub preprocessor: PreprocessorBuilder,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            seed: 42,
            params: GbtParams::default(),
            preprocessor: PreprocessorBuilder::default(),
        }
    }
}

impl TrainingConfig {
    pub fn with_test_size(mut self, test_size: f64) -> Self {
        self.test_size = test_size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_params(mut self, params: GbtParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: PreprocessorBuilder) -> Self {
        self.preprocessor = preprocessor;
        self
    }
}

/// Result of a training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub pipeline: InferencePipeline,
    /// Training split, in source order
    pub train: Vec<TrainingRecord>,
    /// Holdout split, in source order
    pub holdout: Vec<TrainingRecord>,
    /// Weights computed from the training split
    pub class_weights: ClassWeights,
}

/// Partition row indices into (train, holdout), preserving class proportions
///
/// Each class contributes `round(n_class * test_size)` rows to the holdout,
/// chosen by a seeded shuffle. Both index lists are returned sorted.
pub fn stratified_split(
    labels: &[u8],
    test_size: f64,
    seed: u64,
) -> crate::Result<(Vec<usize>, Vec<usize>)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(ChurnError::Fit(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }
    if labels.is_empty() {
        return Err(ChurnError::Fit("cannot split an empty dataset".to_string()));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut holdout = Vec::new();

    for class in [0u8, 1u8] {
        let mut members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|&(_, &y)| y == class)
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            continue;
        }
        members.shuffle(&mut rng);

        let mut n_test = (members.len() as f64 * test_size).round() as usize;
        if members.len() > 1 {
            n_test = n_test.min(members.len() - 1);
        }
        holdout.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    if train.is_empty() || holdout.is_empty() {
        return Err(ChurnError::Fit(format!(
            "split of {} rows produced an empty partition",
            labels.len()
        )));
    }

    train.sort_unstable();
    holdout.sort_unstable();
    Ok((train, holdout))
}

/// Fit preprocessor and classifier on `records` and compose them
///
/// Class weights are computed from `records` and passed to the classifier.
pub fn fit_pipeline(
    config: &TrainingConfig,
    records: &[TrainingRecord],
) -> crate::Result<(InferencePipeline, ClassWeights)> {
    if records.is_empty() {
        return Err(ChurnError::Fit("training split is empty".to_string()));
    }

    let rows: Vec<FeatureRow> = records.iter().map(|r| r.features.clone()).collect();
    let labels: Vec<u8> = records.iter().map(|r| r.churn).collect();

    let class_weights = ClassWeights::balanced(&labels)?;
    debug!(
        negative = class_weights.negative,
        positive = class_weights.positive,
        "balanced class weights"
    );

    let preprocessor = config.preprocessor.fit(&rows, &labels)?;
    let features: Array2<f64> = preprocessor.transform(&rows);
    let targets: Array1<usize> = labels.iter().map(|&y| usize::from(y)).collect();

    let classifier = config
        .params
        .clone()
        .with_class_weights(class_weights)
        .fit(&DatasetBase::new(features, targets))?;

    Ok((
        InferencePipeline::new(preprocessor, classifier, records.len()),
        class_weights,
    ))
}

/// Split, weight and fit; no side effects
pub fn train(records: &[TrainingRecord], config: &TrainingConfig) -> crate::Result<TrainingOutcome> {
    let labels: Vec<u8> = records.iter().map(|r| r.churn).collect();
    let (train_idx, holdout_idx) = stratified_split(&labels, config.test_size, config.seed)?;

    let train: Vec<TrainingRecord> = train_idx.iter().map(|&i| records[i].clone()).collect();
    let holdout: Vec<TrainingRecord> = holdout_idx.iter().map(|&i| records[i].clone()).collect();
    info!(
        train_rows = train.len(),
        holdout_rows = holdout.len(),
        "stratified split"
    );

    let (pipeline, class_weights) = fit_pipeline(config, &train)?;
    info!(
        trees = pipeline.classifier().trees().len(),
        prior = pipeline.preprocessor().prior(),
        "pipeline fitted"
    );

    Ok(TrainingOutcome {
        pipeline,
        train,
        holdout,
        class_weights,
    })
}

/// Load the source table, train, and persist the splits and the artifact
///
/// # Arguments
/// * `input` - Source customer CSV
/// * `artifact` - Destination of the serialized pipeline; overwritten
/// * `splits_dir` - Directory receiving `train.csv` and `test.csv`
/// * `config` - Training configuration
pub fn run_training<P, Q, R>(
    input: P,
    artifact: Q,
    splits_dir: R,
    config: &TrainingConfig,
) -> crate::Result<TrainingOutcome>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: AsRef<Path>,
{
    let records = load_training_records(input.as_ref())?;
    info!(rows = records.len(), path = %input.as_ref().display(), "loaded training data");

    let outcome = train(&records, config)?;

    let splits_dir = splits_dir.as_ref();
    write_training_records(splits_dir.join(TRAIN_SPLIT_FILE), &outcome.train)?;
    write_training_records(splits_dir.join(TEST_SPLIT_FILE), &outcome.holdout)?;
    outcome.pipeline.save(artifact)?;

    Ok(outcome)
}

/// Synthetic records with a learnable churn signal, one churner in five
#[cfg(test)]
pub(crate) fn synthetic_records(n: usize) -> Vec<TrainingRecord> {
    use crate::schema::test_row;

    (0..n)
        .map(|i| {
            let churn = u8::from(i % 5 == 0);
            let (contract, payment, tenure, monthly) = if churn == 1 {
                ("Month-to-month", "Electronic check", (i % 9) as f64, 85.0 + (i % 13) as f64)
            } else if i % 4 == 0 {
                ("Month-to-month", "Mailed check", 20.0 + (i % 30) as f64, 40.0 + (i % 11) as f64)
            } else {
                ("Two year", "Bank transfer (automatic)", 30.0 + (i % 40) as f64, 55.0 + (i % 17) as f64)
            };
            let total = if tenure == 0.0 { None } else { Some(tenure * monthly) };

            TrainingRecord {
                customer_id: format!("{i:04}-SYNT"),
                features: test_row(contract, payment, tenure, monthly, total),
                churn,
            }
        })
        .collect()
}

/// Small, fast classifier settings for tests
#[cfg(test)]
pub(crate) fn fast_config() -> TrainingConfig {
    TrainingConfig::default().with_params(
        GbtParams::default()
            .with_n_estimators(30)
            .with_learning_rate(0.2)
            .with_max_depth(3)
            .with_min_samples_leaf(5),
    )
}
