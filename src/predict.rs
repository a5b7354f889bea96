//! Scoring with a persisted pipeline at the fixed operating point

use crate::data::read_feature_table;
use crate::error::ChurnError;
use crate::pipeline::InferencePipeline;
use crate::schema::{FeatureRow, LABEL_COLUMN};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;
use tracing::info;

/// Churn is predicted when the probability exceeds this value
pub const DECISION_THRESHOLD: f64 = 0.40;

pub const PREDICTED_COLUMN: &str = "predicted";
pub const PROBABILITY_COLUMN: &str = "pred_probability";

/// Score of a single customer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// 1 when `probability > DECISION_THRESHOLD`
    pub label: u8,
    /// Positive-class probability in [0, 1]
    pub probability: f64,
}

impl Prediction {
    pub fn from_probability(probability: f64) -> Self {
        Self {
            label: u8::from(probability > DECISION_THRESHOLD),
            probability,
        }
    }

    pub fn is_churn(&self) -> bool {
        self.label == 1
    }
}

/// Score a batch of rows
///
/// # Returns
/// * Labels and probabilities in input order, or `InferenceSchemaError` if
///   the pipeline was fit on a different feature schema
pub fn predict(pipeline: &InferencePipeline, rows: &[FeatureRow]) -> crate::Result<(Vec<u8>, Vec<f64>)> {
    pipeline.check_schema()?;

    let probabilities = pipeline.predict_proba(rows).to_vec();
    let labels = probabilities
        .iter()
        .map(|&p| Prediction::from_probability(p).label)
        .collect();

    Ok((labels, probabilities))
}

/// Score one customer, as the interactive form does
pub fn predict_one(pipeline: &InferencePipeline, row: &FeatureRow) -> crate::Result<Prediction> {
    let (_, probabilities) = predict(pipeline, std::slice::from_ref(row))?;
    let probability = probabilities
        .first()
        .copied()
        .ok_or_else(|| ChurnError::InferenceSchema("pipeline returned no score".to_string()))?;
    Ok(Prediction::from_probability(probability))
}

/// Score every row of `input` and write `Churn, predicted, pred_probability` to `output`
///
/// The `Churn` column is written only when the input carries one; rows
/// without a recognizable label get an empty cell.
pub fn predict_file<P: AsRef<Path>, Q: AsRef<Path>>(
    pipeline: &InferencePipeline,
    input: P,
    output: Q,
) -> crate::Result<Vec<Prediction>> {
    let (input, output) = (input.as_ref(), output.as_ref());
    let table = read_feature_table(input)?;
    let (labels, probabilities) = predict(pipeline, &table.rows)?;

    let mut columns = Vec::with_capacity(3);
    if let Some(observed) = &table.labels {
        let observed: Vec<Option<i32>> = observed.iter().map(|y| y.map(i32::from)).collect();
        columns.push(Series::new(LABEL_COLUMN, observed));
    }
    let predicted: Vec<i32> = labels.iter().map(|&y| i32::from(y)).collect();
    columns.push(Series::new(PREDICTED_COLUMN, predicted));
    columns.push(Series::new(PROBABILITY_COLUMN, probabilities.clone()));
    let mut df = DataFrame::new(columns)?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(output)?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;

    let churners = labels.iter().filter(|&&y| y == 1).count();
    info!(
        rows = labels.len(),
        churners,
        output = %output.display(),
        "batch prediction written"
    );

    Ok(probabilities
        .into_iter()
        .map(Prediction::from_probability)
        .collect())
}
