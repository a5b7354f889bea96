//! Error taxonomy for loading, fitting, evaluating and scoring

use thiserror::Error;

/// Errors raised by the churn pipeline
#[derive(Error, Debug)]
pub enum ChurnError {
    /// Input table is missing expected columns or carries values outside the schema
    #[error("schema error: {0}")]
    Schema(String),

    /// A numeric cell could not be parsed
    #[error("parse error in column '{column}' at row {row}: invalid value '{value}'")]
    Parse {
        column: String,
        row: usize,
        value: String,
    },

    /// Training data is degenerate (empty split, single class, all-missing column)
    #[error("fit error: {0}")]
    Fit(String),

    /// Prediction input does not match the schema the pipeline was fit on
    #[error("inference schema error: {0}")]
    InferenceSchema(String),

    /// A metric is undefined for the given labels
    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("plot error: {0}")]
    Plot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Serialization(#[from] bincode::Error),

    #[error(transparent)]
    Linfa(#[from] linfa::Error),
}

impl ChurnError {
    pub(crate) fn plot<E: std::fmt::Display>(err: E) -> Self {
        ChurnError::Plot(err.to_string())
    }
}
