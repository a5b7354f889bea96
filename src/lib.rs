//! ChurnForge: churn analytics and prediction for telecom customer records
//!
//! The library loads the customer table, fits a target-encoding
//! preprocessor and a class-weighted gradient-boosted tree classifier,
//! persists both as a single inference pipeline, and scores new customers
//! at a fixed 0.40 decision threshold.

pub mod cli;
pub mod data;
pub mod error;
pub mod evaluate;
pub mod form;
pub mod model;
pub mod pipeline;
pub mod predict;
pub mod preprocess;
pub mod schema;
pub mod train;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{load_report_records, load_training_records, ChurnLabel, ReportRecord, TrainingRecord};
pub use error::ChurnError;
pub use evaluate::{cross_validate, evaluate, evaluate_at, CrossValidationReport, HoldoutMetrics};
pub use form::FormInput;
pub use model::{ClassWeights, GbtParams, GradientBoostedTrees};
pub use pipeline::InferencePipeline;
pub use predict::{predict, predict_file, predict_one, Prediction, DECISION_THRESHOLD};
pub use preprocess::{FittedPreprocessor, PreprocessorBuilder};
pub use schema::FeatureRow;
pub use train::{run_training, stratified_split, train, TrainingConfig, TrainingOutcome};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, ChurnError>;
