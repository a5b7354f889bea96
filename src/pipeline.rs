//! Inference pipeline: the single persisted artifact
//!
//! Encoding maps and tree weights are co-dependent, so the fitted
//! preprocessor and the fitted classifier are only ever written and read
//! together through [`InferencePipeline::save`] and [`InferencePipeline::load`].

use crate::error::ChurnError;
use crate::model::GradientBoostedTrees;
use crate::preprocess::FittedPreprocessor;
use crate::schema::{self, FeatureRow};
use chrono::{DateTime, Utc};
use linfa::traits::Predict;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Bumped whenever the serialized layout changes
pub const FORMAT_VERSION: u32 = 2;

/// Provenance stored next to the fitted state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub format_version: u32,
    /// Feature columns the pipeline was fit on, in matrix order
    pub feature_names: Vec<String>,
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
}

/// Fitted preprocessor and classifier, applied as `transform` then `classify`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferencePipeline {
    metadata: PipelineMetadata,
    preprocessor: FittedPreprocessor,
    classifier: GradientBoostedTrees,
}

impl InferencePipeline {
    pub fn new(
        preprocessor: FittedPreprocessor,
        classifier: GradientBoostedTrees,
        training_rows: usize,
    ) -> Self {
        let metadata = PipelineMetadata {
            format_version: FORMAT_VERSION,
            feature_names: preprocessor
                .feature_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            trained_at: Utc::now(),
            training_rows,
        };

        Self {
            metadata,
            preprocessor,
            classifier,
        }
    }

    pub fn metadata(&self) -> &PipelineMetadata {
        &self.metadata
    }

    pub fn preprocessor(&self) -> &FittedPreprocessor {
        &self.preprocessor
    }

    pub fn classifier(&self) -> &GradientBoostedTrees {
        &self.classifier
    }

    /// Stage one: impute and encode
    pub fn transform(&self, rows: &[FeatureRow]) -> Array2<f64> {
        self.preprocessor.transform(rows)
    }

    /// Stage two: positive-class probabilities for an already transformed matrix
    pub fn classify(&self, features: &Array2<f64>) -> Array1<f64> {
        self.classifier.predict(features)
    }

    /// Both stages in sequence
    pub fn predict_proba(&self, rows: &[FeatureRow]) -> Array1<f64> {
        let features = self.transform(rows);
        self.classify(&features)
    }

    /// Verify the pipeline was fit on the feature schema compiled into this binary
    pub fn check_schema(&self) -> crate::Result<()> {
        let expected = schema::feature_names();
        let fitted: Vec<&str> = self.metadata.feature_names.iter().map(String::as_str).collect();

        if fitted != expected {
            return Err(ChurnError::InferenceSchema(format!(
                "pipeline was fit on columns [{}], expected [{}]",
                fitted.join(", "),
                expected.join(", ")
            )));
        }
        if self.classifier.n_features() != expected.len() {
            return Err(ChurnError::InferenceSchema(format!(
                "classifier expects {} features, schema has {}",
                self.classifier.n_features(),
                expected.len()
            )));
        }
        Ok(())
    }

    /// Serialize the whole pipeline with bincode, replacing any previous file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let path = path.as_ref();
        let bytes = bincode::serialize(self)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;

        info!(path = %path.display(), trees = self.classifier.trees().len(), "saved inference pipeline");
        Ok(())
    }

    /// Load a pipeline written by [`InferencePipeline::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        let pipeline: Self = bincode::deserialize(&bytes)?;

        if pipeline.metadata.format_version != FORMAT_VERSION {
            return Err(ChurnError::InferenceSchema(format!(
                "artifact format version {} is not supported (expected {})",
                pipeline.metadata.format_version, FORMAT_VERSION
            )));
        }
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GbtParams;
    use crate::preprocess::PreprocessorBuilder;
    use crate::schema::test_row;
    use linfa::traits::Fit;
    use linfa::DatasetBase;

    fn fitted_pipeline() -> (InferencePipeline, Vec<FeatureRow>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let churner = i % 3 == 0;
            let contract = if churner { "Month-to-month" } else { "Two year" };
            rows.push(test_row(contract, "Electronic check", i as f64, 50.0 + i as f64, Some(100.0 * i as f64)));
            labels.push(u8::from(churner));
        }

        let preprocessor = PreprocessorBuilder::new().fit(&rows, &labels).unwrap();
        let features = preprocessor.transform(&rows);
        let targets = Array1::from_iter(labels.iter().map(|&y| usize::from(y)));
        let classifier = GbtParams::default()
            .with_n_estimators(20)
            .with_learning_rate(0.2)
            .with_max_depth(3)
            .with_min_samples_leaf(3)
            .fit(&DatasetBase::new(features, targets))
            .unwrap();

        (InferencePipeline::new(preprocessor, classifier, rows.len()), rows)
    }

    #[test]
    fn test_round_trip_is_bit_identical() {
        let (pipeline, rows) = fitted_pipeline();
        let before = pipeline.predict_proba(&rows);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("classifier.bin");
        pipeline.save(&path).unwrap();
        let reloaded = InferencePipeline::load(&path).unwrap();
        let after = reloaded.predict_proba(&rows);

        assert_eq!(pipeline, reloaded);
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_transform_then_classify_matches_predict_proba() {
        let (pipeline, rows) = fitted_pipeline();
        let staged = pipeline.classify(&pipeline.transform(&rows));
        assert_eq!(staged, pipeline.predict_proba(&rows));
        assert!(pipeline.check_schema().is_ok());
    }

    #[test]
    fn test_schema_mismatch_is_inference_schema_error() {
        let (mut pipeline, _) = fitted_pipeline();
        pipeline.metadata.feature_names.pop();
        let err = pipeline.check_schema().unwrap_err();
        assert!(matches!(err, ChurnError::InferenceSchema(_)));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(InferencePipeline::load(dir.path().join("absent.bin")).is_err());
    }
}
