//! Feature preprocessing: categorical imputation and target encoding, numeric median imputation
//!
//! [`PreprocessorBuilder`] is plain configuration. Calling
//! [`PreprocessorBuilder::fit`] on the training split produces a
//! [`FittedPreprocessor`], which is immutable and only ever read at
//! inference time. Label statistics come exclusively from the rows passed
//! to `fit`.

use crate::error::ChurnError;
use crate::schema::{FeatureRow, CATEGORICAL_COLUMNS, NUMERIC_COLUMNS, N_CATEGORICAL, N_FEATURES};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Unfitted preprocessing configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorBuilder {
    /// Category count at which the category mean and the prior are weighted equally
    min_samples_leaf: usize,
    /// Steepness of the blend between prior and category mean
    smoothing: f64,
}

impl Default for PreprocessorBuilder {
    fn default() -> Self {
        Self {
            min_samples_leaf: 20,
            smoothing: 10.0,
        }
    }
}

impl PreprocessorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_samples_leaf(mut self, min_samples_leaf: usize) -> Self {
        self.min_samples_leaf = min_samples_leaf;
        self
    }

    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// Learn fill values and encoding maps from the training split
    ///
    /// # Arguments
    /// * `rows` - Training-split feature rows
    /// * `labels` - Matching 0/1 churn labels
    ///
    /// # Returns
    /// * A [`FittedPreprocessor`], or `FitError` if the rows are empty, hold a
    ///   single class, or a numeric column has no observed value
    pub fn fit(&self, rows: &[FeatureRow], labels: &[u8]) -> crate::Result<FittedPreprocessor> {
        if rows.len() != labels.len() {
            return Err(ChurnError::Fit(format!(
                "{} feature rows but {} labels",
                rows.len(),
                labels.len()
            )));
        }
        if rows.is_empty() {
            return Err(ChurnError::Fit("cannot fit preprocessor on an empty split".to_string()));
        }

        let positives = labels.iter().filter(|&&y| y == 1).count();
        if positives == 0 || positives == labels.len() {
            return Err(ChurnError::Fit(
                "target encoding needs both churn classes in the training split".to_string(),
            ));
        }
        let prior = positives as f64 / labels.len() as f64;

        let categorical = (0..N_CATEGORICAL)
            .map(|idx| self.fit_categorical(idx, rows, labels, prior))
            .collect::<crate::Result<Vec<_>>>()?;

        let numeric = NUMERIC_COLUMNS
            .iter()
            .enumerate()
            .map(|(idx, name)| fit_numeric(idx, name, rows))
            .collect::<crate::Result<Vec<_>>>()?;

        debug!(prior, rows = rows.len(), "fitted preprocessor");

        Ok(FittedPreprocessor {
            settings: *self,
            prior,
            categorical,
            numeric,
        })
    }

    fn fit_categorical(
        &self,
        idx: usize,
        rows: &[FeatureRow],
        labels: &[u8],
        prior: f64,
    ) -> crate::Result<CategoricalEncoding> {
        let column = CATEGORICAL_COLUMNS[idx].name;

        let mut observed: BTreeMap<&str, usize> = BTreeMap::new();
        for row in rows {
            if let Some(value) = row.categorical[idx] {
                *observed.entry(value).or_default() += 1;
            }
        }

        // BTreeMap iterates in lexical order, so ties go to the smallest value
        let mut fill_value: Option<(&str, usize)> = None;
        for (&value, &count) in &observed {
            if fill_value.map_or(true, |(_, best)| count > best) {
                fill_value = Some((value, count));
            }
        }
        let (fill_value, _) = fill_value.ok_or_else(|| {
            ChurnError::Fit(format!("column '{column}' has no observed values to impute from"))
        })?;

        // (count, positives) per category after imputation
        let mut stats: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for (row, &label) in rows.iter().zip(labels) {
            let value = row.categorical[idx].unwrap_or(fill_value);
            let entry = stats.entry(value).or_default();
            entry.0 += 1;
            entry.1 += usize::from(label);
        }

        let mapping = stats
            .into_iter()
            .map(|(value, (count, positives))| {
                let mean = positives as f64 / count as f64;
                (value.to_string(), self.smoothed(mean, count, prior))
            })
            .collect();

        Ok(CategoricalEncoding {
            column: column.to_string(),
            fill_value: fill_value.to_string(),
            mapping,
        })
    }

    /// Blend the category mean toward the prior as the category count shrinks
    fn smoothed(&self, mean: f64, count: usize, prior: f64) -> f64 {
        let weight =
            1.0 / (1.0 + (-(count as f64 - self.min_samples_leaf as f64) / self.smoothing).exp());
        prior * (1.0 - weight) + mean * weight
    }
}

fn fit_numeric(idx: usize, column: &str, rows: &[FeatureRow]) -> crate::Result<NumericImputation> {
    let mut values: Vec<f64> = rows.iter().filter_map(|row| row.numeric[idx]).collect();
    let median = median(&mut values).ok_or_else(|| {
        ChurnError::Fit(format!("column '{column}' has no observed values to impute from"))
    })?;

    Ok(NumericImputation {
        column: column.to_string(),
        median,
    })
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Learned state for one categorical column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoding {
    pub column: String,
    /// Most frequent training value, used for missing cells
    pub fill_value: String,
    /// Smoothed churn rate per training value
    pub mapping: BTreeMap<String, f64>,
}

impl CategoricalEncoding {
    /// Encode one cell; values never seen in training fall back to `prior`
    pub fn encode(&self, value: Option<&str>, prior: f64) -> f64 {
        let value = value.unwrap_or(&self.fill_value);
        self.mapping.get(value).copied().unwrap_or(prior)
    }
}

/// Learned fill value for one numeric column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericImputation {
    pub column: String,
    pub median: f64,
}

/// Fitted, read-only preprocessing transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPreprocessor {
    /// Configuration the encoder was fit with, reused when refitting
    settings: PreprocessorBuilder,
    /// Training-split churn rate
    prior: f64,
    categorical: Vec<CategoricalEncoding>,
    numeric: Vec<NumericImputation>,
}

impl FittedPreprocessor {
    pub fn settings(&self) -> PreprocessorBuilder {
        self.settings
    }

    pub fn prior(&self) -> f64 {
        self.prior
    }

    pub fn categorical(&self) -> &[CategoricalEncoding] {
        &self.categorical
    }

    pub fn numeric(&self) -> &[NumericImputation] {
        &self.numeric
    }

    /// Encoding state of a categorical column by name
    pub fn encoding(&self, column: &str) -> Option<&CategoricalEncoding> {
        self.categorical.iter().find(|e| e.column == column)
    }

    /// Output column names, categorical block first
    pub fn feature_names(&self) -> Vec<&str> {
        self.categorical
            .iter()
            .map(|e| e.column.as_str())
            .chain(self.numeric.iter().map(|n| n.column.as_str()))
            .collect()
    }

    /// Transform rows into the dense feature matrix (n_rows, 19)
    pub fn transform(&self, rows: &[FeatureRow]) -> Array2<f64> {
        let mut matrix = Array2::zeros((rows.len(), N_FEATURES));

        for (i, row) in rows.iter().enumerate() {
            for (j, encoding) in self.categorical.iter().enumerate() {
                matrix[[i, j]] = encoding.encode(row.categorical[j], self.prior);
            }
            for (k, imputation) in self.numeric.iter().enumerate() {
                matrix[[i, N_CATEGORICAL + k]] = row.numeric[k].unwrap_or(imputation.median);
            }
        }

        matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{test_row, TOTAL_CHARGES};
    use std::collections::BTreeSet;

    fn training_rows() -> (Vec<FeatureRow>, Vec<u8>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..30 {
            rows.push(test_row("Month-to-month", "Electronic check", 2.0, 70.0 + i as f64, Some(140.0)));
            labels.push(u8::from(i % 2 == 0));
        }
        for i in 0..10 {
            rows.push(test_row("Two year", "Credit card (automatic)", 60.0, 90.0, Some(5000.0 + i as f64)));
            labels.push(0);
        }
        rows.push(test_row("One year", "Bank transfer (automatic)", 0.0, 70.0, None));
        labels.push(1);
        (rows, labels)
    }

    #[test]
    fn test_encoding_keys_are_training_values() {
        let (rows, labels) = training_rows();
        let fitted = PreprocessorBuilder::new().fit(&rows, &labels).unwrap();

        let keys: BTreeSet<&str> = fitted
            .encoding("Contract")
            .unwrap()
            .mapping
            .keys()
            .map(String::as_str)
            .collect();
        let expected: BTreeSet<&str> = ["Month-to-month", "Two year", "One year"].into_iter().collect();
        assert_eq!(keys, expected);

        let payment_keys = fitted.encoding("PaymentMethod").unwrap().mapping.len();
        assert_eq!(payment_keys, 3); // "Mailed check" never appears
    }

    #[test]
    fn test_unseen_category_encodes_to_prior() {
        let (rows, labels) = training_rows();
        let fitted = PreprocessorBuilder::new().fit(&rows, &labels).unwrap();

        let unseen = test_row("Month-to-month", "Mailed check", 5.0, 50.0, Some(250.0));
        let matrix = fitted.transform(&[unseen.clone(), unseen]);

        let payment_col = crate::schema::categorical_index("PaymentMethod").unwrap();
        assert_eq!(matrix[[0, payment_col]], fitted.prior());
        assert_eq!(matrix[[0, payment_col]], matrix[[1, payment_col]]);
    }

    #[test]
    fn test_missing_total_charges_imputed_with_training_median() {
        let (rows, labels) = training_rows();
        let fitted = PreprocessorBuilder::new().fit(&rows, &labels).unwrap();

        let mut observed: Vec<f64> = rows.iter().filter_map(|r| r.numeric[TOTAL_CHARGES]).collect();
        let expected = median(&mut observed).unwrap();
        assert_eq!(expected, 140.0);

        let new_customer = test_row("Month-to-month", "Electronic check", 0.0, 70.0, None);
        let matrix = fitted.transform(&[new_customer]);
        assert_eq!(matrix[[0, N_CATEGORICAL + TOTAL_CHARGES]], expected);
        assert_eq!(matrix.nrows(), 1);
    }

    #[test]
    fn test_missing_category_imputed_with_most_frequent() {
        let (mut rows, labels) = training_rows();
        let contract = crate::schema::categorical_index("Contract").unwrap();
        rows[0].categorical[contract] = None;

        let fitted = PreprocessorBuilder::new().fit(&rows, &labels).unwrap();
        let encoding = fitted.encoding("Contract").unwrap();
        assert_eq!(encoding.fill_value, "Month-to-month");
        assert_eq!(
            encoding.encode(None, fitted.prior()),
            encoding.mapping["Month-to-month"]
        );
    }

    #[test]
    fn test_fitted_encoder_keeps_its_settings() {
        let (rows, labels) = training_rows();
        let builder = PreprocessorBuilder::new().with_min_samples_leaf(3).with_smoothing(1.5);
        let fitted = builder.fit(&rows, &labels).unwrap();
        assert_eq!(fitted.settings(), builder);

        // refitting with the recorded settings reproduces the encoder
        let refit = fitted.settings().fit(&rows, &labels).unwrap();
        assert_eq!(refit, fitted);
        assert_ne!(PreprocessorBuilder::new().fit(&rows, &labels).unwrap(), fitted);
    }

    #[test]
    fn test_smoothing_pulls_rare_categories_to_prior() {
        let (rows, labels) = training_rows();
        let fitted = PreprocessorBuilder::new().fit(&rows, &labels).unwrap();
        let contract = fitted.encoding("Contract").unwrap();

        // One year: a single churner, so its raw mean is 1.0
        let rare = contract.mapping["One year"];
        assert!((rare - fitted.prior()).abs() < 0.2);
        assert!(rare > fitted.prior());

        // Month-to-month: 30 rows at a 50% churn rate, close to its own mean
        let common = contract.mapping["Month-to-month"];
        assert!((common - 0.5).abs() < (fitted.prior() - 0.5).abs());
    }

    #[test]
    fn test_single_class_is_fit_error() {
        let rows = vec![test_row("One year", "Mailed check", 3.0, 20.0, Some(60.0)); 4];
        let labels = vec![0; 4];
        let err = PreprocessorBuilder::new().fit(&rows, &labels).unwrap_err();
        assert!(matches!(err, ChurnError::Fit(_)));
    }

    #[test]
    fn test_median_even_count() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(median(&mut values), Some(2.5));
        assert_eq!(median(&mut []), None);
    }
}
