//! Static description of the customer record table
//!
//! Every column of the source CSV is declared here once. Categorical
//! columns carry their full vocabulary so that cells are validated at the
//! loader and predictor boundary and stored as `&'static str` afterwards.

/// Identifier column, never used as a feature
pub const ID_COLUMN: &str = "customerID";

/// Label column
pub const LABEL_COLUMN: &str = "Churn";

/// All 21 source columns in file order
pub const SOURCE_COLUMNS: [&str; 21] = [
    "customerID",
    "gender",
    "SeniorCitizen",
    "Partner",
    "Dependents",
    "tenure",
    "PhoneService",
    "MultipleLines",
    "InternetService",
    "OnlineSecurity",
    "OnlineBackup",
    "DeviceProtection",
    "TechSupport",
    "StreamingTV",
    "StreamingMovies",
    "Contract",
    "PaperlessBilling",
    "PaymentMethod",
    "MonthlyCharges",
    "TotalCharges",
    "Churn",
];

const YES_NO: &[&str] = &["Yes", "No"];
const INTERNET_ADDON: &[&str] = &["Yes", "No", "No internet service"];

/// A categorical column and its allowed values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoricalColumn {
    pub name: &'static str,
    pub vocabulary: &'static [&'static str],
}

impl CategoricalColumn {
    /// Look up `value` in the vocabulary, returning the interned schema string
    pub fn intern(&self, value: &str) -> Option<&'static str> {
        self.vocabulary.iter().copied().find(|v| *v == value)
    }
}

pub const N_CATEGORICAL: usize = 16;
pub const N_NUMERIC: usize = 3;
pub const N_FEATURES: usize = N_CATEGORICAL + N_NUMERIC;

/// Categorical feature columns, in the order they appear in the feature matrix
pub const CATEGORICAL_COLUMNS: [CategoricalColumn; N_CATEGORICAL] = [
    CategoricalColumn { name: "gender", vocabulary: &["Male", "Female"] },
    CategoricalColumn { name: "SeniorCitizen", vocabulary: &["No", "Yes"] },
    CategoricalColumn { name: "Partner", vocabulary: YES_NO },
    CategoricalColumn { name: "Dependents", vocabulary: YES_NO },
    CategoricalColumn { name: "PhoneService", vocabulary: YES_NO },
    CategoricalColumn {
        name: "MultipleLines",
        vocabulary: &["Yes", "No", "No phone service"],
    },
    CategoricalColumn {
        name: "InternetService",
        vocabulary: &["DSL", "Fiber optic", "No"],
    },
    CategoricalColumn { name: "OnlineSecurity", vocabulary: INTERNET_ADDON },
    CategoricalColumn { name: "OnlineBackup", vocabulary: INTERNET_ADDON },
    CategoricalColumn { name: "DeviceProtection", vocabulary: INTERNET_ADDON },
    CategoricalColumn { name: "TechSupport", vocabulary: INTERNET_ADDON },
    CategoricalColumn { name: "StreamingTV", vocabulary: INTERNET_ADDON },
    CategoricalColumn { name: "StreamingMovies", vocabulary: INTERNET_ADDON },
    CategoricalColumn {
        name: "Contract",
        vocabulary: &["Month-to-month", "One year", "Two year"],
    },
    CategoricalColumn { name: "PaperlessBilling", vocabulary: YES_NO },
    CategoricalColumn {
        name: "PaymentMethod",
        vocabulary: &[
            "Electronic check",
            "Mailed check",
            "Bank transfer (automatic)",
            "Credit card (automatic)",
        ],
    },
];

/// Numeric feature columns, in the order they appear in the feature matrix
pub const NUMERIC_COLUMNS: [&str; N_NUMERIC] = ["tenure", "MonthlyCharges", "TotalCharges"];

pub const TENURE: usize = 0;
pub const MONTHLY_CHARGES: usize = 1;
pub const TOTAL_CHARGES: usize = 2;

/// Feature names in transformed-matrix order: categorical block, then numeric block
pub fn feature_names() -> Vec<&'static str> {
    CATEGORICAL_COLUMNS
        .iter()
        .map(|c| c.name)
        .chain(NUMERIC_COLUMNS.iter().copied())
        .collect()
}

/// Index of a categorical column by name
pub fn categorical_index(name: &str) -> Option<usize> {
    CATEGORICAL_COLUMNS.iter().position(|c| c.name == name)
}

/// The feature cells of one customer, validated against the schema
///
/// `None` marks a missing cell; imputation is left to the preprocessor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRow {
    pub categorical: [Option<&'static str>; N_CATEGORICAL],
    pub numeric: [Option<f64>; N_NUMERIC],
}

impl FeatureRow {
    /// Categorical cell by column name
    pub fn category(&self, name: &str) -> Option<&'static str> {
        categorical_index(name).and_then(|i| self.categorical[i])
    }

    /// Set a categorical cell by column name, validating against the vocabulary
    pub fn set_category(&mut self, name: &str, value: &str) -> Result<(), String> {
        let idx = categorical_index(name).ok_or_else(|| format!("unknown column '{name}'"))?;
        let column = &CATEGORICAL_COLUMNS[idx];
        let interned = column
            .intern(value)
            .ok_or_else(|| format!("column '{name}': value '{value}' is not in the vocabulary"))?;
        self.categorical[idx] = Some(interned);
        Ok(())
    }

    pub fn tenure(&self) -> Option<f64> {
        self.numeric[TENURE]
    }

    pub fn monthly_charges(&self) -> Option<f64> {
        self.numeric[MONTHLY_CHARGES]
    }

    pub fn total_charges(&self) -> Option<f64> {
        self.numeric[TOTAL_CHARGES]
    }
}

/// Fixture row: every categorical cell set to its first vocabulary entry
#[cfg(test)]
pub(crate) fn test_row(
    contract: &str,
    payment: &str,
    tenure: f64,
    monthly: f64,
    total: Option<f64>,
) -> FeatureRow {
    let mut row = FeatureRow::default();
    for (idx, column) in CATEGORICAL_COLUMNS.iter().enumerate() {
        row.categorical[idx] = Some(column.vocabulary[0]);
    }
    row.set_category("Contract", contract).unwrap();
    row.set_category("PaymentMethod", payment).unwrap();
    row.numeric = [Some(tenure), Some(monthly), total];
    row
}
