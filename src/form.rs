//! Interactive form boundary: display labels to schema values
//!
//! The form shows Portuguese labels. Each one maps to exactly one schema
//! category; a label outside the table is rejected rather than turned into
//! a missing cell.

use crate::error::ChurnError;
use crate::schema::{categorical_index, FeatureRow, CATEGORICAL_COLUMNS};

type LabelMap = &'static [(&'static str, &'static str)];

const GENDER: LabelMap = &[("Masculino", "Male"), ("Feminino", "Female")];
const YES_NO: LabelMap = &[("Sim", "Yes"), ("Não", "No")];
const PHONE_LINES: LabelMap = &[("Sim", "Yes"), ("Não", "No"), ("Não possui linha", "No phone service")];
const INTERNET: LabelMap = &[("DSL", "DSL"), ("Fibra ótica", "Fiber optic"), ("Não", "No")];
const INTERNET_ADDON: LabelMap = &[
    ("Sim", "Yes"),
    ("Não", "No"),
    ("Não possui internet", "No internet service"),
];

/// Bounds of the monthly charge slider
pub const MONTHLY_CHARGE_RANGE: (f64, f64) = (20.0, 120.0);

/// Label table for a column; `None` means labels are schema values
fn label_map(column: &str) -> Option<LabelMap> {
    match column {
        "gender" => Some(GENDER),
        "SeniorCitizen" | "Partner" | "Dependents" | "PhoneService" | "PaperlessBilling" => Some(YES_NO),
        "MultipleLines" => Some(PHONE_LINES),
        "InternetService" => Some(INTERNET),
        "OnlineSecurity" | "OnlineBackup" | "DeviceProtection" | "TechSupport" | "StreamingTV"
        | "StreamingMovies" => Some(INTERNET_ADDON),
        _ => None,
    }
}

/// Labels offered by the form for a categorical column
pub fn display_labels(column: &str) -> Vec<&'static str> {
    match label_map(column) {
        Some(map) => map.iter().map(|(label, _)| *label).collect(),
        None => categorical_index(column)
            .map(|idx| CATEGORICAL_COLUMNS[idx].vocabulary.to_vec())
            .unwrap_or_default(),
    }
}

/// Translate one display label into the schema value of `column`
pub fn schema_value(column: &str, label: &str) -> crate::Result<&'static str> {
    let idx = categorical_index(column)
        .ok_or_else(|| ChurnError::Schema(format!("unknown form field '{column}'")))?;
    let vocabulary = &CATEGORICAL_COLUMNS[idx];
    let label = label.trim();

    let value = match label_map(column) {
        Some(map) => map.iter().find(|(l, _)| *l == label).map(|(_, v)| *v),
        None => vocabulary.intern(label),
    };
    value.ok_or_else(|| {
        ChurnError::Schema(format!(
            "field '{}': '{}' is not one of [{}]",
            column,
            label,
            display_labels(column).join(", ")
        ))
    })
}

/// One filled-in form, in display labels
#[derive(Debug, Clone, PartialEq)]
pub struct FormInput {
    pub gender: String,
    pub senior_citizen: String,
    pub partner: String,
    pub dependents: String,
    /// Months with the company
    pub tenure: f64,
    pub phone_service: String,
    pub multiple_lines: String,
    pub internet_service: String,
    pub online_security: String,
    pub online_backup: String,
    pub device_protection: String,
    pub tech_support: String,
    pub streaming_tv: String,
    pub streaming_movies: String,
    pub contract: String,
    pub paperless_billing: String,
    pub payment_method: String,
    pub monthly_charges: f64,
}

impl FormInput {
    fn labels(&self) -> [(&'static str, &str); 16] {
        [
            ("gender", self.gender.as_str()),
            ("SeniorCitizen", self.senior_citizen.as_str()),
            ("Partner", self.partner.as_str()),
            ("Dependents", self.dependents.as_str()),
            ("PhoneService", self.phone_service.as_str()),
            ("MultipleLines", self.multiple_lines.as_str()),
            ("InternetService", self.internet_service.as_str()),
            ("OnlineSecurity", self.online_security.as_str()),
            ("OnlineBackup", self.online_backup.as_str()),
            ("DeviceProtection", self.device_protection.as_str()),
            ("TechSupport", self.tech_support.as_str()),
            ("StreamingTV", self.streaming_tv.as_str()),
            ("StreamingMovies", self.streaming_movies.as_str()),
            ("Contract", self.contract.as_str()),
            ("PaperlessBilling", self.paperless_billing.as_str()),
            ("PaymentMethod", self.payment_method.as_str()),
        ]
    }

    /// Build the feature row handed to the predictor
    ///
    /// `TotalCharges` is derived as `tenure * MonthlyCharges`.
    pub fn to_feature_row(&self) -> crate::Result<FeatureRow> {
        if !(self.tenure.is_finite() && self.tenure >= 1.0) {
            return Err(ChurnError::Schema(format!(
                "tenure must be at least 1 month, got {}",
                self.tenure
            )));
        }
        let (low, high) = MONTHLY_CHARGE_RANGE;
        if !(self.monthly_charges >= low && self.monthly_charges <= high) {
            return Err(ChurnError::Schema(format!(
                "monthly charges must be between {low} and {high}, got {}",
                self.monthly_charges
            )));
        }

        let mut row = FeatureRow::default();
        for (column, label) in self.labels() {
            let value = schema_value(column, label)?;
            row.set_category(column, value).map_err(ChurnError::Schema)?;
        }
        row.numeric = [
            Some(self.tenure),
            Some(self.monthly_charges),
            Some(self.tenure * self.monthly_charges),
        ];
        Ok(row)
    }
}
