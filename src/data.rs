//! Data loading and schema normalization using Polars

use crate::error::ChurnError;
use crate::schema::{
    FeatureRow, CATEGORICAL_COLUMNS, ID_COLUMN, LABEL_COLUMN, NUMERIC_COLUMNS, N_CATEGORICAL,
    SOURCE_COLUMNS,
};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::Path;
use tracing::{debug, warn};

/// Churn label as shown in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChurnLabel {
    No,
    Yes,
}

impl ChurnLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChurnLabel::No => "No",
            ChurnLabel::Yes => "Yes",
        }
    }

}

/// One normalized customer row
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord<L> {
    /// Source identifier, carried for traceability only
    pub customer_id: String,
    /// Validated feature cells
    pub features: FeatureRow,
    /// Churn label in the representation of the loader variant
    pub churn: L,
}

/// Record with the label mapped to 0/1, consumed by training and evaluation
pub type TrainingRecord = CustomerRecord<u8>;

/// Record with the label kept as a Yes/No category, consumed by the analytics report
pub type ReportRecord = CustomerRecord<ChurnLabel>;

/// Which side of the pipeline is reading a table; decides how schema violations are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Boundary {
    Loader,
    Predictor,
}

impl Boundary {
    fn schema_error(self, message: String) -> ChurnError {
        match self {
            Boundary::Loader => ChurnError::Schema(message),
            Boundary::Predictor => ChurnError::InferenceSchema(message),
        }
    }
}

/// Load the customer table for training, with `Churn` mapped to 0/1
///
/// # Arguments
/// * `file_path` - Path to the CSV file with the 21-column customer schema
///
/// # Returns
/// * Normalized records; missing `TotalCharges` stay missing
pub fn load_training_records<P: AsRef<Path>>(file_path: P) -> crate::Result<Vec<TrainingRecord>> {
    load_records(file_path.as_ref(), parse_binary_label)
}

/// Load the customer table for reporting, with `Churn` kept as Yes/No
pub fn load_report_records<P: AsRef<Path>>(file_path: P) -> crate::Result<Vec<ReportRecord>> {
    load_records(file_path.as_ref(), parse_category_label)
}

/// Persist training records in normalized form
///
/// `SeniorCitizen` is written as No/Yes, `Churn` as 0/1 and missing
/// `TotalCharges` as an empty cell, so [`load_training_records`] reads the
/// file back to the same records.
pub fn write_training_records<P: AsRef<Path>>(
    file_path: P,
    records: &[TrainingRecord],
) -> crate::Result<()> {
    let file_path = file_path.as_ref();
    let mut df = records_to_frame(records)?;

    if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(file_path)?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;

    debug!(path = %file_path.display(), rows = records.len(), "wrote records");
    Ok(())
}

/// Feature rows read from a prediction input file
#[derive(Debug)]
pub(crate) struct FeatureTable {
    pub rows: Vec<FeatureRow>,
    /// Observed labels, when the file carries a `Churn` column; unlabeled rows are `None`
    pub labels: Option<Vec<Option<u8>>>,
}

/// Read feature rows for scoring; only the feature columns are required
pub(crate) fn read_feature_table(file_path: &Path) -> crate::Result<FeatureTable> {
    let table = RawTable::read(file_path)?;
    let expected: Vec<&str> = crate::schema::feature_names();
    table.require_columns(&expected, Boundary::Predictor)?;

    let mut rows = Vec::with_capacity(table.height());
    for row in 0..table.height() {
        rows.push(table.feature_row(row, Boundary::Predictor)?);
    }

    let labels = if table.has_column(LABEL_COLUMN) {
        // the label is not a feature, so anything but 0/1 or Yes/No passes through as unlabeled
        let mut labels = Vec::with_capacity(table.height());
        for row in 0..table.height() {
            let raw = table.cell(LABEL_COLUMN, row)?.map(str::trim).unwrap_or_default();
            let label = parse_binary_label(raw);
            if label.is_none() && !raw.is_empty() {
                debug!(row = row + 1, value = raw, "unrecognized label treated as unlabeled");
            }
            labels.push(label);
        }
        Some(labels)
    } else {
        None
    };

    Ok(FeatureTable { rows, labels })
}

fn load_records<L>(
    file_path: &Path,
    parse_label: fn(&str) -> Option<L>,
) -> crate::Result<Vec<CustomerRecord<L>>> {
    let table = RawTable::read(file_path)?;
    table.require_columns(&SOURCE_COLUMNS, Boundary::Loader)?;

    let mut records = Vec::with_capacity(table.height());
    for row in 0..table.height() {
        let customer_id = table.cell(ID_COLUMN, row)?.unwrap_or_default().trim().to_string();
        let features = table.feature_row(row, Boundary::Loader)?;
        let churn = required_label(table.cell(LABEL_COLUMN, row)?, row, parse_label)?;

        if features.total_charges().is_none() && features.tenure() != Some(0.0) {
            warn!(
                customer_id = %customer_id,
                tenure = ?features.tenure(),
                "TotalCharges missing for a customer with billing history"
            );
        }

        records.push(CustomerRecord {
            customer_id,
            features,
            churn,
        });
    }

    debug!(path = %file_path.display(), rows = records.len(), "loaded records");
    Ok(records)
}

/// Source table with every column read as text
struct RawTable {
    df: DataFrame,
    columns: HashSet<String>,
}

impl RawTable {
    fn read(file_path: &Path) -> crate::Result<Self> {
        // Schema inference is disabled so every column arrives as text and
        // numeric casting stays under our control.
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
            .finish()?;

        let columns = df
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();

        Ok(Self { df, columns })
    }

    fn height(&self) -> usize {
        self.df.height()
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    fn require_columns(&self, expected: &[&str], boundary: Boundary) -> crate::Result<()> {
        let missing: Vec<&str> = expected
            .iter()
            .copied()
            .filter(|name| !self.has_column(name))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(boundary.schema_error(format!("missing columns: {}", missing.join(", "))))
        }
    }

    fn cell(&self, name: &str, row: usize) -> crate::Result<Option<&str>> {
        Ok(self.df.column(name)?.str()?.get(row))
    }

    fn feature_row(&self, row: usize, boundary: Boundary) -> crate::Result<FeatureRow> {
        let mut features = FeatureRow::default();

        for idx in 0..N_CATEGORICAL {
            let column = &CATEGORICAL_COLUMNS[idx];
            let raw = self.cell(column.name, row)?;
            features.categorical[idx] = match raw.map(str::trim) {
                None | Some("") => None,
                Some(value) => {
                    let value = if column.name == "SeniorCitizen" {
                        senior_citizen_category(value)
                    } else {
                        value
                    };
                    let interned = column.intern(value).ok_or_else(|| {
                        boundary.schema_error(format!(
                            "column '{}' at row {}: value '{}' is not in the vocabulary",
                            column.name,
                            row + 1,
                            value
                        ))
                    })?;
                    Some(interned)
                }
            };
        }

        for (idx, name) in NUMERIC_COLUMNS.iter().enumerate() {
            features.numeric[idx] = parse_numeric(name, self.cell(name, row)?, row)?;
        }

        Ok(features)
    }
}

/// Map the 0/1 senior flag to its category; already-mapped values pass through
fn senior_citizen_category(value: &str) -> &str {
    match value {
        "0" => "No",
        "1" => "Yes",
        other => other,
    }
}

/// Blank and whitespace-only cells are missing; anything else must be a non-negative number
fn parse_numeric(column: &str, raw: Option<&str>, row: usize) -> crate::Result<Option<f64>> {
    let Some(text) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };

    match text.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(Some(value)),
        _ => Err(ChurnError::Parse {
            column: column.to_string(),
            row: row + 1,
            value: text.to_string(),
        }),
    }
}

fn parse_binary_label(value: &str) -> Option<u8> {
    match value {
        "Yes" | "1" => Some(1),
        "No" | "0" => Some(0),
        _ => None,
    }
}

fn parse_category_label(value: &str) -> Option<ChurnLabel> {
    match value {
        "Yes" | "1" => Some(ChurnLabel::Yes),
        "No" | "0" => Some(ChurnLabel::No),
        _ => None,
    }
}

fn required_label<L>(raw: Option<&str>, row: usize, parse_label: fn(&str) -> Option<L>) -> crate::Result<L> {
    let text = raw.map(str::trim).unwrap_or_default();
    parse_label(text).ok_or_else(|| {
        ChurnError::Schema(format!(
            "column '{}' at row {}: invalid label '{}'",
            LABEL_COLUMN,
            row + 1,
            text
        ))
    })
}

fn records_to_frame(records: &[TrainingRecord]) -> crate::Result<DataFrame> {
    let mut columns = Vec::with_capacity(SOURCE_COLUMNS.len());

    for name in SOURCE_COLUMNS {
        let series = if name == ID_COLUMN {
            let ids: Vec<&str> = records.iter().map(|r| r.customer_id.as_str()).collect();
            Series::new(name, ids)
        } else if name == LABEL_COLUMN {
            let labels: Vec<i32> = records.iter().map(|r| i32::from(r.churn)).collect();
            Series::new(name, labels)
        } else if let Some(idx) = crate::schema::categorical_index(name) {
            let values: Vec<Option<&str>> =
                records.iter().map(|r| r.features.categorical[idx]).collect();
            Series::new(name, values)
        } else {
            let idx = NUMERIC_COLUMNS
                .iter()
                .position(|n| *n == name)
                .ok_or_else(|| ChurnError::Schema(format!("unmapped column '{name}'")))?;
            let values: Vec<Option<f64>> = records.iter().map(|r| r.features.numeric[idx]).collect();
            Series::new(name, values)
        };
        columns.push(series);
    }

    Ok(DataFrame::new(columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "customerID,gender,SeniorCitizen,Partner,Dependents,tenure,PhoneService,MultipleLines,InternetService,OnlineSecurity,OnlineBackup,DeviceProtection,TechSupport,StreamingTV,StreamingMovies,Contract,PaperlessBilling,PaymentMethod,MonthlyCharges,TotalCharges,Churn";

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        writeln!(file, "7590-VHVEG,Female,0,Yes,No,1,No,No phone service,DSL,No,Yes,No,No,No,No,Month-to-month,Yes,Electronic check,29.85,29.85,No").unwrap();
        writeln!(file, "5575-GNVDE,Male,0,No,No,34,Yes,No,DSL,Yes,No,Yes,No,No,No,One year,No,Mailed check,56.95,1889.5,No").unwrap();
        writeln!(file, "3668-QPYBK,Male,1,No,No,2,Yes,No,DSL,Yes,Yes,No,No,No,No,Month-to-month,Yes,Mailed check,53.85,108.15,Yes").unwrap();
        writeln!(file, "4472-LVYGI,Female,0,Yes,Yes,0,No,No phone service,DSL,Yes,No,Yes,Yes,Yes,No,Two year,Yes,Bank transfer (automatic),52.55, ,No").unwrap();
        file
    }

    #[test]
    fn test_load_training_records() {
        let file = create_test_csv();
        let records = load_training_records(file.path()).unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(records[0].customer_id, "7590-VHVEG");
        assert_eq!(records[0].churn, 0);
        assert_eq!(records[2].churn, 1);
        assert_eq!(records[1].features.total_charges(), Some(1889.5));
    }

    #[test]
    fn test_senior_citizen_maps_both_values() {
        let file = create_test_csv();
        let records = load_training_records(file.path()).unwrap();

        assert_eq!(records[0].features.category("SeniorCitizen"), Some("No"));
        assert_eq!(records[2].features.category("SeniorCitizen"), Some("Yes"));
    }

    #[test]
    fn test_blank_total_charges_is_missing_at_zero_tenure() {
        let file = create_test_csv();
        let records = load_training_records(file.path()).unwrap();

        let new_customer = &records[3];
        assert_eq!(new_customer.features.tenure(), Some(0.0));
        assert_eq!(new_customer.features.total_charges(), None);
    }

    #[test]
    fn test_report_variant_keeps_label_category() {
        let file = create_test_csv();
        let records = load_report_records(file.path()).unwrap();

        assert_eq!(records[0].churn, ChurnLabel::No);
        assert_eq!(records[2].churn, ChurnLabel::Yes);
        assert_eq!(records[2].churn.as_str(), "Yes");
    }

    #[test]
    fn test_loading_is_idempotent() {
        let file = create_test_csv();
        let first = load_training_records(file.path()).unwrap();
        let second = load_training_records(file.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "customerID,gender,tenure,Churn").unwrap();
        writeln!(file, "0001,Male,3,No").unwrap();

        let err = load_training_records(file.path()).unwrap_err();
        assert!(matches!(err, ChurnError::Schema(ref msg) if msg.contains("MonthlyCharges")));
    }

    #[test]
    fn test_numeric_garbage_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        writeln!(file, "0001,Male,0,No,No,5,Yes,No,DSL,No,No,No,No,No,No,Month-to-month,Yes,Mailed check,20.0,abc,No").unwrap();

        let err = load_training_records(file.path()).unwrap_err();
        match err {
            ChurnError::Parse { column, row, value } => {
                assert_eq!(column, "TotalCharges");
                assert_eq!(row, 1);
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_category_is_schema_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        writeln!(file, "0001,Male,0,No,No,5,Yes,No,Satellite,No,No,No,No,No,No,Month-to-month,Yes,Mailed check,20.0,100.0,No").unwrap();

        let err = load_training_records(file.path()).unwrap_err();
        assert!(matches!(err, ChurnError::Schema(ref msg) if msg.contains("Satellite")));
    }

    #[test]
    fn test_written_split_reloads_identically() {
        let file = create_test_csv();
        let records = load_training_records(file.path()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let split_path = dir.path().join("processed").join("train.csv");
        write_training_records(&split_path, &records).unwrap();

        let reloaded = load_training_records(&split_path).unwrap();
        assert_eq!(records, reloaded);
    }
}
