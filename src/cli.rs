//! Command-line interface definitions and argument parsing

use crate::form::FormInput;
use crate::model::GbtParams;
use crate::preprocess::PreprocessorBuilder;
use crate::train::{TrainingConfig, DEFAULT_ARTIFACT_PATH, DEFAULT_SPLITS_DIR};
use clap::{Args as ClapArgs, Parser, Subcommand};

const DEFAULT_INPUT: &str = "data/raw/WA_Fn-UseC_-Telco-Customer-Churn.csv";

/// Telecom churn analytics and prediction
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Split the customer table, fit the pipeline and persist it
    Train(TrainArgs),
    /// Cross-validate and score the persisted pipeline on the holdout split
    Evaluate(EvaluateArgs),
    /// Batch-score a CSV file with the persisted pipeline
    Predict(PredictArgs),
    /// Score a single customer described by form labels
    Score(ScoreArgs),
    /// Print dashboard figures and render churn charts
    Report(ReportArgs),
}

#[derive(ClapArgs, Debug)]
pub struct TrainArgs {
    /// Path to the customer CSV file
    #[arg(short, long, default_value = DEFAULT_INPUT)]
    pub input: String,

    /// Where to write the serialized pipeline
    #[arg(short, long, default_value = DEFAULT_ARTIFACT_PATH)]
    pub artifact: String,

    /// Directory receiving train.csv and test.csv
    #[arg(long, default_value = DEFAULT_SPLITS_DIR)]
    pub splits_dir: String,

    /// Number of boosting rounds
    #[arg(long, default_value = "1000")]
    pub n_estimators: usize,

    /// Fraction of rows held out for evaluation
    #[arg(long, default_value = "0.2")]
    pub test_size: f64,

    /// Seed for the split and the classifier's sampling
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Category count at which target encoding trusts the category mean as much as the prior
    #[arg(long, default_value = "20")]
    pub min_samples_leaf: usize,

    /// Steepness of the target-encoding blend
    #[arg(long, default_value = "10.0")]
    pub smoothing: f64,
}

impl TrainArgs {
    pub fn to_config(&self) -> TrainingConfig {
        TrainingConfig::default()
            .with_test_size(self.test_size)
            .with_seed(self.seed)
            .with_params(
                GbtParams::default()
                    .with_n_estimators(self.n_estimators)
                    .with_seed(self.seed),
            )
            .with_preprocessor(
                PreprocessorBuilder::new()
                    .with_min_samples_leaf(self.min_samples_leaf)
                    .with_smoothing(self.smoothing),
            )
    }
}

#[derive(ClapArgs, Debug)]
pub struct EvaluateArgs {
    /// Path to the customer CSV file the pipeline was trained from
    #[arg(short, long, default_value = DEFAULT_INPUT)]
    pub input: String,

    /// Serialized pipeline to evaluate
    #[arg(short, long, default_value = DEFAULT_ARTIFACT_PATH)]
    pub artifact: String,

    /// Number of cross-validation folds
    #[arg(short = 'k', long, default_value = "5")]
    pub folds: usize,

    /// Fraction of rows held out, must match training
    #[arg(long, default_value = "0.2")]
    pub test_size: f64,

    /// Split seed, must match training
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Also report holdout metrics at this probability cut
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Skip cross-validation and only score the holdout split
    #[arg(long)]
    pub skip_cv: bool,
}

#[derive(ClapArgs, Debug)]
pub struct PredictArgs {
    /// CSV file to score
    #[arg(short, long, default_value = "data/processed/test.csv")]
    pub input: String,

    /// Serialized pipeline
    #[arg(short, long, default_value = DEFAULT_ARTIFACT_PATH)]
    pub artifact: String,

    /// Output CSV with Churn, predicted and pred_probability columns
    #[arg(short, long, default_value = "data/processed/predictions.csv")]
    pub output: String,
}

/// Form fields, using the labels shown to the user
#[derive(ClapArgs, Debug)]
pub struct ScoreArgs {
    /// Serialized pipeline
    #[arg(short, long, default_value = DEFAULT_ARTIFACT_PATH)]
    pub artifact: String,

    /// Masculino or Feminino
    #[arg(long, default_value = "Masculino")]
    pub gender: String,

    /// Sim or Não
    #[arg(long, default_value = "Sim")]
    pub senior: String,

    #[arg(long, default_value = "Sim")]
    pub partner: String,

    #[arg(long, default_value = "Sim")]
    pub dependents: String,

    /// Months with the company
    #[arg(long, default_value = "1")]
    pub tenure: f64,

    #[arg(long, default_value = "Sim")]
    pub phone_service: String,

    /// Sim, Não or "Não possui linha"
    #[arg(long, default_value = "Sim")]
    pub multiple_lines: String,

    /// DSL, "Fibra ótica" or Não
    #[arg(long, default_value = "DSL")]
    pub internet_service: String,

    /// Sim, Não or "Não possui internet"
    #[arg(long, default_value = "Sim")]
    pub online_security: String,

    #[arg(long, default_value = "Sim")]
    pub online_backup: String,

    #[arg(long, default_value = "Sim")]
    pub device_protection: String,

    #[arg(long, default_value = "Sim")]
    pub tech_support: String,

    #[arg(long, default_value = "Sim")]
    pub streaming_tv: String,

    #[arg(long, default_value = "Sim")]
    pub streaming_movies: String,

    /// Month-to-month, One year or Two year
    #[arg(long, default_value = "Month-to-month")]
    pub contract: String,

    #[arg(long, default_value = "Sim")]
    pub paperless_billing: String,

    /// Payment method as it appears in the customer table
    #[arg(long, default_value = "Electronic check")]
    pub payment_method: String,

    /// Monthly charge, between 20 and 120
    #[arg(long, default_value = "20")]
    pub monthly_charges: f64,
}

impl ScoreArgs {
    pub fn to_form(&self) -> FormInput {
        FormInput {
            gender: self.gender.clone(),
            senior_citizen: self.senior.clone(),
            partner: self.partner.clone(),
            dependents: self.dependents.clone(),
            tenure: self.tenure,
            phone_service: self.phone_service.clone(),
            multiple_lines: self.multiple_lines.clone(),
            internet_service: self.internet_service.clone(),
            online_security: self.online_security.clone(),
            online_backup: self.online_backup.clone(),
            device_protection: self.device_protection.clone(),
            tech_support: self.tech_support.clone(),
            streaming_tv: self.streaming_tv.clone(),
            streaming_movies: self.streaming_movies.clone(),
            contract: self.contract.clone(),
            paperless_billing: self.paperless_billing.clone(),
            payment_method: self.payment_method.clone(),
            monthly_charges: self.monthly_charges,
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct ReportArgs {
    /// Path to the customer CSV file
    #[arg(short, long, default_value = DEFAULT_INPUT)]
    pub input: String,

    /// Directory for the PNG charts
    #[arg(short, long, default_value = "reports")]
    pub output_dir: String,

    /// Histogram bin count
    #[arg(long, default_value = "30")]
    pub bins: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_defaults() {
        let args = Args::try_parse_from(["churnforge", "train"]).unwrap();
        let Command::Train(train) = args.command else {
            panic!("expected train subcommand");
        };

        assert_eq!(train.artifact, DEFAULT_ARTIFACT_PATH);
        assert_eq!(train.splits_dir, DEFAULT_SPLITS_DIR);
        assert_eq!(train.to_config(), TrainingConfig::default());
        assert!(!args.verbose);
    }

    #[test]
    fn test_train_encoding_options() {
        let args = Args::try_parse_from(["churnforge", "train", "--min-samples-leaf", "5", "--smoothing", "2.5"])
            .unwrap();
        let Command::Train(train) = args.command else {
            panic!("expected train subcommand");
        };

        let expected = PreprocessorBuilder::new().with_min_samples_leaf(5).with_smoothing(2.5);
        assert_eq!(train.to_config().preprocessor, expected);
    }

    #[test]
    fn test_global_verbose_after_subcommand() {
        let args = Args::try_parse_from(["churnforge", "predict", "--verbose", "-i", "x.csv"]).unwrap();
        assert!(args.verbose);
        let Command::Predict(predict) = args.command else {
            panic!("expected predict subcommand");
        };
        assert_eq!(predict.input, "x.csv");
    }

    #[test]
    fn test_evaluate_options() {
        let args = Args::try_parse_from(["churnforge", "evaluate", "-k", "3", "--threshold", "0.4", "--skip-cv"])
            .unwrap();
        let Command::Evaluate(evaluate) = args.command else {
            panic!("expected evaluate subcommand");
        };
        assert_eq!(evaluate.folds, 3);
        assert_eq!(evaluate.threshold, Some(0.4));
        assert!(evaluate.skip_cv);
    }

    #[test]
    fn test_score_args_build_a_valid_form() {
        let args = Args::try_parse_from([
            "churnforge",
            "score",
            "--gender",
            "Feminino",
            "--internet-service",
            "Fibra ótica",
            "--tenure",
            "24",
            "--monthly-charges",
            "99.5",
        ])
        .unwrap();
        let Command::Score(score) = args.command else {
            panic!("expected score subcommand");
        };

        let row = score.to_form().to_feature_row().unwrap();
        assert_eq!(row.category("gender"), Some("Female"));
        assert_eq!(row.category("InternetService"), Some("Fiber optic"));
        assert_eq!(row.total_charges(), Some(24.0 * 99.5));
    }

    #[test]
    fn test_missing_subcommand_is_rejected() {
        assert!(Args::try_parse_from(["churnforge"]).is_err());
    }
}
