//! ChurnForge: telecom churn analytics and prediction CLI
//!
//! This is the main entrypoint that dispatches to training, evaluation,
//! batch and single-customer scoring, and the analytics report.

use anyhow::{Context, Result};
use churnforge::cli::{Command, EvaluateArgs, PredictArgs, ReportArgs, ScoreArgs, TrainArgs};
use churnforge::evaluate::{cross_validate, evaluate, evaluate_at, HoldoutMetrics};
use churnforge::{
    load_report_records, load_training_records, predict_file, predict_one, run_training,
    stratified_split, viz, Args, InferencePipeline, TrainingConfig, TrainingRecord,
    DECISION_THRESHOLD,
};
use clap::Parser;
use std::path::Path;
use std::time::Instant;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &args.command {
        Command::Train(train) => run_train(train, args.verbose),
        Command::Evaluate(eval) => run_evaluate(eval, args.verbose),
        Command::Predict(predict) => run_predict(predict),
        Command::Score(score) => run_score(score),
        Command::Report(report) => run_report(report),
    }
}

fn load_pipeline(path: &str) -> Result<InferencePipeline> {
    let pipeline = InferencePipeline::load(path)
        .with_context(|| format!("failed to load pipeline from {path}"))?;
    pipeline.check_schema()?;
    Ok(pipeline)
}

/// Fit the pipeline and persist it with the splits
fn run_train(args: &TrainArgs, verbose: bool) -> Result<()> {
    println!("=== Training Pipeline ===\n");

    let config = args.to_config();
    if verbose {
        println!("  Input file: {}", args.input);
        println!("  Trees: {}", config.params.n_estimators);
        println!("  Learning rate: {}", config.params.learning_rate);
        println!("  Max depth: {}", config.params.max_depth);
        println!("  Holdout fraction: {}", config.test_size);
    }

    let start_time = Instant::now();
    let outcome = run_training(&args.input, &args.artifact, &args.splits_dir, &config)
        .with_context(|| format!("training from {} failed", args.input))?;

    println!(
        "✓ Split: {} training rows, {} holdout rows",
        outcome.train.len(),
        outcome.holdout.len()
    );
    println!(
        "✓ Class weights: no churn {:.4}, churn {:.4}",
        outcome.class_weights.negative, outcome.class_weights.positive
    );
    println!("✓ Pipeline saved to: {}", args.artifact);
    println!(
        "  Splits saved to: {}",
        Path::new(&args.splits_dir).display()
    );
    println!("\nTotal processing time: {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(())
}

fn print_metrics(title: &str, metrics: &HoldoutMetrics) {
    println!("\n{title}");
    println!("{}", "-".repeat(25));
    println!("Accuracy:  {:.4}", metrics.accuracy);
    println!("F1 score:  {:.4}", metrics.f1);
    println!("ROC AUC:   {:.4}", metrics.roc_auc);
    println!("MCC:       {:.4}", metrics.mcc);
}

/// Cross-validate on the training split and score the holdout split
fn run_evaluate(args: &EvaluateArgs, verbose: bool) -> Result<()> {
    println!("=== Evaluation ===");

    let start_time = Instant::now();
    let pipeline = load_pipeline(&args.artifact)?;
    let records = load_training_records(&args.input)
        .with_context(|| format!("failed to load {}", args.input))?;

    let labels: Vec<u8> = records.iter().map(|r| r.churn).collect();
    let (train_idx, holdout_idx) = stratified_split(&labels, args.test_size, args.seed)?;
    let training: Vec<TrainingRecord> = train_idx.iter().map(|&i| records[i].clone()).collect();
    let holdout: Vec<TrainingRecord> = holdout_idx.iter().map(|&i| records[i].clone()).collect();

    if verbose {
        println!("  Pipeline trained at: {}", pipeline.metadata().trained_at);
        println!("  Training rows: {}, holdout rows: {}", training.len(), holdout.len());
    }

    if !args.skip_cv {
        let config = TrainingConfig::default()
            .with_test_size(args.test_size)
            .with_seed(args.seed)
            .with_params(pipeline.classifier().params().clone())
            .with_preprocessor(pipeline.preprocessor().settings());
        let report = cross_validate(&config, &training, args.folds)?;

        println!("\nCross-validation ({} folds)", args.folds);
        println!("{}", "-".repeat(25));
        println!("Mean F1:   {:.4}", report.mean());
        println!("Std F1:    {:.4}", report.std());
        println!("Range F1:  {:.4} .. {:.4}", report.min(), report.max());
        if verbose {
            for (fold, score) in report.scores.iter().enumerate() {
                println!("  Fold {fold}: {score:.4}");
            }
        }
    }

    print_metrics("Holdout metrics", &evaluate(&pipeline, &holdout)?);
    if let Some(threshold) = args.threshold {
        print_metrics(
            &format!("Holdout metrics at threshold {threshold}"),
            &evaluate_at(&pipeline, &holdout, threshold)?,
        );
    }

    println!("\nTotal processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

/// Batch prediction over a split file
fn run_predict(args: &PredictArgs) -> Result<()> {
    let pipeline = load_pipeline(&args.artifact)?;
    let predictions = predict_file(&pipeline, &args.input, &args.output)
        .with_context(|| format!("failed to score {}", args.input))?;

    let churners = predictions.iter().filter(|p| p.is_churn()).count();
    println!("✓ Scored {} customers", predictions.len());
    println!(
        "  Predicted churners: {} (threshold {:.2})",
        churners, DECISION_THRESHOLD
    );
    println!("  Predictions saved to: {}", args.output);
    Ok(())
}

/// Single-customer prediction from form labels
fn run_score(args: &ScoreArgs) -> Result<()> {
    let pipeline = load_pipeline(&args.artifact)?;
    let row = args.to_form().to_feature_row()?;
    let prediction = predict_one(&pipeline, &row)?;

    println!("=== Prediction ===");
    println!("Churn probability: {:.1}%", prediction.probability * 100.0);
    if prediction.is_churn() {
        println!("✗ Customer is likely to churn");
    } else {
        println!("✓ Customer is likely to stay");
    }
    Ok(())
}

/// Dashboard figures and charts
fn run_report(args: &ReportArgs) -> Result<()> {
    let records = load_report_records(&args.input)
        .with_context(|| format!("failed to load {}", args.input))?;
    let written = viz::generate_report(&records, Path::new(&args.output_dir), args.bins)?;

    println!("\n✓ Charts generated");
    for path in written {
        println!("  {}", path.display());
    }
    Ok(())
}
