//! Classification CLI Tool
//!
//! Fits a pipeline on the training manifest named in a TOML config, then
//! optionally evaluates it on the test manifest and classifies single images.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;
use transfer_core::{load_pipeline_config, setup_cli_logging, PredictionResult};
use transfer_pipeline::{Evaluation, FittedPipeline, Pipeline, Predictor};
use transfer_training::{LinearClassifier, TrainingReport};

/// Transfer-learning image classifier
#[derive(Parser, Debug)]
#[command(
    name = "classify",
    about = "Fit and evaluate a transfer-learning image classifier",
    long_about = "Scores images with a frozen pretrained network, fits a multinomial \
                  logistic regression on the embeddings and reports log-loss on a \
                  held-out manifest."
)]
struct Args {
    /// Path to the pipeline configuration (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Classify these images after fitting
    #[arg(short, long, value_name = "IMAGE")]
    predict: Vec<PathBuf>,

    /// Skip evaluation even if the config names a test manifest
    #[arg(long)]
    no_eval: bool,

    /// Write a JSON report of the run
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Save the fitted classifier and its vocabulary as JSON
    #[arg(long, value_name = "FILE")]
    save_model: Option<PathBuf>,

    /// Number of top scores to show per prediction
    #[arg(long, default_value = "3")]
    top: usize,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct RunReport<'a> {
    vocabulary: &'a [String],
    training: &'a TrainingReport,
    fit_seconds: f64,
    evaluation: Option<&'a Evaluation>,
    predictions: &'a [PredictionResult],
}

#[derive(Serialize)]
struct SavedModel<'a> {
    extractor: &'a str,
    vocabulary: &'a [String],
    classifier: &'a LinearClassifier,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let config = load_pipeline_config(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    info!("Extractor: {:?}", config.extractor);

    let pipeline = Pipeline::from_config(config.clone()).context("Failed to build pipeline")?;
    info!("Using feature extractor {}", pipeline.extractor().name());

    println!("{}", "Fitting classifier...".green().bold());
    let spinner = spinner(format!(
        "Scoring images from {}",
        config.data.train_manifest.display()
    ));
    let start = Instant::now();
    let fitted = pipeline
        .fit_manifest(&config.data.train_manifest)
        .context("Failed to fit pipeline")?;
    let fit_seconds = start.elapsed().as_secs_f64();
    spinner.finish_and_clear();
    print_training(&fitted, fit_seconds);

    let evaluation = match (&config.data.test_manifest, args.no_eval) {
        (Some(test), false) => {
            let spinner = self::spinner(format!("Evaluating on {}", test.display()));
            let evaluation = fitted
                .evaluate_manifest_detailed(test)
                .context("Failed to evaluate pipeline")?;
            spinner.finish_and_clear();
            print_evaluation(&fitted, &evaluation, args.top);
            Some(evaluation)
        }
        _ => None,
    };

    let predictor = Predictor::new(&fitted);
    let mut predictions = Vec::with_capacity(args.predict.len());
    for path in &args.predict {
        let result = predictor
            .predict_path(path)
            .with_context(|| format!("Failed to classify {}", path.display()))?;
        print_prediction(&fitted, &result, args.top);
        predictions.push(result);
    }

    if let Some(path) = &args.save_model {
        let model = SavedModel {
            extractor: fitted.extractor().name(),
            vocabulary: fitted.vocabulary(),
            classifier: fitted.classifier(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&model)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Model saved to: {}", path.display());
    }

    if let Some(path) = &args.output {
        let report = RunReport {
            vocabulary: fitted.vocabulary(),
            training: fitted.training_report(),
            fit_seconds,
            evaluation: evaluation.as_ref(),
            predictions: &predictions,
        };
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Report saved to: {}", path.display());
    }

    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn print_training(fitted: &FittedPipeline, seconds: f64) {
    let report = fitted.training_report();
    println!();
    println!("{}", "=== Training ===".bold());
    println!("  Classes:     {}", fitted.vocabulary().join(", "));
    println!("  Examples:    {}", report.num_examples);
    println!("  Feature dim: {}", report.feature_dim);
    println!("  Iterations:  {}", report.iterations);
    println!("  Final loss:  {:.6}", report.final_loss);
    let converged = if report.converged {
        "yes".green()
    } else {
        "no".yellow()
    };
    println!("  Converged:   {converged}");
    println!("  Time:        {seconds:.2}s");
}

fn print_evaluation(fitted: &FittedPipeline, evaluation: &Evaluation, top: usize) {
    let metrics = &evaluation.metrics;
    println!();
    println!("{}", "=== Evaluation ===".bold());
    for result in &evaluation.predictions {
        print_prediction(fitted, result, top);
    }
    println!();
    println!("  Samples:            {}", metrics.num_samples);
    println!("  Log-loss:           {:.4}", metrics.log_loss);
    println!("  Log-loss reduction: {:.4}", metrics.log_loss_reduction);
    println!("  Micro accuracy:     {:.4}", metrics.micro_accuracy);
    println!("  Macro accuracy:     {:.4}", metrics.macro_accuracy);
    if let (Some(k), Some(acc)) = (metrics.top_k, metrics.top_k_accuracy) {
        println!("  Top-{k} accuracy:     {acc:.4}");
    }
    println!("  Per-class log-loss:");
    for ((label, loss), support) in fitted
        .vocabulary()
        .iter()
        .zip(&metrics.per_class_log_loss)
        .zip(&metrics.support)
    {
        println!("    {label:<30} {loss:.4}  (n={support})");
    }
}

fn print_prediction(fitted: &FittedPipeline, result: &PredictionResult, top: usize) {
    let scores = result
        .top_k(top.max(1))
        .into_iter()
        .filter_map(|(key, score)| {
            fitted
                .vocabulary()
                .get(key)
                .map(|label| format!("{label}={score:.3}"))
        })
        .collect::<Vec<_>>()
        .join(" ");
    println!(
        "  {} -> {} [{}]",
        result.path.display(),
        result.predicted_label.cyan(),
        scores
    );
}
