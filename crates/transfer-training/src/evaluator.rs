//! Multiclass evaluation.
//!
//! This module provides:
//! - Log-loss, overall and per class
//! - Log-loss reduction against the label-frequency prior
//! - Micro/macro accuracy and optional top-k accuracy
//! - Confusion matrix computation

use serde::{Deserialize, Serialize};
use tracing::info;
use transfer_core::{Error, PredictionResult, Result};

/// Probabilities are clamped to at least this value before taking the log
pub const LOG_LOSS_EPSILON: f64 = 1e-15;

/// Metrics over a labeled evaluation set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MulticlassMetrics {
    /// Mean of `-ln(p_true)`
    pub log_loss: f64,
    /// Mean log-loss over items of each class, 0.0 for classes with no items
    pub per_class_log_loss: Vec<f64>,
    /// `(prior - log_loss) / prior`, 0.0 when the prior log-loss is 0
    pub log_loss_reduction: f64,
    pub micro_accuracy: f64,
    /// Mean per-class accuracy over classes present in the data
    pub macro_accuracy: f64,
    pub top_k: Option<usize>,
    pub top_k_accuracy: Option<f64>,
    /// `[actual][predicted]`
    pub confusion_matrix: Vec<Vec<usize>>,
    /// Items per actual class
    pub support: Vec<usize>,
    pub num_samples: usize,
}

/// Computes [`MulticlassMetrics`] from predictions and true keys
#[derive(Debug, Clone)]
pub struct Evaluator {
    num_classes: usize,
    top_k: Option<usize>,
}

impl Evaluator {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            top_k: None,
        }
    }

    /// Also report top-k accuracy
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn evaluate(
        &self,
        predictions: &[PredictionResult],
        true_keys: &[usize],
    ) -> Result<MulticlassMetrics> {
        self.validate(predictions, true_keys)?;

        let n = predictions.len();
        let k = self.num_classes;
        let mut confusion_matrix = vec![vec![0usize; k]; k];
        let mut class_loss = vec![0.0f64; k];
        let mut support = vec![0usize; k];
        let mut total_loss = 0.0;
        let mut top_k_hits = 0usize;

        for (prediction, &actual) in predictions.iter().zip(true_keys) {
            let loss = item_log_loss(prediction.scores[actual]);
            total_loss += loss;
            class_loss[actual] += loss;
            support[actual] += 1;
            confusion_matrix[actual][prediction.predicted_key()] += 1;

            if let Some(top) = self.top_k {
                if prediction.top_k(top).iter().any(|&(key, _)| key == actual) {
                    top_k_hits += 1;
                }
            }
        }

        let log_loss = total_loss / n as f64;
        let per_class_log_loss: Vec<f64> = class_loss
            .iter()
            .zip(&support)
            .map(|(&loss, &count)| if count == 0 { 0.0 } else { loss / count as f64 })
            .collect();

        let prior = prior_log_loss(&support, n);
        let log_loss_reduction = if prior > 0.0 {
            (prior - log_loss) / prior
        } else {
            0.0
        };

        let correct: usize = (0..k).map(|c| confusion_matrix[c][c]).sum();
        let micro_accuracy = correct as f64 / n as f64;
        let present: Vec<usize> = (0..k).filter(|&c| support[c] > 0).collect();
        let macro_accuracy = present
            .iter()
            .map(|&c| confusion_matrix[c][c] as f64 / support[c] as f64)
            .sum::<f64>()
            / present.len() as f64;

        let metrics = MulticlassMetrics {
            log_loss,
            per_class_log_loss,
            log_loss_reduction,
            micro_accuracy,
            macro_accuracy,
            top_k: self.top_k,
            top_k_accuracy: self.top_k.map(|_| top_k_hits as f64 / n as f64),
            confusion_matrix,
            support,
            num_samples: n,
        };

        info!(
            "Evaluation complete: log_loss={:.4}, micro_accuracy={:.4}, macro_accuracy={:.4}",
            metrics.log_loss, metrics.micro_accuracy, metrics.macro_accuracy
        );
        Ok(metrics)
    }

    fn validate(&self, predictions: &[PredictionResult], true_keys: &[usize]) -> Result<()> {
        if predictions.is_empty() {
            return Err(Error::InvalidArgument(
                "Cannot evaluate an empty prediction set".to_string(),
            ));
        }
        if predictions.len() != true_keys.len() {
            return Err(Error::InvalidArgument(format!(
                "{} predictions but {} true labels",
                predictions.len(),
                true_keys.len()
            )));
        }
        if let Some(&key) = true_keys.iter().find(|&&key| key >= self.num_classes) {
            return Err(Error::UnknownKey(key));
        }
        if let Some(bad) = predictions
            .iter()
            .find(|p| p.scores.len() != self.num_classes)
        {
            return Err(Error::SchemaMismatch {
                expected: self.num_classes,
                actual: bad.scores.len(),
            });
        }
        Ok(())
    }
}

fn item_log_loss(probability: f32) -> f64 {
    -(probability as f64).clamp(LOG_LOSS_EPSILON, 1.0).ln()
}

/// Log-loss of always predicting the class frequencies
fn prior_log_loss(support: &[usize], n: usize) -> f64 {
    support
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / n as f64;
            -p * p.ln()
        })
        .sum()
}
