//! Multinomial logistic regression on frozen embeddings.
//!
//! Objective: mean negative log-likelihood of the softmax model plus
//! `0.5 * l2_weight * ||W||^2` (the bias is not penalized). Loss, gradient and
//! probabilities are computed with burn tensors; the flat parameter vector is
//! optimized with L-BFGS.

use burn::tensor::{backend::Backend, ElementConversion, Tensor, TensorData};
use serde::{Deserialize, Serialize};
use tracing::info;
use transfer_core::{ClassifierConfig, Embedding, Error, Result};

use crate::lbfgs::{Lbfgs, LbfgsConfig, Objective};

/// Backend for classifier math; double precision keeps the line search stable
pub type ClassifierBackend = burn_ndarray::NdArray<f64>;

/// Summary of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub iterations: usize,
    pub final_loss: f64,
    /// False when the optimizer stopped at its iteration cap
    pub converged: bool,
    pub num_examples: usize,
    pub num_classes: usize,
    pub feature_dim: usize,
}

/// Fitted weights: `weights` is `[feature_dim, num_classes]` row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifier {
    weights: Vec<f64>,
    bias: Vec<f64>,
    feature_dim: usize,
    num_classes: usize,
}

impl LinearClassifier {
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn bias(&self) -> &[f64] {
        &self.bias
    }

    /// Class probabilities for each embedding, on the default device
    pub fn predict_proba(&self, features: &[Embedding]) -> Result<Vec<Vec<f32>>> {
        self.predict_proba_on::<ClassifierBackend>(features, &Default::default())
    }

    /// Class probabilities for each embedding; every row sums to one
    pub fn predict_proba_on<B: Backend>(
        &self,
        features: &[Embedding],
        device: &B::Device,
    ) -> Result<Vec<Vec<f32>>> {
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let x = feature_matrix::<B>(features, self.feature_dim, device)?;
        let w = Tensor::<B, 2>::from_data(
            TensorData::new(self.weights.clone(), [self.feature_dim, self.num_classes]),
            device,
        );
        let b = Tensor::<B, 2>::from_data(
            TensorData::new(self.bias.clone(), [1, self.num_classes]),
            device,
        );

        let probs = stable_softmax(x.matmul(w) + b);
        let values: Vec<f32> = probs.into_data().iter::<f32>().collect();
        Ok(values
            .chunks(self.num_classes)
            .map(|row| row.to_vec())
            .collect())
    }
}

/// Row-wise softmax with the row maximum subtracted first
pub fn stable_softmax<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 2> {
    let max = logits.clone().max_dim(1);
    let exp = (logits - max).exp();
    let sum = exp.clone().sum_dim(1);
    exp / sum
}

/// Stacks embeddings into `[n, width]`, rejecting any other width
fn feature_matrix<B: Backend>(
    features: &[Embedding],
    width: usize,
    device: &B::Device,
) -> Result<Tensor<B, 2>> {
    let mut values = Vec::with_capacity(features.len() * width);
    for embedding in features {
        if embedding.len() != width {
            return Err(Error::SchemaMismatch {
                expected: width,
                actual: embedding.len(),
            });
        }
        values.extend(embedding.as_slice().iter().map(|&v| v as f64));
    }
    Ok(Tensor::from_data(
        TensorData::new(values, [features.len(), width]),
        device,
    ))
}

/// Penalized softmax cross-entropy over a fixed training set
struct SoftmaxObjective<B: Backend> {
    features: Tensor<B, 2>,
    targets: Tensor<B, 2>,
    num_examples: usize,
    feature_dim: usize,
    num_classes: usize,
    l2_weight: f64,
    device: B::Device,
}

impl<B: Backend> SoftmaxObjective<B> {
    fn split(&self, params: &[f64]) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let (w, b) = params.split_at(self.feature_dim * self.num_classes);
        let w = Tensor::from_data(
            TensorData::new(w.to_vec(), [self.feature_dim, self.num_classes]),
            &self.device,
        );
        let b = Tensor::from_data(TensorData::new(b.to_vec(), [1, self.num_classes]), &self.device);
        (w, b)
    }
}

impl<B: Backend> Objective for SoftmaxObjective<B> {
    fn dimension(&self) -> usize {
        (self.feature_dim + 1) * self.num_classes
    }

    fn evaluate(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        let n = self.num_examples as f64;
        let (w, b) = self.split(params);

        let logits = self.features.clone().matmul(w.clone()) + b;
        let shifted = logits.clone() - logits.max_dim(1);
        let log_norm = shifted.clone().exp().sum_dim(1).log();
        let log_probs = shifted - log_norm;

        let nll = (self.targets.clone() * log_probs.clone()).sum().neg() / n;
        let penalty = w.clone().powf_scalar(2.0).sum() * (0.5 * self.l2_weight);
        let loss: f64 = (nll + penalty).into_scalar().elem();

        let residual = (log_probs.exp() - self.targets.clone()) / n;
        let grad_w = self.features.clone().transpose().matmul(residual.clone())
            + w * self.l2_weight;
        let grad_b = residual.sum_dim(0);

        let mut grad: Vec<f64> = grad_w.into_data().iter::<f64>().collect();
        grad.extend(grad_b.into_data().iter::<f64>());
        Ok((loss, grad))
    }
}

/// Fits a [`LinearClassifier`] with L-BFGS
pub struct ClassifierTrainer<B: Backend = ClassifierBackend> {
    config: ClassifierConfig,
    device: B::Device,
}

impl ClassifierTrainer<ClassifierBackend> {
    pub fn new(config: ClassifierConfig) -> Self {
        Self::with_device(config, Default::default())
    }
}

impl<B: Backend> ClassifierTrainer<B> {
    pub fn with_device(config: ClassifierConfig, device: B::Device) -> Self {
        Self { config, device }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Trains on `features` with dense class `keys` in `0..num_classes`
    pub fn fit(
        &self,
        features: &[Embedding],
        keys: &[usize],
        num_classes: usize,
    ) -> Result<(LinearClassifier, TrainingReport)> {
        self.config.validate()?;
        if features.is_empty() {
            return Err(Error::Training("No training examples".to_string()));
        }
        if features.len() != keys.len() {
            return Err(Error::InvalidArgument(format!(
                "{} feature rows but {} labels",
                features.len(),
                keys.len()
            )));
        }
        if num_classes == 0 {
            return Err(Error::Training("At least one class is required".to_string()));
        }
        if let Some(&key) = keys.iter().find(|&&k| k >= num_classes) {
            return Err(Error::UnknownKey(key));
        }

        let feature_dim = features[0].len();
        if feature_dim == 0 {
            return Err(Error::Training("Embeddings are empty".to_string()));
        }
        let n = features.len();

        let mut one_hot = vec![0.0f64; n * num_classes];
        for (row, &key) in keys.iter().enumerate() {
            one_hot[row * num_classes + key] = 1.0;
        }

        let objective = SoftmaxObjective::<B> {
            features: feature_matrix::<B>(features, feature_dim, &self.device)?,
            targets: Tensor::from_data(TensorData::new(one_hot, [n, num_classes]), &self.device),
            num_examples: n,
            feature_dim,
            num_classes,
            l2_weight: self.config.l2_weight,
            device: self.device.clone(),
        };

        info!(
            "Training classifier: {} examples, {} features, {} classes",
            n, feature_dim, num_classes
        );
        let optimizer = Lbfgs::new(LbfgsConfig::from(&self.config));
        let minimum = optimizer.minimize(&objective, vec![0.0; objective.dimension()])?;

        let report = TrainingReport {
            iterations: minimum.iterations,
            final_loss: minimum.loss,
            converged: minimum.converged,
            num_examples: n,
            num_classes,
            feature_dim,
        };
        info!(
            "Classifier trained in {} iterations (loss {:.6}, converged: {})",
            report.iterations, report.final_loss, report.converged
        );

        let mut weights = minimum.params;
        let bias = weights.split_off(feature_dim * num_classes);
        Ok((
            LinearClassifier {
                weights,
                bias,
                feature_dim,
                num_classes,
            },
            report,
        ))
    }
}
