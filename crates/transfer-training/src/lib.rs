//! Training infrastructure for the classifier on top of frozen features.
//!
//! This crate provides:
//! - Label symbol <-> key translation
//! - An L-BFGS optimizer
//! - Multinomial logistic regression (maximum entropy) training
//! - Multiclass evaluation metrics

pub mod classifier;
pub mod codec;
pub mod evaluator;
pub mod lbfgs;

pub use classifier::{
    stable_softmax, ClassifierBackend, ClassifierTrainer, LinearClassifier, TrainingReport,
};
pub use codec::LabelCodec;
pub use evaluator::{Evaluator, MulticlassMetrics, LOG_LOSS_EPSILON};
pub use lbfgs::{Lbfgs, LbfgsConfig, Minimum, Objective};

/// Re-export commonly used types
pub mod prelude {
    pub use super::classifier::{ClassifierTrainer, LinearClassifier, TrainingReport};
    pub use super::codec::LabelCodec;
    pub use super::evaluator::{Evaluator, MulticlassMetrics};
}
