//! Transfer-learning classification pipeline.
//!
//! An unfitted [`Pipeline`] holds configuration and a shared frozen feature
//! extractor. Fitting it featurizes the labeled images, learns the label
//! vocabulary and trains the classifier, producing an independent
//! [`FittedPipeline`] that can transform new images and evaluate itself.

pub mod pipeline;
pub mod predictor;
pub mod stage;
pub mod stages;

pub use pipeline::{Evaluation, FittedPipeline, Pipeline};
pub use predictor::Predictor;
pub use stage::{Column, Row, Stage, StageChain};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::pipeline::{Evaluation, FittedPipeline, Pipeline};
    pub use crate::predictor::Predictor;
    pub use transfer_core::{ImageData, PipelineConfig, PredictionResult};
    pub use transfer_training::MulticlassMetrics;
}
