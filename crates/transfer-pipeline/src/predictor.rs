//! Single-image inference.

use std::path::Path;

use tracing::debug;
use transfer_core::{ImageData, PredictionResult, Result};

use crate::FittedPipeline;

/// Classifies one image at a time with a fitted pipeline.
///
/// Holds no state of its own, so any number of predictors can share one
/// pipeline.
#[derive(Clone, Copy)]
pub struct Predictor<'a> {
    pipeline: &'a FittedPipeline,
}

impl<'a> Predictor<'a> {
    pub fn new(pipeline: &'a FittedPipeline) -> Self {
        Self { pipeline }
    }

    /// Any label on `record` is ignored
    pub fn predict(&self, record: &ImageData) -> Result<PredictionResult> {
        let result = self.pipeline.transform_one(record)?;
        debug!(
            "{} -> {} ({:.3})",
            result.path.display(),
            result.predicted_label,
            result.confidence()
        );
        Ok(result)
    }

    pub fn predict_path(&self, path: impl AsRef<Path>) -> Result<PredictionResult> {
        self.predict(&ImageData::unlabeled(path.as_ref()))
    }

    /// Labels ordered by key, matching the score vector
    pub fn labels(&self) -> &'a [String] {
        self.pipeline.vocabulary()
    }
}
