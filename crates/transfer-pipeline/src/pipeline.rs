//! Unfitted and fitted pipelines.
//!
//! [`Pipeline::fit`] never mutates the pipeline: every call returns a fresh,
//! independent [`FittedPipeline`]. A fitted pipeline has no `fit` method, so
//! re-fitting means fitting the unfitted [`Pipeline`] again.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use transfer_core::{Error, ImageData, PipelineConfig, PredictionResult, Result};
use transfer_dataset::{ImageLoader, ImagePreprocessor, TaggedImageReader};
use transfer_features::{load_extractor, CachedExtractor, FeatureExtractor};
use transfer_training::{
    ClassifierTrainer, Evaluator, LabelCodec, LinearClassifier, MulticlassMetrics,
    TrainingReport,
};

use crate::stage::{Row, Stage, StageChain};
use crate::stages::{Classify, ExtractPixels, LoadImages, MapKeyToValue, ScoreFeatures};

/// Estimator: configuration plus a shared frozen network
pub struct Pipeline {
    config: PipelineConfig,
    extractor: Arc<dyn FeatureExtractor>,
}

impl Pipeline {
    /// Builds a pipeline around an already loaded extractor
    pub fn new(config: PipelineConfig, extractor: Arc<dyn FeatureExtractor>) -> Result<Self> {
        config.validate()?;

        let expected = config.pixels.dimensions();
        if extractor.input_dimensions() != expected
            || extractor.channel_order() != config.pixels.channel_order
        {
            return Err(Error::ShapeMismatch {
                expected: format!(
                    "{} {}",
                    extractor.input_dimensions(),
                    extractor.channel_order()
                ),
                actual: format!("{} {}", expected, config.pixels.channel_order),
            });
        }

        let extractor: Arc<dyn FeatureExtractor> = if config.runtime.cache_features {
            Arc::new(CachedExtractor::with_capacity(
                extractor,
                config.runtime.cache_capacity,
            ))
        } else {
            extractor
        };

        Ok(Self { config, extractor })
    }

    /// Loads the extractor named in the configuration
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let extractor = load_extractor(&config.extractor, &config.pixels)?;
        Self::new(config, extractor)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn extractor(&self) -> &Arc<dyn FeatureExtractor> {
        &self.extractor
    }

    /// ImagePath -> RawImage -> Pixels -> Features
    fn featurizer(&self) -> Result<StageChain> {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(LoadImages::new(ImageLoader::default())),
            Box::new(ExtractPixels::new(ImagePreprocessor::new(
                self.config.pixels.clone(),
            ))),
            Box::new(ScoreFeatures::new(
                self.extractor.clone(),
                self.config.runtime.batch_size,
            )),
        ];
        StageChain::new(stages)
    }

    /// Fits the label vocabulary and the classifier on labeled records
    ///
    /// Each call returns a new [`FittedPipeline`] that owns its own vocabulary and
    /// classifier. With `runtime.cache_features` set, all fitted pipelines from this
    /// pipeline share one [`CachedExtractor`]. Its memo is keyed by tensor content,
    /// so sharing it changes which images get rescored but never any prediction.
    pub fn fit(&self, records: &[ImageData]) -> Result<FittedPipeline> {
        if records.is_empty() {
            return Err(Error::Training("Cannot fit on an empty training set".to_string()));
        }
        let labels = records
            .iter()
            .map(|r| {
                r.label().ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "Training image {} has no label",
                        r.path.display()
                    ))
                })
            })
            .collect::<Result<Vec<&str>>>()?;

        let codec = LabelCodec::fit(&labels)?;
        let keys = labels
            .iter()
            .map(|l| codec.encode(l))
            .collect::<Result<Vec<usize>>>()?;
        info!(
            "Fitting on {} images with {} classes: {:?}",
            records.len(),
            codec.len(),
            codec.labels()
        );

        let rows = self.featurizer()?.run_records(records)?;
        let features = rows
            .into_iter()
            .map(|row| {
                row.features.ok_or_else(|| {
                    Error::Schema(format!("No features for {}", row.record.path.display()))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let trainer = ClassifierTrainer::new(self.config.classifier.clone());
        let (classifier, report) = trainer.fit(&features, &keys, codec.len())?;
        if !report.converged {
            warn!(
                "Classifier did not converge within {} iterations",
                self.config.classifier.max_iterations
            );
        }

        let codec = Arc::new(codec);
        let classifier = Arc::new(classifier);
        let head: Vec<Box<dyn Stage>> = vec![
            Box::new(Classify::new(classifier.clone())),
            Box::new(MapKeyToValue::new(codec.clone())),
        ];
        let chain = self.featurizer()?.extend(head)?;

        Ok(FittedPipeline {
            config: self.config.clone(),
            extractor: self.extractor.clone(),
            codec,
            classifier,
            report,
            chain,
        })
    }

    /// Fits on every record of a labeled manifest
    pub fn fit_manifest(&self, manifest: &Path) -> Result<FittedPipeline> {
        let records = TaggedImageReader::new(&self.config.data.image_root)
            .require_labels(true)
            .read_all(manifest)?;
        self.fit(&records)
    }
}

/// Predictions on a labeled set together with their metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub predictions: Vec<PredictionResult>,
    pub metrics: MulticlassMetrics,
}

/// Transformer produced by [`Pipeline::fit`]; immutable
pub struct FittedPipeline {
    config: PipelineConfig,
    extractor: Arc<dyn FeatureExtractor>,
    codec: Arc<LabelCodec>,
    classifier: Arc<LinearClassifier>,
    report: TrainingReport,
    chain: StageChain,
}

impl FittedPipeline {
    /// Labels ordered by key
    pub fn vocabulary(&self) -> &[String] {
        self.codec.labels()
    }

    pub fn codec(&self) -> &LabelCodec {
        &self.codec
    }

    pub fn classifier(&self) -> &LinearClassifier {
        &self.classifier
    }

    pub fn training_report(&self) -> &TrainingReport {
        &self.report
    }

    pub fn extractor(&self) -> &Arc<dyn FeatureExtractor> {
        &self.extractor
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.chain.stage_names()
    }

    /// Classifies every record; output order matches input order
    pub fn transform(&self, records: &[ImageData]) -> Result<Vec<PredictionResult>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        self.chain
            .run_records(records)?
            .into_iter()
            .map(into_prediction)
            .collect()
    }

    pub fn transform_one(&self, record: &ImageData) -> Result<PredictionResult> {
        self.transform(std::slice::from_ref(record))?
            .pop()
            .ok_or_else(|| Error::Model("No prediction produced".to_string()))
    }

    /// Classifies a manifest whose labels are optional
    pub fn transform_manifest(&self, manifest: &Path) -> Result<Vec<PredictionResult>> {
        let records = self.reader().read_all(manifest)?;
        self.transform(&records)
    }

    /// Log-loss and friends on labeled records
    pub fn evaluate(&self, records: &[ImageData]) -> Result<MulticlassMetrics> {
        Ok(self.evaluate_detailed(records)?.metrics)
    }

    pub fn evaluate_manifest(&self, manifest: &Path) -> Result<MulticlassMetrics> {
        Ok(self.evaluate_manifest_detailed(manifest)?.metrics)
    }

    pub fn evaluate_manifest_detailed(&self, manifest: &Path) -> Result<Evaluation> {
        let records = self.reader().require_labels(true).read_all(manifest)?;
        self.evaluate_detailed(&records)
    }

    /// Like [`Self::evaluate`], also returning the individual predictions
    pub fn evaluate_detailed(&self, records: &[ImageData]) -> Result<Evaluation> {
        // Labels are checked before any image is scored
        let true_keys = records
            .iter()
            .map(|r| match r.label() {
                Some(label) => self.codec.encode(label),
                None => Err(Error::InvalidArgument(format!(
                    "Evaluation image {} has no label",
                    r.path.display()
                ))),
            })
            .collect::<Result<Vec<usize>>>()?;

        let predictions = self.transform(records)?;
        let metrics = Evaluator::new(self.codec.len())
            .with_top_k(self.codec.len().min(5))
            .evaluate(&predictions, &true_keys)?;
        Ok(Evaluation {
            predictions,
            metrics,
        })
    }

    fn reader(&self) -> TaggedImageReader {
        TaggedImageReader::new(&self.config.data.image_root)
    }
}

fn into_prediction(row: Row) -> Result<PredictionResult> {
    let Row {
        record,
        scores,
        predicted_label,
        ..
    } = row;
    match (scores, predicted_label) {
        (Some(scores), Some(predicted_label)) => Ok(PredictionResult {
            path: record.path,
            predicted_label,
            scores,
        }),
        _ => Err(Error::Schema(format!(
            "Incomplete row for {}",
            record.path.display()
        ))),
    }
}
