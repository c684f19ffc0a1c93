//! The concrete pipeline stages.
//!
//! `load_images` -> `extract_pixels` -> `score_features` -> `classify` ->
//! `map_key_to_value`

use std::sync::Arc;

use rayon::prelude::*;
use transfer_core::{argmax, Embedding, Error, PixelTensor, Result};
use transfer_dataset::{ImageLoader, ImagePreprocessor};
use transfer_features::FeatureExtractor;
use transfer_training::{LabelCodec, LinearClassifier};

use crate::stage::{required, Column, Row, Stage};

/// ImagePath -> RawImage
pub struct LoadImages {
    loader: ImageLoader,
}

impl LoadImages {
    pub fn new(loader: ImageLoader) -> Self {
        Self { loader }
    }
}

impl Stage for LoadImages {
    fn name(&self) -> &str {
        "load_images"
    }

    fn input(&self) -> Column {
        Column::ImagePath
    }

    fn output(&self) -> Column {
        Column::RawImage
    }

    fn apply(&self, rows: Vec<Row>) -> Result<Vec<Row>> {
        rows.into_par_iter()
            .map(|mut row| {
                row.raw = Some(self.loader.load_bytes(&row.record.path)?);
                Ok(row)
            })
            .collect()
    }
}

/// RawImage -> Pixels
pub struct ExtractPixels {
    preprocessor: ImagePreprocessor,
}

impl ExtractPixels {
    pub fn new(preprocessor: ImagePreprocessor) -> Self {
        Self { preprocessor }
    }
}

impl Stage for ExtractPixels {
    fn name(&self) -> &str {
        "extract_pixels"
    }

    fn input(&self) -> Column {
        Column::RawImage
    }

    fn output(&self) -> Column {
        Column::Pixels
    }

    fn apply(&self, rows: Vec<Row>) -> Result<Vec<Row>> {
        rows.into_par_iter()
            .map(|mut row| {
                let bytes = required(&row.raw, Column::RawImage, &row)?;
                let pixels = self.preprocessor.resize_and_extract(bytes).map_err(|e| match e {
                    Error::Decode(msg) => {
                        Error::Decode(format!("{}: {msg}", row.record.path.display()))
                    }
                    other => other,
                })?;
                // Bytes are no longer needed once decoded
                row.raw = None;
                row.pixels = Some(pixels);
                Ok(row)
            })
            .collect()
    }
}

/// Pixels -> Features, scored in batches
pub struct ScoreFeatures {
    extractor: Arc<dyn FeatureExtractor>,
    batch_size: usize,
}

impl ScoreFeatures {
    pub fn new(extractor: Arc<dyn FeatureExtractor>, batch_size: usize) -> Self {
        Self {
            extractor,
            batch_size: batch_size.max(1),
        }
    }
}

impl Stage for ScoreFeatures {
    fn name(&self) -> &str {
        "score_features"
    }

    fn input(&self) -> Column {
        Column::Pixels
    }

    fn output(&self) -> Column {
        Column::Features
    }

    fn apply(&self, mut rows: Vec<Row>) -> Result<Vec<Row>> {
        for chunk in rows.chunks_mut(self.batch_size) {
            let batch: Vec<PixelTensor> = chunk
                .iter()
                .map(|row| required(&row.pixels, Column::Pixels, row).cloned())
                .collect::<Result<_>>()?;

            let embeddings = self.extractor.score(&batch)?;
            if embeddings.len() != chunk.len() {
                return Err(Error::Model(format!(
                    "Extractor returned {} embeddings for {} images",
                    embeddings.len(),
                    chunk.len()
                )));
            }

            for (row, embedding) in chunk.iter_mut().zip(embeddings) {
                row.pixels = None;
                row.features = Some(embedding);
            }
        }
        Ok(rows)
    }
}

/// Features -> Scores
pub struct Classify {
    classifier: Arc<LinearClassifier>,
}

impl Classify {
    pub fn new(classifier: Arc<LinearClassifier>) -> Self {
        Self { classifier }
    }
}

impl Stage for Classify {
    fn name(&self) -> &str {
        "classify"
    }

    fn input(&self) -> Column {
        Column::Features
    }

    fn output(&self) -> Column {
        Column::Scores
    }

    fn apply(&self, mut rows: Vec<Row>) -> Result<Vec<Row>> {
        let features: Vec<Embedding> = rows
            .iter()
            .map(|row| required(&row.features, Column::Features, row).cloned())
            .collect::<Result<_>>()?;

        let probabilities = self.classifier.predict_proba(&features)?;
        for (row, scores) in rows.iter_mut().zip(probabilities) {
            row.scores = Some(scores);
        }
        Ok(rows)
    }
}

/// Scores -> PredictedLabel
pub struct MapKeyToValue {
    codec: Arc<LabelCodec>,
}

impl MapKeyToValue {
    pub fn new(codec: Arc<LabelCodec>) -> Self {
        Self { codec }
    }
}

impl Stage for MapKeyToValue {
    fn name(&self) -> &str {
        "map_key_to_value"
    }

    fn input(&self) -> Column {
        Column::Scores
    }

    fn output(&self) -> Column {
        Column::PredictedLabel
    }

    fn apply(&self, mut rows: Vec<Row>) -> Result<Vec<Row>> {
        for row in rows.iter_mut() {
            let key = argmax(required(&row.scores, Column::Scores, row)?);
            row.predicted_label = Some(self.codec.decode(key)?.to_string());
        }
        Ok(rows)
    }
}
