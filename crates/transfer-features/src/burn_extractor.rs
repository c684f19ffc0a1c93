//! Feature extraction with a burn backbone loaded from a record file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor, TensorData},
};
use tracing::{debug, info};
use transfer_core::{
    BackboneArchitecture, ChannelOrder, Embedding, Error, ImageDimensions, PixelConfig,
    PixelTensor, Result,
};

use crate::{check_input, Backbone, FeatureExtractor};

/// Frozen burn backbone exposed as a [`FeatureExtractor`]
pub struct BurnFeatureExtractor<B: Backend> {
    name: String,
    // Burn modules are Send but not Sync; the lock is only held to clone.
    backbone: Mutex<Backbone<B>>,
    device: B::Device,
    input: ImageDimensions,
    order: ChannelOrder,
    embedding_dim: usize,
}

impl<B: Backend> BurnFeatureExtractor<B> {
    /// Wraps an already initialized backbone
    pub fn new(backbone: Backbone<B>, pixels: &PixelConfig, device: B::Device) -> Self {
        Self {
            name: backbone.architecture().to_string(),
            embedding_dim: backbone.embedding_dim(),
            backbone: Mutex::new(backbone),
            device,
            input: pixels.dimensions(),
            order: pixels.channel_order,
        }
    }

    /// Loads backbone weights saved with [`CompactRecorder`]
    pub fn load(
        architecture: BackboneArchitecture,
        weights_path: &Path,
        pixels: &PixelConfig,
        device: B::Device,
    ) -> Result<Self> {
        let record_path = resolve_record_path(weights_path).ok_or_else(|| {
            Error::ModelLoad(format!(
                "Weights file not found: {}",
                weights_path.display()
            ))
        })?;

        info!("Loading {} weights from {}", architecture, record_path.display());
        let recorder = CompactRecorder::new();
        let backbone = Backbone::<B>::new(architecture, &device)
            .load_file(record_path.clone(), &recorder, &device)
            .map_err(|e| {
                Error::ModelLoad(format!(
                    "Failed to load {}: {:?}",
                    record_path.display(),
                    e
                ))
            })?;

        let mut extractor = Self::new(backbone, pixels, device);
        extractor.name = format!("{}:{}", architecture, record_path.display());
        Ok(extractor)
    }

    fn backbone(&self) -> Result<Backbone<B>> {
        self.backbone
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| Error::Model("Backbone lock poisoned".to_string()))
    }

    /// Stacks the batch into one `[n, 3, h, w]` tensor
    fn stack(&self, batch: &[PixelTensor]) -> Tensor<B, 4> {
        let n = batch.len();
        let h = self.input.height as usize;
        let w = self.input.width as usize;
        let c = self.input.channels as usize;

        let mut values = Vec::with_capacity(n * self.input.num_values());
        for tensor in batch {
            values.extend_from_slice(tensor.as_slice());
        }

        match self.order {
            ChannelOrder::Interleaved => {
                Tensor::<B, 4>::from_data(TensorData::new(values, [n, h, w, c]), &self.device)
                    .permute([0, 3, 1, 2])
            }
            ChannelOrder::Planar => {
                Tensor::<B, 4>::from_data(TensorData::new(values, [n, c, h, w]), &self.device)
            }
        }
    }
}

/// `CompactRecorder` appends `.mpk` itself, so both spellings are accepted
fn resolve_record_path(path: &Path) -> Option<PathBuf> {
    let with_extension = path.with_extension("mpk");
    if with_extension.is_file() {
        Some(with_extension)
    } else {
        None
    }
}

impl<B: Backend> FeatureExtractor for BurnFeatureExtractor<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_dimensions(&self) -> ImageDimensions {
        self.input
    }

    fn channel_order(&self) -> ChannelOrder {
        self.order
    }

    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn score(&self, batch: &[PixelTensor]) -> Result<Vec<Embedding>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        for tensor in batch {
            check_input(self.input, self.order, tensor)?;
        }

        let backbone = self.backbone()?;
        let output = backbone.forward(self.stack(batch));
        let [rows, width] = output.dims();
        if rows != batch.len() || width != self.embedding_dim {
            return Err(Error::Model(format!(
                "Backbone produced [{rows}, {width}], expected [{}, {}]",
                batch.len(),
                self.embedding_dim
            )));
        }

        let values = output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| Error::Model(format!("Failed to read embeddings: {e:?}")))?;
        debug!("Scored batch of {} images", rows);

        Ok(values
            .chunks(width)
            .map(|row| Embedding::new(row.to_vec()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn small_pixels(order: ChannelOrder) -> PixelConfig {
        PixelConfig {
            width: 32,
            height: 32,
            channel_order: order,
            ..PixelConfig::default()
        }
    }

    fn gradient_tensor(pixels: &PixelConfig, seed: f32) -> PixelTensor {
        let dims = pixels.dimensions();
        let values = (0..dims.num_values())
            .map(|i| ((i as f32 * 0.37 + seed) % 255.0) - 117.0)
            .collect();
        PixelTensor::new(values, dims, pixels.channel_order).unwrap()
    }

    #[test]
    fn test_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("resnet18");
        let device = Default::default();
        let pixels = small_pixels(ChannelOrder::Planar);

        let backbone = Backbone::<TestBackend>::new(BackboneArchitecture::ResNet18, &device);
        backbone
            .clone()
            .save_file(weights.clone(), &CompactRecorder::new())
            .unwrap();
        let reference = BurnFeatureExtractor::new(backbone, &pixels, device);

        let loaded = BurnFeatureExtractor::<TestBackend>::load(
            BackboneArchitecture::ResNet18,
            &weights.with_extension("mpk"),
            &pixels,
            device,
        )
        .unwrap();

        let batch = vec![gradient_tensor(&pixels, 1.0), gradient_tensor(&pixels, 50.0)];
        let expected = reference.score(&batch).unwrap();
        let actual = loaded.score(&batch).unwrap();

        assert_eq!(actual.len(), 2);
        assert_eq!(actual[0].len(), 512);
        for (a, b) in actual.iter().zip(&expected) {
            for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
                assert!((x - y).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_missing_weights() {
        let result = BurnFeatureExtractor::<TestBackend>::load(
            BackboneArchitecture::ResNet18,
            Path::new("/nonexistent/weights.mpk"),
            &PixelConfig::default(),
            Default::default(),
        );
        assert!(matches!(result, Err(Error::ModelLoad(_))));
    }

    #[test]
    fn test_corrupt_weights() {
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("broken.mpk");
        std::fs::write(&weights, b"not a record").unwrap();

        let result = BurnFeatureExtractor::<TestBackend>::load(
            BackboneArchitecture::ResNet18,
            &weights,
            &PixelConfig::default(),
            Default::default(),
        );
        assert!(matches!(result, Err(Error::ModelLoad(_))));
    }

    #[test]
    fn test_interleaved_matches_planar() {
        let device = Default::default();
        let backbone = Backbone::<TestBackend>::new(BackboneArchitecture::ResNet18, &device);
        let planar_cfg = small_pixels(ChannelOrder::Planar);
        let interleaved_cfg = small_pixels(ChannelOrder::Interleaved);

        let planar = gradient_tensor(&planar_cfg, 3.0);
        let dims = planar_cfg.dimensions();
        let (h, w) = (dims.height as usize, dims.width as usize);
        let mut values = vec![0.0; dims.num_values()];
        for y in 0..h {
            for x in 0..w {
                for c in 0..3 {
                    values[(y * w + x) * 3 + c] = planar.get(y, x, c).unwrap();
                }
            }
        }
        let interleaved = PixelTensor::new(values, dims, ChannelOrder::Interleaved).unwrap();

        let a = BurnFeatureExtractor::new(backbone.clone(), &planar_cfg, device)
            .score(&[planar])
            .unwrap();
        let b = BurnFeatureExtractor::new(backbone, &interleaved_cfg, device)
            .score(&[interleaved])
            .unwrap();
        for (x, y) in a[0].as_slice().iter().zip(b[0].as_slice()) {
            assert!((x - y).abs() < 1e-4);
        }
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let device = Default::default();
        let backbone = Backbone::<TestBackend>::new(BackboneArchitecture::ResNet18, &device);
        let extractor =
            BurnFeatureExtractor::new(backbone, &small_pixels(ChannelOrder::Planar), device);

        let wrong = gradient_tensor(&PixelConfig::default(), 0.0);
        assert!(matches!(
            extractor.score(&[wrong]),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(extractor.score(&[]).unwrap().is_empty());
    }
}
