//! The feature extractor seam.

use std::sync::Arc;

use tracing::info;
use transfer_core::{
    default_device, ChannelOrder, DefaultBackend, Embedding, Error, ExtractorConfig,
    ImageDimensions, PixelConfig, PixelTensor, Result,
};

use crate::BurnFeatureExtractor;

/// A frozen network evaluated up to its penultimate layer.
///
/// Implementations never mutate their weights, so one instance can be shared
/// by every fitted pipeline built from it.
pub trait FeatureExtractor: Send + Sync {
    /// Stable identity of the network, used in memoization keys
    fn name(&self) -> &str;

    /// Shape every input tensor must have
    fn input_dimensions(&self) -> ImageDimensions;

    /// Channel layout the network reads
    fn channel_order(&self) -> ChannelOrder;

    /// Width of the produced embeddings
    fn embedding_dim(&self) -> usize;

    /// Scores a batch of tensors in one call; output order matches input order
    fn score(&self, batch: &[PixelTensor]) -> Result<Vec<Embedding>>;
}

/// Rejects tensors the network cannot consume
pub fn check_input(
    expected: ImageDimensions,
    order: ChannelOrder,
    tensor: &PixelTensor,
) -> Result<()> {
    if tensor.dimensions() != expected || tensor.order() != order {
        return Err(Error::ShapeMismatch {
            expected: format!("{expected} {order}"),
            actual: format!("{} {}", tensor.dimensions(), tensor.order()),
        });
    }
    Ok(())
}

/// Builds the configured extractor
pub fn load_extractor(
    config: &ExtractorConfig,
    pixels: &PixelConfig,
) -> Result<Arc<dyn FeatureExtractor>> {
    let extractor: Arc<dyn FeatureExtractor> = match config {
        ExtractorConfig::Burn {
            architecture,
            weights_path,
        } => Arc::new(BurnFeatureExtractor::<DefaultBackend>::load(
            *architecture,
            weights_path,
            pixels,
            default_device(),
        )?),
        #[cfg(feature = "onnx")]
        ExtractorConfig::Onnx {
            model_path,
            input_name,
            output_name,
            embedding_dim,
        } => Arc::new(crate::OnnxFeatureExtractor::load(
            model_path,
            input_name,
            output_name,
            *embedding_dim,
            pixels,
        )?),
        #[cfg(not(feature = "onnx"))]
        ExtractorConfig::Onnx { model_path, .. } => {
            return Err(Error::ModelLoad(format!(
                "{} is an ONNX model but ONNX support is not compiled in (enable the `onnx` feature)",
                model_path.display()
            )))
        }
    };

    info!(
        "Loaded feature extractor {} ({}-wide embeddings, input {})",
        extractor.name(),
        extractor.embedding_dim(),
        extractor.input_dimensions()
    );
    Ok(extractor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use transfer_core::BackboneArchitecture;

    #[test]
    fn test_check_input_rejects_wrong_shape() {
        let dims = ImageDimensions::new(2, 2, 3);
        let tensor = PixelTensor::new(vec![0.0; 12], dims, ChannelOrder::Interleaved).unwrap();

        assert!(check_input(dims, ChannelOrder::Interleaved, &tensor).is_ok());
        assert!(matches!(
            check_input(ImageDimensions::imagenet(), ChannelOrder::Interleaved, &tensor),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            check_input(dims, ChannelOrder::Planar, &tensor),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_load_extractor_missing_weights() {
        let config = ExtractorConfig::Burn {
            architecture: BackboneArchitecture::ResNet18,
            weights_path: PathBuf::from("/nonexistent/resnet18.mpk"),
        };
        let result = load_extractor(&config, &PixelConfig::default());
        assert!(matches!(result, Err(Error::ModelLoad(_))));
    }
}
