//! Configuration structures for the classification pipeline.
//!
//! Everything the pipeline needs is passed in explicitly through
//! [`PipelineConfig`]; there is no process-wide state.

use crate::types::{ChannelOrder, ImageDimensions};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for building, fitting and evaluating a pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Image folder and manifests
    pub data: DataConfig,
    /// Geometric normalization and pixel extraction
    pub pixels: PixelConfig,
    /// Frozen feature extractor
    pub extractor: ExtractorConfig,
    /// Linear classifier training
    pub classifier: ClassifierConfig,
    /// Runtime knobs
    pub runtime: RuntimeConfig,
}

impl PipelineConfig {
    /// Validates the whole configuration
    pub fn validate(&self) -> Result<()> {
        self.pixels.validate()?;
        self.classifier.validate()?;
        self.runtime.validate()?;
        Ok(())
    }
}

/// Data locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Folder that manifest paths are relative to
    pub image_root: PathBuf,
    /// Training manifest (`<path>\t<label>` per line)
    pub train_manifest: PathBuf,
    /// Held-out manifest for evaluation
    pub test_manifest: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            image_root: PathBuf::from("assets/images"),
            train_manifest: PathBuf::from("assets/images/tags.tsv"),
            test_manifest: None,
        }
    }
}

/// Pixel extraction settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PixelConfig {
    /// Target height in pixels
    pub height: u32,
    /// Target width in pixels
    pub width: u32,
    /// Layout expected by the frozen network
    pub channel_order: ChannelOrder,
    /// Subtracted from every raw channel value
    pub offset: f32,
    /// Multiplied after the offset is removed
    pub scale: f32,
}

impl Default for PixelConfig {
    fn default() -> Self {
        Self {
            height: 224,
            width: 224,
            channel_order: ChannelOrder::Interleaved,
            offset: 117.0,
            scale: 1.0,
        }
    }
}

impl PixelConfig {
    /// Output dimensions (always three channels)
    pub fn dimensions(&self) -> ImageDimensions {
        ImageDimensions::new(self.width, self.height, 3)
    }

    pub fn validate(&self) -> Result<()> {
        if self.height == 0 || self.width == 0 {
            return Err(Error::Config(format!(
                "Pixel dimensions must be non-zero, got {}x{}",
                self.height, self.width
            )));
        }
        if !self.offset.is_finite() || !self.scale.is_finite() {
            return Err(Error::Config(
                "Pixel offset and scale must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Backbone architecture for burn-based frozen extractors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackboneArchitecture {
    /// ResNet-18, 512-wide embedding
    #[default]
    #[serde(rename = "resnet18")]
    ResNet18,
    /// EfficientNet-B0, 1280-wide embedding
    #[serde(rename = "efficientnet_b0")]
    EfficientNetB0,
}

impl BackboneArchitecture {
    /// Width of the penultimate activations
    pub fn embedding_dim(&self) -> usize {
        match self {
            BackboneArchitecture::ResNet18 => 512,
            BackboneArchitecture::EfficientNetB0 => 1280,
        }
    }
}

impl std::fmt::Display for BackboneArchitecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackboneArchitecture::ResNet18 => write!(f, "resnet18"),
            BackboneArchitecture::EfficientNetB0 => write!(f, "efficientnet_b0"),
        }
    }
}

/// Frozen network configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorConfig {
    /// Burn backbone loaded from a record file
    Burn {
        architecture: BackboneArchitecture,
        weights_path: PathBuf,
    },
    /// ONNX graph with named input and output tensors
    Onnx {
        model_path: PathBuf,
        input_name: String,
        output_name: String,
        embedding_dim: usize,
    },
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig::Burn {
            architecture: BackboneArchitecture::ResNet18,
            weights_path: PathBuf::from("assets/backbone/resnet18.mpk"),
        }
    }
}

/// L-BFGS maximum-entropy classifier settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// L2 penalty on the weights (bias is not penalized)
    pub l2_weight: f64,
    /// Relative loss improvement / gradient norm that counts as converged
    pub tolerance: f64,
    /// Number of correction pairs kept by L-BFGS
    pub history_size: usize,
    /// Iteration cap
    pub max_iterations: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            l2_weight: 0.01,
            tolerance: 1e-7,
            history_size: 20,
            max_iterations: 100,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.l2_weight >= 0.0) {
            return Err(Error::Config(format!(
                "l2_weight must be non-negative, got {}",
                self.l2_weight
            )));
        }
        if !(self.tolerance > 0.0) {
            return Err(Error::Config(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.history_size == 0 {
            return Err(Error::Config("history_size must be at least 1".to_string()));
        }
        if self.max_iterations == 0 {
            return Err(Error::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Images scored per network call
    pub batch_size: usize,
    /// Memoize embeddings by tensor content
    pub cache_features: bool,
    /// Most embeddings kept in memory; the oldest are dropped first
    pub cache_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            cache_features: false,
            cache_capacity: 4096,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.cache_features && self.cache_capacity == 0 {
            return Err(Error::Config(
                "cache_capacity must be at least 1 when cache_features is on".to_string(),
            ));
        }
        Ok(())
    }
}
