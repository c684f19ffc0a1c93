//! Frozen feature extraction.
//!
//! A pretrained network is evaluated up to its penultimate layer and the
//! resulting activations are used as fixed features for a downstream
//! classifier. Weights are loaded once and never updated.

pub mod backbone;
pub mod burn_extractor;
pub mod cache;
pub mod extractor;
#[cfg(feature = "onnx")]
pub mod onnx;

pub use backbone::{Backbone, EfficientNetB0Backbone, ResNet18Backbone};
pub use burn_extractor::BurnFeatureExtractor;
pub use cache::{CachedExtractor, DEFAULT_CACHE_CAPACITY};
pub use extractor::{check_input, load_extractor, FeatureExtractor};
#[cfg(feature = "onnx")]
pub use onnx::OnnxFeatureExtractor;
