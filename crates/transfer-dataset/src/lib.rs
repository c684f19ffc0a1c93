//! Dataset access for transfer-learning image classification.
//!
//! This crate reads tab-separated image manifests, loads image bytes from
//! disk and turns them into fixed-size pixel tensors for the frozen network.

pub mod loader;
pub mod manifest;
pub mod preprocess;

pub use loader::ImageLoader;
pub use manifest::{ManifestRecords, TaggedImageReader};
pub use preprocess::ImagePreprocessor;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::loader::*;
    pub use crate::manifest::*;
    pub use crate::preprocess::*;
}
