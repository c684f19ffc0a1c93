//! Backend selection for the Burn framework.
//!
//! The frozen network only runs forward passes and the classifier computes its
//! own gradients, so no autodiff backend is needed. NdArray keeps everything on
//! the CPU and deterministic.

use burn::tensor::backend::Backend;

/// Backend used for feature extraction and classifier math
pub type DefaultBackend = burn_ndarray::NdArray<f32>;

/// Get the default device for [`DefaultBackend`]
pub fn default_device() -> <DefaultBackend as Backend>::Device {
    <DefaultBackend as Backend>::Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    "NdArray (CPU)"
}
