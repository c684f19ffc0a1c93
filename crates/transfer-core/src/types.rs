//! Core type definitions for transfer-learning image classification.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One manifest row or ad-hoc prediction request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    /// Resolvable path to the image file
    pub path: PathBuf,
    /// Class label, absent for inference-only records
    pub label: Option<String>,
}

impl ImageData {
    /// Creates a labeled record
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            path: path.into(),
            label: if label.is_empty() { None } else { Some(label) },
        }
    }

    /// Creates a record without a label
    pub fn unlabeled(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            label: None,
        }
    }

    /// Label, if present
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Memory layout of channel values inside a [`PixelTensor`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    /// R,G,B,R,G,B,... (height, width, channels)
    #[default]
    Interleaved,
    /// All R, then all G, then all B (channels, height, width)
    Planar,
}

impl std::fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelOrder::Interleaved => write!(f, "interleaved"),
            ChannelOrder::Planar => write!(f, "planar"),
        }
    }
}

/// Image dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageDimensions {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Number of channels (3 for RGB)
    pub channels: u32,
}

impl ImageDimensions {
    /// Creates new image dimensions
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Standard ImageNet dimensions (224x224x3)
    pub fn imagenet() -> Self {
        Self::new(224, 224, 3)
    }

    /// Total number of values in one image tensor
    pub fn num_values(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

impl std::fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Dense float pixel values of one preprocessed image.
///
/// The logical shape is always `[height, width, channels]`; `order` tells how
/// the values are laid out in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelTensor {
    data: Vec<f32>,
    dimensions: ImageDimensions,
    order: ChannelOrder,
}

impl PixelTensor {
    /// Wraps raw values, checking that the length matches the dimensions
    pub fn new(
        data: Vec<f32>,
        dimensions: ImageDimensions,
        order: ChannelOrder,
    ) -> crate::Result<Self> {
        if data.len() != dimensions.num_values() {
            return Err(crate::Error::ShapeMismatch {
                expected: format!("{} values for {}", dimensions.num_values(), dimensions),
                actual: format!("{} values", data.len()),
            });
        }
        Ok(Self {
            data,
            dimensions,
            order,
        })
    }

    pub fn dimensions(&self) -> ImageDimensions {
        self.dimensions
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Value at row `y`, column `x`, channel `c`, independent of layout
    pub fn get(&self, y: usize, x: usize, c: usize) -> Option<f32> {
        let h = self.dimensions.height as usize;
        let w = self.dimensions.width as usize;
        let ch = self.dimensions.channels as usize;
        if y >= h || x >= w || c >= ch {
            return None;
        }
        let idx = match self.order {
            ChannelOrder::Interleaved => (y * w + x) * ch + c,
            ChannelOrder::Planar => c * h * w + y * w + x,
        };
        self.data.get(idx).copied()
    }
}

/// Fixed-length feature vector produced by the frozen network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Result of classifying one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Path of the classified image
    pub path: PathBuf,
    /// Vocabulary entry at argmax(scores)
    pub predicted_label: String,
    /// Probability per vocabulary key, sums to 1
    pub scores: Vec<f32>,
}

impl PredictionResult {
    /// Key of the highest score (first one on ties)
    pub fn predicted_key(&self) -> usize {
        argmax(&self.scores)
    }

    /// Highest score
    pub fn confidence(&self) -> f32 {
        self.scores
            .get(self.predicted_key())
            .copied()
            .unwrap_or(0.0)
    }

    /// The `k` best keys with their scores, best first
    pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
        let mut indexed: Vec<(usize, f32)> = self.scores.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        indexed.truncate(k);
        indexed
    }
}

/// Index of the largest value, first one on ties, 0 for an empty slice
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_data_empty_label_is_absent() {
        let record = ImageData::new("a.jpg", "");
        assert!(record.label().is_none());

        let record = ImageData::new("a.jpg", "cat");
        assert_eq!(record.label(), Some("cat"));
    }

    #[test]
    fn test_image_dimensions() {
        let dims = ImageDimensions::imagenet();
        assert_eq!(dims.width, 224);
        assert_eq!(dims.height, 224);
        assert_eq!(dims.channels, 3);
        assert_eq!(dims.num_values(), 224 * 224 * 3);
        assert_eq!(dims.to_string(), "224x224x3");
    }

    #[test]
    fn test_pixel_tensor_length_checked() {
        let dims = ImageDimensions::new(2, 2, 3);
        let result = PixelTensor::new(vec![0.0; 11], dims, ChannelOrder::Interleaved);
        assert!(matches!(result, Err(crate::Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_pixel_tensor_layouts_agree() {
        let dims = ImageDimensions::new(2, 1, 3);
        // pixel 0 = (1,2,3), pixel 1 = (4,5,6)
        let interleaved =
            PixelTensor::new(vec![1., 2., 3., 4., 5., 6.], dims, ChannelOrder::Interleaved)
                .unwrap();
        let planar =
            PixelTensor::new(vec![1., 4., 2., 5., 3., 6.], dims, ChannelOrder::Planar).unwrap();

        for x in 0..2 {
            for c in 0..3 {
                assert_eq!(interleaved.get(0, x, c), planar.get(0, x, c));
            }
        }
        assert_eq!(interleaved.get(0, 2, 0), None);
    }

    #[test]
    fn test_prediction_result_argmax() {
        let result = PredictionResult {
            path: PathBuf::from("toaster3.jpg"),
            predicted_label: "toaster".to_string(),
            scores: vec![0.1, 0.7, 0.2],
        };
        assert_eq!(result.predicted_key(), 1);
        assert_eq!(result.confidence(), 0.7);
        assert_eq!(result.top_k(2), vec![(1, 0.7), (2, 0.2)]);
    }

    #[test]
    fn test_argmax_ties_pick_first() {
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_channel_order_display() {
        assert_eq!(ChannelOrder::Interleaved.to_string(), "interleaved");
        assert_eq!(ChannelOrder::Planar.to_string(), "planar");
    }
}
