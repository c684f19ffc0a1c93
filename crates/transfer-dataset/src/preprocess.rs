//! Geometric normalization and pixel extraction.
//!
//! Decodes image bytes, stretches the image to the configured size with a
//! bilinear filter and lays the channel values out the way the frozen network
//! expects them.

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use std::path::Path;
use transfer_core::{ChannelOrder, Error, ImageDimensions, PixelConfig, PixelTensor, Result};

/// Turns encoded images into [`PixelTensor`]s
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    config: PixelConfig,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(PixelConfig::default())
    }
}

impl ImagePreprocessor {
    /// Creates a new image preprocessor with the given configuration
    pub fn new(config: PixelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PixelConfig {
        &self.config
    }

    /// Shape of every tensor this preprocessor produces
    pub fn dimensions(&self) -> ImageDimensions {
        self.config.dimensions()
    }

    /// Decodes `bytes` and extracts a pixel tensor
    pub fn resize_and_extract(&self, bytes: &[u8]) -> Result<PixelTensor> {
        let image = image::load_from_memory(bytes)?;
        self.extract(&image)
    }

    /// Reads an image file and extracts a pixel tensor
    pub fn load_and_extract(&self, path: &Path) -> Result<PixelTensor> {
        let bytes = std::fs::read(path).map_err(|e| Error::read(path, e))?;
        self.resize_and_extract(&bytes)
    }

    /// Extracts a pixel tensor from an already decoded image
    pub fn extract(&self, image: &DynamicImage) -> Result<PixelTensor> {
        let rgb = image.to_rgb8();
        let resized = self.resize(rgb);
        let values = self.layout(&resized);
        PixelTensor::new(values, self.dimensions(), self.config.channel_order)
    }

    fn resize(&self, image: RgbImage) -> RgbImage {
        let (width, height) = image.dimensions();
        if width == self.config.width && height == self.config.height {
            return image;
        }
        image::imageops::resize(
            &image,
            self.config.width,
            self.config.height,
            FilterType::Triangle,
        )
    }

    fn layout(&self, image: &RgbImage) -> Vec<f32> {
        let offset = self.config.offset;
        let scale = self.config.scale;
        let convert = |raw: u8| (raw as f32 - offset) * scale;

        match self.config.channel_order {
            ChannelOrder::Interleaved => image.as_raw().iter().map(|&v| convert(v)).collect(),
            ChannelOrder::Planar => {
                let (width, height) = image.dimensions();
                let mut values = Vec::with_capacity((width * height * 3) as usize);
                for channel in 0..3 {
                    values.extend(image.pixels().map(|p| convert(p[channel])));
                }
                values
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn encode_png(image: RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn config(width: u32, height: u32, order: ChannelOrder) -> PixelConfig {
        PixelConfig {
            width,
            height,
            channel_order: order,
            ..PixelConfig::default()
        }
    }

    #[test]
    fn test_default_output_shape() {
        let preprocessor = ImagePreprocessor::default();
        let bytes = encode_png(RgbImage::from_pixel(10, 7, Rgb([255, 0, 0])));

        let tensor = preprocessor.resize_and_extract(&bytes).unwrap();
        assert_eq!(tensor.dimensions(), ImageDimensions::imagenet());
        assert_eq!(tensor.as_slice().len(), 224 * 224 * 3);
        assert_eq!(tensor.get(100, 50, 0), Some(255.0 - 117.0));
        assert_eq!(tensor.get(100, 50, 1), Some(-117.0));
    }

    #[test]
    fn test_offset_cancels_matching_gray() {
        let preprocessor = ImagePreprocessor::new(config(4, 4, ChannelOrder::Interleaved));
        let bytes = encode_png(RgbImage::from_pixel(1, 1, Rgb([117, 117, 117])));

        let tensor = preprocessor.resize_and_extract(&bytes).unwrap();
        assert!(tensor.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_scale_applied_after_offset() {
        let pixels = PixelConfig {
            width: 1,
            height: 1,
            offset: 100.0,
            scale: 0.5,
            ..PixelConfig::default()
        };
        let preprocessor = ImagePreprocessor::new(pixels);
        let bytes = encode_png(RgbImage::from_pixel(1, 1, Rgb([200, 100, 0])));

        let tensor = preprocessor.resize_and_extract(&bytes).unwrap();
        assert_eq!(tensor.as_slice(), &[50.0, 0.0, -50.0]);
    }

    #[test]
    fn test_channel_orders() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([117, 118, 119]));
        image.put_pixel(1, 0, Rgb([120, 121, 122]));
        let bytes = encode_png(image);

        let interleaved = ImagePreprocessor::new(config(2, 1, ChannelOrder::Interleaved))
            .resize_and_extract(&bytes)
            .unwrap();
        let planar = ImagePreprocessor::new(config(2, 1, ChannelOrder::Planar))
            .resize_and_extract(&bytes)
            .unwrap();

        assert_eq!(interleaved.as_slice(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(planar.as_slice(), &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert_eq!(planar.order(), ChannelOrder::Planar);
    }

    #[test]
    fn test_identical_bytes_identical_tensor() {
        let image = RgbImage::from_fn(31, 17, |x, y| Rgb([(x * 8) as u8, (y * 15) as u8, 77]));
        let bytes = encode_png(image);
        let preprocessor = ImagePreprocessor::new(config(16, 16, ChannelOrder::Interleaved));

        let a = preprocessor.resize_and_extract(&bytes).unwrap();
        let b = preprocessor.resize_and_extract(&bytes).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_undecodable_bytes() {
        let preprocessor = ImagePreprocessor::default();
        let result = preprocessor.resize_and_extract(b"definitely not an image");
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_load_and_extract_missing_file() {
        let preprocessor = ImagePreprocessor::default();
        let result = preprocessor.load_and_extract(Path::new("/nonexistent/cat.jpg"));
        assert!(matches!(result, Err(Error::Read { .. })));
    }

    #[test]
    fn test_load_and_extract_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teddy.png");
        std::fs::write(&path, encode_png(RgbImage::from_pixel(3, 3, Rgb([10, 20, 30])))).unwrap();

        let preprocessor = ImagePreprocessor::new(config(3, 3, ChannelOrder::Interleaved));
        let tensor = preprocessor.load_and_extract(&path).unwrap();
        assert_eq!(tensor.get(2, 2, 2), Some(30.0 - 117.0));
    }
}
