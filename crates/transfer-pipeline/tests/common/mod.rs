#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use tempfile::TempDir;
use transfer_core::{
    ChannelOrder, Embedding, ImageDimensions, PipelineConfig, PixelConfig, PixelTensor, Result,
};
use transfer_features::{check_input, FeatureExtractor};
use transfer_pipeline::Pipeline;

/// Deterministic stand-in for a pretrained network: the embedding is the
/// mean of each color channel, scaled down
pub struct MeanColorExtractor {
    input: ImageDimensions,
    order: ChannelOrder,
    scored: AtomicUsize,
}

impl MeanColorExtractor {
    pub fn new(pixels: &PixelConfig) -> Self {
        Self {
            input: pixels.dimensions(),
            order: pixels.channel_order,
            scored: AtomicUsize::new(0),
        }
    }

    /// Images scored so far
    pub fn scored(&self) -> usize {
        self.scored.load(Ordering::SeqCst)
    }
}

impl FeatureExtractor for MeanColorExtractor {
    fn name(&self) -> &str {
        "mean_color"
    }

    fn input_dimensions(&self) -> ImageDimensions {
        self.input
    }

    fn channel_order(&self) -> ChannelOrder {
        self.order
    }

    fn embedding_dim(&self) -> usize {
        3
    }

    fn score(&self, batch: &[PixelTensor]) -> Result<Vec<Embedding>> {
        for tensor in batch {
            check_input(self.input, self.order, tensor)?;
        }
        self.scored.fetch_add(batch.len(), Ordering::SeqCst);
        Ok(batch
            .iter()
            .map(|t| Embedding::new(channel_means(t).iter().map(|m| m / 64.0).collect()))
            .collect())
    }
}

/// Mean of each channel over all pixels, independent of layout
pub fn channel_means(tensor: &PixelTensor) -> Vec<f32> {
    let dims = tensor.dimensions();
    let (h, w) = (dims.height as usize, dims.width as usize);
    (0..dims.channels as usize)
        .map(|c| {
            let sum: f64 = (0..h)
                .flat_map(|y| (0..w).map(move |x| (y, x)))
                .filter_map(|(y, x)| tensor.get(y, x, c))
                .map(f64::from)
                .sum();
            (sum / (h * w).max(1) as f64) as f32
        })
        .collect()
}

pub fn pixel_config() -> PixelConfig {
    PixelConfig {
        width: 8,
        height: 8,
        ..PixelConfig::default()
    }
}

pub fn test_config(image_root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.data.image_root = image_root.to_path_buf();
    config.data.train_manifest = image_root.join("tags.tsv");
    config.pixels = pixel_config();
    config.runtime.batch_size = 4;
    config
}

/// Images on disk plus manifests describing them
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    /// cat (red), dog (blue) and toaster (green) images, three of each
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let colors = [
            ("cat", [200u8, 40u8, 30u8]),
            ("dog", [30, 50, 210]),
            ("toaster", [40, 190, 60]),
        ];
        for (label, base) in colors {
            for i in 0..3u8 {
                let rgb = base.map(|c| c.saturating_add(i * 7));
                write_image(dir.path(), &format!("{label}{}.png", i + 1), rgb);
            }
        }

        let fixture = Self { dir };
        fixture.manifest(
            "tags.tsv",
            &[
                ("cat1.png", "cat"),
                ("dog1.png", "dog"),
                ("cat2.png", "cat"),
                ("dog2.png", "dog"),
            ],
        );
        fixture.manifest(
            "all-tags.tsv",
            &[
                ("cat1.png", "cat"),
                ("dog1.png", "dog"),
                ("toaster1.png", "toaster"),
                ("cat2.png", "cat"),
                ("dog2.png", "dog"),
                ("toaster2.png", "toaster"),
            ],
        );
        fixture.manifest(
            "test-tags.tsv",
            &[
                ("cat3.png", "cat"),
                ("dog3.png", "dog"),
                ("toaster3.png", "toaster"),
            ],
        );
        fixture
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn manifest(&self, name: &str, lines: &[(&str, &str)]) -> PathBuf {
        let text: String = lines
            .iter()
            .map(|(path, label)| format!("{path}\t{label}\n"))
            .collect();
        self.write(name, &text)
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn pipeline(&self) -> (Pipeline, Arc<MeanColorExtractor>) {
        self.pipeline_with(test_config(self.root()))
    }

    pub fn pipeline_with(&self, config: PipelineConfig) -> (Pipeline, Arc<MeanColorExtractor>) {
        let extractor = Arc::new(MeanColorExtractor::new(&config.pixels));
        let pipeline = Pipeline::new(config, extractor.clone()).unwrap();
        (pipeline, extractor)
    }
}

/// Solid color with a faint diagonal pattern
pub fn write_image(dir: &Path, name: &str, rgb: [u8; 3]) -> PathBuf {
    let image = RgbImage::from_fn(12, 10, |x, y| {
        let jitter = ((x + y) % 3) as u8;
        Rgb(rgb.map(|c| c.saturating_add(jitter)))
    });
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}
