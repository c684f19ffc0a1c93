//! Feature extraction with an ONNX graph run by ONNX Runtime.
//!
//! The graph is fed through a named input tensor and the embedding is read
//! from a named intermediate output, which lets a full classification network
//! be used without editing the graph.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::logging::LogLevel;
use ort::session::Session;
use ort::value::TensorRef;
use tracing::{debug, info};
use transfer_core::{
    ChannelOrder, Embedding, Error, ImageDimensions, PixelConfig, PixelTensor, Result,
};

use crate::{check_input, FeatureExtractor};

pub struct OnnxFeatureExtractor {
    name: String,
    model_path: PathBuf,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    input: ImageDimensions,
    order: ChannelOrder,
    embedding_dim: usize,
}

impl OnnxFeatureExtractor {
    pub fn load(
        model_path: &Path,
        input_name: &str,
        output_name: &str,
        embedding_dim: usize,
        pixels: &PixelConfig,
    ) -> Result<Self> {
        if embedding_dim == 0 {
            return Err(Error::Config("ONNX embedding_dim must be positive".to_string()));
        }
        if !model_path.is_file() {
            return Err(Error::ModelLoad(format!(
                "ONNX model not found: {}",
                model_path.display()
            )));
        }

        let session = Session::builder()
            .and_then(|b| b.with_log_level(LogLevel::Error))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| {
                Error::ModelLoad(format!(
                    "Failed to create ONNX session for {}: {e}",
                    model_path.display()
                ))
            })?;
        check_io_name("input", input_name, session.inputs.iter().map(|i| i.name.as_str()))?;
        check_io_name("output", output_name, session.outputs.iter().map(|o| o.name.as_str()))?;
        info!("Loaded ONNX graph {}", model_path.display());

        let name = model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("onnx_model")
            .to_string();

        Ok(Self {
            name: format!("{name}:{output_name}"),
            model_path: model_path.to_path_buf(),
            session: Mutex::new(session),
            input_name: input_name.to_string(),
            output_name: output_name.to_string(),
            input: pixels.dimensions(),
            order: pixels.channel_order,
            embedding_dim,
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn input_shape(&self, n: usize) -> Vec<i64> {
        let h = self.input.height as i64;
        let w = self.input.width as i64;
        let c = self.input.channels as i64;
        match self.order {
            ChannelOrder::Interleaved => vec![n as i64, h, w, c],
            ChannelOrder::Planar => vec![n as i64, c, h, w],
        }
    }
}

fn check_io_name<'a>(
    kind: &str,
    wanted: &str,
    available: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let available: Vec<&str> = available.collect();
    if available.contains(&wanted) {
        return Ok(());
    }
    Err(Error::ModelLoad(format!(
        "ONNX graph has no {kind} named '{wanted}' (available: {})",
        available.join(", ")
    )))
}

impl FeatureExtractor for OnnxFeatureExtractor {
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

        let mut values = Vec::with_capacity(batch.len() * self.input.num_values());
        for tensor in batch {
            values.extend_from_slice(tensor.as_slice());
        }

        let input = TensorRef::from_array_view((self.input_shape(batch.len()), values.as_slice()))
            .map_err(|e| Error::Model(format!("Failed to build input tensor: {e}")))?;
        let inputs = ort::inputs![self.input_name.as_str() => input];

        let mut session = self
            .session
            .lock()
            .map_err(|_| Error::Model("ONNX session lock poisoned".to_string()))?;
        let outputs = session
            .run(inputs)
            .map_err(|e| Error::Model(format!("ONNX Runtime inference failed: {e}")))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            Error::Model(format!("ONNX graph produced no output '{}'", self.output_name))
        })?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                Error::Model(format!(
                    "Failed to extract output '{}' as f32: {e}",
                    self.output_name
                ))
            })?;

        // Spatial dimensions of size one are tolerated, e.g. [n, d, 1, 1]
        let expected = batch.len() * self.embedding_dim;
        if data.len() != expected {
            return Err(Error::ShapeMismatch {
                expected: format!("[{}, {}]", batch.len(), self.embedding_dim),
                actual: format!("{shape:?}"),
            });
        }
        debug!("ONNX scored batch of {} images", batch.len());

        Ok(data
            .chunks(self.embedding_dim)
            .map(|row| Embedding::new(row.to_vec()))
            .collect())
    }
}

#[cfg(all(test, feature = "onnx"))]
mod tests {
    use super::*;

    fn pixels() -> PixelConfig {
        PixelConfig {
            height: 4,
            width: 4,
            ..PixelConfig::default()
        }
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.onnx");
        let result = OnnxFeatureExtractor::load(&path, "input", "output", 8, &pixels());
        assert!(matches!(result, Err(Error::ModelLoad(_))));
    }

    #[test]
    fn test_load_corrupt_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.onnx");
        std::fs::write(&path, b"this is not a protobuf graph").unwrap();
        let result = OnnxFeatureExtractor::load(&path, "input", "output", 8, &pixels());
        assert!(matches!(result, Err(Error::ModelLoad(_))));
    }

    #[test]
    fn test_load_rejects_zero_embedding_dim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.onnx");
        std::fs::write(&path, b"irrelevant").unwrap();
        let result = OnnxFeatureExtractor::load(&path, "input", "output", 0, &pixels());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_io_name_is_model_load_error() {
        let names = ["data", "softmax2_pre_activation"];
        assert!(check_io_name("output", "softmax2_pre_activation", names.into_iter()).is_ok());

        match check_io_name("output", "softmax2", names.into_iter()) {
            Err(Error::ModelLoad(msg)) => {
                assert!(msg.contains("softmax2"));
                assert!(msg.contains("data, softmax2_pre_activation"));
            }
            other => panic!("expected ModelLoad, got {other:?}"),
        }
    }
}
