//! Shared helpers for the command-line tools.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Error, ExtractorConfig, PipelineConfig, Result};

/// Installs a `tracing` subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn setup_cli_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logger: {e}")))?;

    Ok(())
}

pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", path.display())))
}

/// Loads a [`PipelineConfig`] and validates it.
///
/// Relative data and model paths are resolved against the directory holding the config
/// file, so a config can sit next to its images.
pub fn load_pipeline_config(path: &Path) -> Result<PipelineConfig> {
    let mut config: PipelineConfig = load_toml_config(path)?;
    if let Some(base) = path.parent() {
        let data = &mut config.data;
        if data.image_root.is_relative() {
            data.image_root = base.join(&data.image_root);
        }
        if data.train_manifest.is_relative() {
            data.train_manifest = base.join(&data.train_manifest);
        }
        if let Some(test) = data.test_manifest.as_mut() {
            if test.is_relative() {
                *test = base.join(&*test);
            }
        }
        match &mut config.extractor {
            ExtractorConfig::Burn { weights_path, .. } if weights_path.is_relative() => {
                *weights_path = base.join(&*weights_path);
            }
            ExtractorConfig::Onnx { model_path, .. } if model_path.is_relative() => {
                *model_path = base.join(&*model_path);
            }
            _ => {}
        }
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_toml_config_missing_file() {
        let result: Result<PipelineConfig> = load_toml_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_pipeline_config_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classify.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[data]\nimage_root = \"images\"\ntrain_manifest = \"images/tags.tsv\"\n\n[classifier]\nmax_iterations = 50"
        )
        .unwrap();

        let config = load_pipeline_config(&path).unwrap();
        assert_eq!(config.data.image_root, dir.path().join("images"));
        assert_eq!(config.data.train_manifest, dir.path().join("images/tags.tsv"));
        assert_eq!(config.classifier.max_iterations, 50);
    }

    #[test]
    fn test_load_pipeline_config_resolves_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classify.toml");
        fs::write(
            &path,
            "[extractor]\nkind = \"burn\"\narchitecture = \"efficientnet_b0\"\nweights_path = \"models/b0\"\n",
        )
        .unwrap();

        let config = load_pipeline_config(&path).unwrap();
        assert_eq!(
            config.extractor,
            ExtractorConfig::Burn {
                architecture: crate::BackboneArchitecture::EfficientNetB0,
                weights_path: dir.path().join("models/b0"),
            }
        );
    }

    #[test]
    fn test_load_pipeline_config_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[runtime]\nbatch_size = 0\n").unwrap();
        assert!(matches!(load_pipeline_config(&path), Err(Error::Config(_))));
    }
}
