//! Image loading from disk.

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use transfer_core::{Error, Result};

/// Reads raw image bytes relative to a root directory
#[derive(Debug, Clone)]
pub struct ImageLoader {
    /// Root directory containing images
    root_dir: PathBuf,
}

/// Uses every path exactly as given
impl Default for ImageLoader {
    fn default() -> Self {
        Self::new(PathBuf::new())
    }
}

impl ImageLoader {
    /// Creates a new image loader
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Gets the full path for an image
    pub fn full_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }

    /// Reads the undecoded bytes of one image
    pub fn load_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        std::fs::read(&full_path).map_err(|e| Error::read(full_path, e))
    }

    /// Reads many images in parallel, keeping input order
    pub fn load_many<P: AsRef<Path> + Sync>(&self, paths: &[P]) -> Result<Vec<Vec<u8>>> {
        paths
            .par_iter()
            .map(|p| self.load_bytes(p.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_path_joins_relative() {
        let loader = ImageLoader::new("/images");
        assert_eq!(loader.full_path(Path::new("cat.jpg")), PathBuf::from("/images/cat.jpg"));
        assert_eq!(loader.full_path(Path::new("/tmp/dog.jpg")), PathBuf::from("/tmp/dog.jpg"));

        let loader = ImageLoader::default();
        assert_eq!(loader.full_path(Path::new("imgs/cat.jpg")), PathBuf::from("imgs/cat.jpg"));
    }

    #[test]
    fn test_missing_image_is_read_error() {
        let loader = ImageLoader::new("/nonexistent");
        let err = loader.load_bytes(Path::new("cat.jpg")).unwrap_err();
        match err {
            Error::Read { path, .. } => assert_eq!(path, PathBuf::from("/nonexistent/cat.jpg")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_many_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in [("a.bin", b"aa".as_slice()), ("b.bin", b"b"), ("c.bin", b"ccc")] {
            std::fs::write(dir.path().join(name), body).unwrap();
        }

        let loader = ImageLoader::new(dir.path());
        let bytes = loader.load_many(&["c.bin", "a.bin", "b.bin"]).unwrap();
        assert_eq!(bytes, vec![b"ccc".to_vec(), b"aa".to_vec(), b"b".to_vec()]);
    }
}
