//! Tab-separated image manifests.
//!
//! Each line is `<relative path>\t<label>`; the label field may be omitted for
//! inference-only manifests. Records are produced lazily, one per line, in
//! file order.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use tracing::debug;
use transfer_core::{Error, ImageData, Result};

/// Reads image manifests relative to an image root folder
#[derive(Debug, Clone)]
pub struct TaggedImageReader {
    image_root: PathBuf,
    require_labels: bool,
}

impl TaggedImageReader {
    /// Creates a reader; labels are optional by default
    pub fn new(image_root: impl Into<PathBuf>) -> Self {
        Self {
            image_root: image_root.into(),
            require_labels: false,
        }
    }

    /// Makes a missing or empty label a parse error (training manifests)
    pub fn require_labels(mut self, required: bool) -> Self {
        self.require_labels = required;
        self
    }

    pub fn image_root(&self) -> &Path {
        &self.image_root
    }

    /// Opens a manifest file and returns its records lazily
    pub fn open(&self, manifest: &Path) -> Result<ManifestRecords<BufReader<File>>> {
        let file = File::open(manifest).map_err(|e| Error::read(manifest, e))?;
        debug!("Opened manifest {}", manifest.display());
        Ok(self.from_reader(BufReader::new(file)))
    }

    /// Wraps any buffered reader holding manifest text
    pub fn from_reader<R: BufRead>(&self, reader: R) -> ManifestRecords<R> {
        ManifestRecords {
            reader: self.clone(),
            lines: reader.lines(),
            line_no: 0,
            finished: false,
        }
    }

    /// Reads every record, stopping at the first malformed line
    pub fn read_all(&self, manifest: &Path) -> Result<Vec<ImageData>> {
        let records = self.open(manifest)?.collect::<Result<Vec<_>>>()?;
        debug!(
            "Read {} records from {}",
            records.len(),
            manifest.display()
        );
        Ok(records)
    }

    /// Parses one manifest line; `line_no` is 1-based and only used for errors
    pub fn parse_line(&self, line_no: usize, line: &str) -> Result<ImageData> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let fields: Vec<&str> = line.split('\t').collect();

        if fields.len() > 2 {
            return Err(Error::parse(
                line_no,
                format!("expected at most 2 tab-separated fields, found {}", fields.len()),
            ));
        }

        let path = fields[0];
        if path.is_empty() {
            return Err(Error::parse(line_no, "empty image path"));
        }

        let label = fields.get(1).copied().unwrap_or("");
        if self.require_labels && label.is_empty() {
            return Err(Error::parse(line_no, format!("missing label for {path}")));
        }

        Ok(ImageData::new(self.resolve(Path::new(path)), label))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.image_root.join(path)
        }
    }
}

/// Lazy iterator over manifest records.
///
/// Yields `Err` for the first malformed line and nothing afterwards.
pub struct ManifestRecords<R> {
    reader: TaggedImageReader,
    lines: Lines<R>,
    line_no: usize,
    finished: bool,
}

impl<R: BufRead> Iterator for ManifestRecords<R> {
    type Item = Result<ImageData>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let line = match self.lines.next() {
            None => {
                self.finished = true;
                return None;
            }
            Some(Err(e)) => {
                self.finished = true;
                return Some(Err(Error::Io(e)));
            }
            Some(Ok(line)) => line,
        };

        self.line_no += 1;
        let record = self.reader.parse_line(self.line_no, &line);
        if record.is_err() {
            self.finished = true;
        }
        Some(record)
    }
}

impl<R: BufRead> std::iter::FusedIterator for ManifestRecords<R> {}
