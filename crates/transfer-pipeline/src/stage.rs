//! Named stages with declared input and output columns.
//!
//! A [`StageChain`] is validated once when it is built: every stage must read
//! a column that is a source column or was produced by an earlier stage.
//! Running the chain folds the rows through each stage in order.

use std::fmt;

use tracing::debug;
use transfer_core::{Embedding, Error, ImageData, PixelTensor, Result};

/// A column of the row set flowing through a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    /// Source column: the input record
    ImagePath,
    RawImage,
    Pixels,
    Features,
    Scores,
    PredictedLabel,
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Column::ImagePath => "ImagePath",
            Column::RawImage => "RawImage",
            Column::Pixels => "Pixels",
            Column::Features => "Features",
            Column::Scores => "Scores",
            Column::PredictedLabel => "PredictedLabel",
        };
        f.write_str(name)
    }
}

/// One item moving through the chain; columns fill in as stages run
#[derive(Debug, Clone)]
pub struct Row {
    pub record: ImageData,
    pub raw: Option<Vec<u8>>,
    pub pixels: Option<PixelTensor>,
    pub features: Option<Embedding>,
    pub scores: Option<Vec<f32>>,
    pub predicted_label: Option<String>,
}

impl Row {
    pub fn new(record: ImageData) -> Self {
        Self {
            record,
            raw: None,
            pixels: None,
            features: None,
            scores: None,
            predicted_label: None,
        }
    }
}

/// Fetches a column value a stage depends on
pub(crate) fn required<'a, T>(value: &'a Option<T>, column: Column, row: &Row) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| {
        Error::Schema(format!(
            "Column {} missing for {}",
            column,
            row.record.path.display()
        ))
    })
}

/// A named transformation from one column to another
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn input(&self) -> Column;

    fn output(&self) -> Column;

    /// Fills the output column of every row; order is preserved
    fn apply(&self, rows: Vec<Row>) -> Result<Vec<Row>>;
}

/// Ordered, schema-checked list of stages
pub struct StageChain {
    stages: Vec<Box<dyn Stage>>,
}

impl StageChain {
    /// Validates the wiring of `stages`
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Result<Self> {
        let mut available = vec![Column::ImagePath];
        for stage in &stages {
            if !available.contains(&stage.input()) {
                return Err(Error::Schema(format!(
                    "Stage {} reads {} but only {:?} are available",
                    stage.name(),
                    stage.input(),
                    available
                )));
            }
            if available.contains(&stage.output()) {
                return Err(Error::Schema(format!(
                    "Stage {} writes {} which is already produced",
                    stage.name(),
                    stage.output()
                )));
            }
            available.push(stage.output());
        }
        Ok(Self { stages })
    }

    /// Appends stages, validating the extended chain
    pub fn extend(self, more: Vec<Box<dyn Stage>>) -> Result<Self> {
        let mut stages = self.stages;
        stages.extend(more);
        Self::new(stages)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn run(&self, rows: Vec<Row>) -> Result<Vec<Row>> {
        self.stages.iter().try_fold(rows, |rows, stage| {
            debug!("Running stage {} on {} rows", stage.name(), rows.len());
            stage.apply(rows)
        })
    }

    /// Runs the chain on bare records
    pub fn run_records(&self, records: &[ImageData]) -> Result<Vec<Row>> {
        self.run(records.iter().cloned().map(Row::new).collect())
    }
}
