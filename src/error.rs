//! Error kinds for every stage of the map pipeline.
//!
//! Skippable data problems and fatal structural problems are separate
//! variants, so the driver never has to inspect error messages to decide
//! whether a day can be skipped.

use chrono::NaiveDate;
use thiserror::Error;

/// Invalid bin boundaries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("{axis} boundaries need at least 2 edges, got {len}")]
    TooFewEdges { axis: &'static str, len: usize },

    #[error("{axis} boundaries must be strictly increasing (edge {index})")]
    NotIncreasing { axis: &'static str, index: usize },

    #[error("{axis} boundaries contain a non-finite value at edge {index}")]
    NonFinite { axis: &'static str, index: usize },

    #[error("invalid bin range for {axis}: {reason}")]
    InvalidRange { axis: &'static str, reason: String },
}

/// Failure to produce the two series for one day.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("no {series} data for {day}")]
    NoData { day: NaiveDate, series: &'static str },

    #[error("instrument mode {mode} on {day} is not supported")]
    UnsupportedMode { day: NaiveDate, mode: String },

    #[error("data quality problem on {day}: {reason}")]
    DataQuality { day: NaiveDate, reason: String },

    #[error("I/O error while loading {day}: {source}")]
    Io {
        day: NaiveDate,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected loader failure: {0}")]
    Other(#[from] anyhow::Error),
}

impl LoadError {
    /// Whether the driver may skip the day and carry on.
    ///
    /// Only the recognised data-quality kinds are skippable; anything else
    /// is surfaced to the caller.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            LoadError::NoData { .. } | LoadError::UnsupportedMode { .. } | LoadError::DataQuality { .. }
        )
    }
}

/// Failure to merge the primary and secondary series.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignError {
    #[error("{series} series is not strictly time ordered at record {index}")]
    Unsorted { series: &'static str, index: usize },

    #[error("no primary record has a secondary record within tolerance")]
    NoMatch,
}

/// Arrays that cannot form an aggregate state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("expected {expected} cells, got mean={mean} count={count}")]
    CellCount { expected: usize, mean: usize, count: usize },

    #[error("cell {cell}: count {count} is not a non-negative integer")]
    InvalidCount { cell: usize, count: f64 },

    #[error("cell {cell}: mean {mean} is not finite")]
    NonFiniteMean { cell: usize, mean: f64 },

    #[error("cell {cell}: mean {mean} with zero count")]
    MeanWithoutSamples { cell: usize, mean: f64 },
}

/// Failure to read or write persisted aggregation state.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error(
        "checkpoint shape {found_rows}x{found_cols} does not match the bin grid {expected_rows}x{expected_cols}"
    )]
    Incompatible {
        expected_rows: usize,
        expected_cols: usize,
        found_rows: usize,
        found_cols: usize,
    },

    #[error("checkpoint {axis} edges {found:?} differ from the bin grid {expected:?}")]
    GridMismatch {
        axis: &'static str,
        expected: Vec<f64>,
        found: Vec<f64>,
    },

    #[error("invalid checkpoint state in {file}: {source}")]
    State {
        file: String,
        #[source]
        source: StateError,
    },

    #[error("malformed checkpoint file {file}: {reason}")]
    Malformed { file: String, reason: String },

    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Top-level error returned by the stream driver.
#[derive(Error, Debug)]
pub enum MapError {
    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
