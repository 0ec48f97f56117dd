//! Error types for the phase picking engine

use thiserror::Error;

/// Errors that can occur while preparing waveforms, running the classifier
/// or editing picks
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PickerError {
    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Filter order, cutoff or band ordering rejected; the waveform is untouched
    #[error("Invalid filter parameter: {0}")]
    InvalidFilterParameter(String),

    /// A waveform source could not be read (the caller skips it)
    #[error("Failed to load waveform: {0}")]
    LoadFailure(String),

    /// Weight artifact does not fit the fixed classifier architecture
    #[error("Model shape mismatch: {0}")]
    ModelShapeMismatch(String),

    /// Weight artifact could not be read or parsed
    #[error("Failed to load model weights: {0}")]
    WeightLoad(String),

    /// Inference was cancelled between sub-batches; partial results were discarded
    #[error("Inference cancelled after {completed} of {total} batches")]
    Cancelled {
        /// Sub-batches finished before the cancel signal was seen
        completed: usize,
        /// Total number of sub-batches
        total: usize,
    },

    /// No pick with this id in the accepted list
    #[error("Pick {0} not found")]
    PickNotFound(u64),

    /// Move rejected because the pick is locked
    #[error("Pick {0} is locked")]
    PickLocked(u64),

    /// Pick editing requested before predictions were installed
    #[error("No predictions available: {0}")]
    NotReady(String),

    /// Filesystem error while exporting or reading configuration
    #[error("I/O error: {0}")]
    Io(String),

    /// A background worker stopped without producing a result
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for PickerError {
    fn from(err: std::io::Error) -> Self {
        PickerError::Io(err.to_string())
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, PickerError>;
