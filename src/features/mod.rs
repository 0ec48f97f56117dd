//! Feature extraction modules
//!
//! This module contains the numeric stages between a waveform and the picks:
//! - Sliding-window extraction
//! - Spectrogram front end of the classifier
//! - Local-maximum candidate detection

pub mod peak_picking;
pub mod spectrogram;
pub mod windowing;
