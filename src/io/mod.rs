//! Waveform I/O modules
//!
//! The three-component waveform store, the loader contract for external
//! readers, and the RAW/PKS text exports.

pub mod export;
pub mod loader;
pub mod waveform;
