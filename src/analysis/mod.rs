//! Picks and their sessions
//!
//! This module contains everything downstream of the classifier:
//! - Window/sample/time coordinate mapping
//! - Candidate filtering and pick editing
//! - Per-waveform sessions and exports
//! - Batch operations over many sessions

pub mod coordinates;
pub mod picks;
pub mod session;
pub mod workspace;
