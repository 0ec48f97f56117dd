//! Waveform preprocessing modules
//!
//! This module contains utilities for preparing seismic channels before windowing:
//! - Resampling to the classifier's sampling rate
//! - Butterworth filtering (lowpass, highpass, bandpass, bandstop)

pub mod butterworth;
pub mod resample;
