//! Conversions among window index, sample index and absolute time
//!
//! Every conversion clamps to the signal: sample indices to `[0, n - 1]` and
//! window indices to `[0, window_count - 1]`. A window whose centre lies past
//! the last sample is placed on the last sample, and that sample maps back to
//! it, so every window survives a round trip through time.
//!
//! # Example
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use phase_picker::analysis::coordinates::CoordinateMapper;
//!
//! let start = Utc.with_ymd_and_hms(2022, 5, 1, 0, 0, 0).unwrap();
//! // 100 Hz, 1000 samples, stride 20, 51 windows
//! let mapper = CoordinateMapper::new(start, 1e7, 1000, 20, 51);
//! assert_eq!(mapper.window_to_sample(3), 60);
//! assert_eq!(mapper.timestamp_to_window(start + Duration::milliseconds(615)), 3);
//! ```

use chrono::Duration;

use crate::io::waveform::{Timestamp, Waveform};

/// Index/time mapping for one waveform and window geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    start: Timestamp,
    interval_ns: f64,
    sample_count: usize,
    stride: usize,
    window_count: usize,
}

impl CoordinateMapper {
    /// Build a mapper
    ///
    /// # Arguments
    ///
    /// * `start` - Time of sample 0
    /// * `interval_ns` - Nanoseconds between samples
    /// * `sample_count` - Samples per channel
    /// * `stride` - Samples between window starts
    /// * `window_count` - Windows over the waveform
    pub fn new(
        start: Timestamp,
        interval_ns: f64,
        sample_count: usize,
        stride: usize,
        window_count: usize,
    ) -> Self {
        Self {
            start,
            interval_ns,
            sample_count,
            stride,
            window_count,
        }
    }

    /// Mapper over a waveform's current samples
    pub fn for_waveform(waveform: &Waveform, stride: usize, window_count: usize) -> Self {
        Self::new(
            waveform.start_time(),
            waveform.sample_interval_ns(),
            waveform.len(),
            stride,
            window_count,
        )
    }

    /// Samples per channel
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Windows over the waveform
    pub fn window_count(&self) -> usize {
        self.window_count
    }

    /// Samples between window starts
    pub fn stride(&self) -> usize {
        self.stride
    }

    fn clamp_sample(&self, index: usize) -> usize {
        index.min(self.sample_count.saturating_sub(1))
    }

    /// Time of sample `index` (clamped)
    pub fn sample_to_timestamp(&self, index: usize) -> Timestamp {
        let offset = self.clamp_sample(index) as f64 * self.interval_ns;
        self.start + Duration::nanoseconds(offset.round() as i64)
    }

    /// Nearest sample to `time` (clamped)
    pub fn timestamp_to_sample(&self, time: Timestamp) -> usize {
        if self.interval_ns <= 0.0 {
            return 0;
        }
        let offset_ns = match (time - self.start).num_nanoseconds() {
            Some(ns) => ns as f64,
            None if time > self.start => f64::INFINITY,
            None => f64::NEG_INFINITY,
        };
        let index = (offset_ns / self.interval_ns).round();
        if index <= 0.0 {
            0
        } else {
            self.clamp_sample(index.min(usize::MAX as f64) as usize)
        }
    }

    /// Sample at the centre of window `window` (clamped)
    pub fn window_to_sample(&self, window: usize) -> usize {
        self.clamp_sample(window.saturating_mul(self.stride))
    }

    /// Latest window whose (clamped) centre is at or before sample `index`
    pub fn sample_to_window(&self, index: usize) -> usize {
        if self.stride == 0 {
            return 0;
        }
        let last = self.window_count.saturating_sub(1);
        if index >= self.window_to_sample(last) {
            return last;
        }
        index / self.stride
    }

    /// Window nearest below `time`
    pub fn timestamp_to_window(&self, time: Timestamp) -> usize {
        self.sample_to_window(self.timestamp_to_sample(time))
    }

    /// Time of window `window`'s centre sample
    pub fn window_to_timestamp(&self, window: usize) -> Timestamp {
        self.sample_to_timestamp(self.window_to_sample(window))
    }
}
