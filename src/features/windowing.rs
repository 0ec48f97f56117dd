//! Sliding-window extraction
//!
//! Each channel is padded with zeros on both ends and cut into overlapping
//! windows of fixed length and stride. A window spans all three channels and
//! is laid out time-then-channel, the layout the classifier expects.
//!
//! With `pad_width = window_length / 2`, window `w` is centred on original
//! sample `w * stride`.
//!
//! # Example
//!
//! ```
//! use phase_picker::features::windowing::{extract_windows, WindowParams};
//!
//! let channel = vec![0.0f64; 1000];
//! let traces = [channel.clone(), channel.clone(), channel];
//! let batch = extract_windows(&traces, &WindowParams::default());
//! assert_eq!(batch.shape(), &[51, 400, 3]);
//! ```

use ndarray::Array3;

use crate::config::PickerConfig;

/// Window geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowParams {
    /// Samples per window
    pub window_length: usize,
    /// Samples between consecutive window starts
    pub stride: usize,
    /// Zeros added to each end of every channel
    pub pad_width: usize,
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            window_length: 400,
            stride: 20,
            pad_width: 200,
        }
    }
}

impl From<&PickerConfig> for WindowParams {
    fn from(config: &PickerConfig) -> Self {
        Self {
            window_length: config.window_length,
            stride: config.stride,
            pad_width: config.pad_width,
        }
    }
}

impl WindowParams {
    /// Number of full windows over a channel of `len` samples
    ///
    /// `floor((padded - window_length) / stride) + 1`, or 0 when the padded
    /// channel is shorter than one window. A zero stride yields no windows.
    pub fn window_count(&self, len: usize) -> usize {
        let padded = len + 2 * self.pad_width;
        if padded < self.window_length || self.stride == 0 {
            return 0;
        }
        (padded - self.window_length) / self.stride + 1
    }
}

/// Cut three channels into a `(window_count, window_length, 3)` batch
///
/// Channels shorter than the first are treated as zero beyond their end.
/// Returns an empty batch when no full window fits.
pub fn extract_windows(traces: &[Vec<f64>; 3], params: &WindowParams) -> Array3<f32> {
    let len = traces[0].len();
    let count = params.window_count(len);

    log::debug!(
        "Extracting {} windows (length {}, stride {}, pad {}) from {} samples",
        count,
        params.window_length,
        params.stride,
        params.pad_width,
        len
    );

    if count == 0 {
        return Array3::zeros((0, params.window_length, 3));
    }

    let pad = params.pad_width;
    Array3::from_shape_fn((count, params.window_length, 3), |(w, t, c)| {
        // Position in the padded channel, shifted back to the original
        let padded_index = w * params.stride + t;
        padded_index
            .checked_sub(pad)
            .and_then(|i| traces[c].get(i))
            .map_or(0.0, |&x| x as f32)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_traces(len: usize) -> [Vec<f64>; 3] {
        let base: Vec<f64> = (0..len).map(|i| i as f64 + 1.0).collect();
        [
            base.clone(),
            base.iter().map(|x| x * 10.0).collect(),
            base.iter().map(|x| -x).collect(),
        ]
    }

    #[test]
    fn test_window_count_closed_form() {
        let params = WindowParams::default();
        assert_eq!(params.window_count(1000), 51);
        assert_eq!(params.window_count(0), 1);
        assert_eq!(params.window_count(19), 1);
        assert_eq!(params.window_count(20), 2);

        let params = WindowParams {
            window_length: 10,
            stride: 3,
            pad_width: 0,
        };
        assert_eq!(params.window_count(9), 0);
        assert_eq!(params.window_count(10), 1);
        // Remainder is truncated
        assert_eq!(params.window_count(14), 2);
        assert_eq!(params.window_count(16), 3);
    }

    #[test]
    fn test_short_input_gives_empty_batch() {
        let params = WindowParams {
            window_length: 400,
            stride: 20,
            pad_width: 0,
        };
        let batch = extract_windows(&ramp_traces(399), &params);
        assert_eq!(batch.shape(), &[0, 400, 3]);
    }

    #[test]
    fn test_windows_match_strided_view() {
        let traces = ramp_traces(1000);
        let params = WindowParams::default();
        let batch = extract_windows(&traces, &params);
        assert_eq!(batch.shape(), &[51, 400, 3]);

        // Leading padding
        assert_eq!(batch[[0, 0, 0]], 0.0);
        assert_eq!(batch[[0, 199, 1]], 0.0);
        assert_eq!(batch[[0, 200, 1]], 10.0);

        // Window w is centred on original sample w * stride
        for w in [0usize, 7, 50] {
            let centre = w * params.stride;
            assert_eq!(batch[[w, 200, 0]], traces[0][centre] as f32);
            assert_eq!(batch[[w, 200, 2]], traces[2][centre] as f32);
        }

        // Trailing padding in the last window
        assert_eq!(batch[[50, 399, 0]], 0.0);
        assert_eq!(batch[[50, 199, 0]], traces[0][999] as f32);
    }
}
