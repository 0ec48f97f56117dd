//! Log-power spectrogram front end of the arrival classifier
//!
//! Every channel of a window goes through a short-time Fourier transform
//! (64-point periodic Hann frames, hop 16, no end padding). Magnitudes are
//! converted to decibels, floored 80 dB below the window's peak, and the
//! whole window tensor is finally divided by its largest absolute value so
//! it lies in `[-1, 1]`.
//!
//! # Example
//!
//! ```
//! use ndarray::Array2;
//! use phase_picker::features::spectrogram::SpectrogramFrontEnd;
//!
//! let front_end = SpectrogramFrontEnd::new();
//! let window = Array2::<f32>::zeros((400, 3));
//! let image = front_end.transform(window.view());
//! assert_eq!(image.shape(), &[22, 33, 3]);
//! ```

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::{Array3, ArrayView2};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// FFT length of each frame
pub const N_FFT: usize = 64;

/// Samples between frame starts
pub const HOP_LENGTH: usize = 16;

/// Frequency bins kept per frame (`N_FFT / 2 + 1`)
pub const BIN_COUNT: usize = N_FFT / 2 + 1;

/// Magnitude floor before taking the logarithm
pub const AMIN: f32 = 1e-5;

/// Decibel range kept below the window's maximum
pub const DYNAMIC_RANGE_DB: f32 = 80.0;

/// Number of STFT frames for a window of `window_length` samples
pub fn frame_count(window_length: usize) -> usize {
    if window_length < N_FFT {
        0
    } else {
        (window_length - N_FFT) / HOP_LENGTH + 1
    }
}

/// Periodic Hann window of length `n`
fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
        .collect()
}

/// Spectrogram transform with a planned FFT
///
/// Cheap to share across threads; [`transform`](Self::transform) only reads
/// the plan.
#[derive(Clone)]
pub struct SpectrogramFrontEnd {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl std::fmt::Debug for SpectrogramFrontEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrogramFrontEnd")
            .field("n_fft", &N_FFT)
            .field("hop_length", &HOP_LENGTH)
            .finish()
    }
}

impl Default for SpectrogramFrontEnd {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrogramFrontEnd {
    /// Plan the forward FFT and build the analysis window
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(N_FFT),
            window: hann_window(N_FFT),
        }
    }

    /// Transform one `(samples, channels)` window into a `(frames, bins, channels)` image
    pub fn transform(&self, window: ArrayView2<'_, f32>) -> Array3<f32> {
        let (samples, channels) = window.dim();
        let frames = frame_count(samples);
        let mut image = Array3::<f32>::zeros((frames, BIN_COUNT, channels));
        if frames == 0 {
            return image;
        }

        let mut buffer = vec![Complex::new(0.0f32, 0.0); N_FFT];
        for c in 0..channels {
            for f in 0..frames {
                let offset = f * HOP_LENGTH;
                for (k, slot) in buffer.iter_mut().enumerate() {
                    *slot = Complex::new(window[[offset + k, c]] * self.window[k], 0.0);
                }
                self.fft.process(&mut buffer);
                for (b, value) in buffer.iter().take(BIN_COUNT).enumerate() {
                    image[[f, b, c]] = 10.0 * value.norm().max(AMIN).log10();
                }
            }
        }

        let peak = image.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let floor = peak - DYNAMIC_RANGE_DB;
        image.mapv_inplace(|db| db.max(floor));

        let (min, max) = image
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &x| {
                (lo.min(x), hi.max(x))
            });
        let scale = min.abs().max(max.abs());
        if scale > 0.0 {
            image.mapv_inplace(|x| x / scale);
        }

        image
    }
}
