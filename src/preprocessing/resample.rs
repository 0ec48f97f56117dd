//! Resampling of waveform channels to the classifier's sampling rate
//!
//! The first output sample coincides with the first input sample and the
//! output covers the same time span, so the new length is
//! `floor((n - 1) / source_rate * target_rate) + 1`.
//!
//! # Example
//!
//! ```
//! use phase_picker::preprocessing::resample::{resample, InterpolationMethod};
//!
//! let samples: Vec<f64> = (0..200).map(|i| (i as f64 * 0.05).sin()).collect();
//! let resampled = resample(&samples, 200.0, 100.0, InterpolationMethod::Linear)?;
//! assert_eq!(resampled.len(), 100);
//! # Ok::<(), phase_picker::PickerError>(())
//! ```

use serde::{Deserialize, Serialize};

use crate::error::PickerError;

/// Floor below which a segment slope is treated as flat when weighting
const SLOPE_EPSILON: f64 = f64::EPSILON;

/// Interpolation scheme used to compute samples between the original grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpolationMethod {
    /// Straight line between neighbouring samples
    Linear,
    /// Cubic Hermite interpolation whose node slopes are the neighbouring
    /// segment slopes averaged with inverse-magnitude weights (Wiggins, 1976)
    WeightedAverageSlopes,
}

/// Number of samples produced when resampling `len` samples
pub fn resampled_len(len: usize, source_rate: f64, target_rate: f64) -> usize {
    if len == 0 {
        return 0;
    }
    let duration = (len - 1) as f64 / source_rate;
    // Tolerate representation error when the span is an exact multiple
    (duration * target_rate + 1e-9).floor() as usize + 1
}

/// Resample one channel from `source_rate` to `target_rate`
///
/// Returns a copy of the input when both rates are equal.
///
/// # Errors
///
/// Returns `PickerError::InvalidInput` if either rate is not a positive,
/// finite number.
pub fn resample(
    samples: &[f64],
    source_rate: f64,
    target_rate: f64,
    method: InterpolationMethod,
) -> Result<Vec<f64>, PickerError> {
    for (name, rate) in [("Source", source_rate), ("Target", target_rate)] {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(PickerError::InvalidInput(format!(
                "{} sampling rate must be > 0, got {}",
                name, rate
            )));
        }
    }

    if samples.is_empty() || source_rate == target_rate {
        return Ok(samples.to_vec());
    }

    let new_len = resampled_len(samples.len(), source_rate, target_rate);
    log::debug!(
        "Resampling {} samples from {:.3} Hz to {:.3} Hz ({} samples, {:?})",
        samples.len(),
        source_rate,
        target_rate,
        new_len,
        method
    );

    if samples.len() == 1 {
        return Ok(vec![samples[0]; new_len]);
    }

    let slopes = match method {
        InterpolationMethod::Linear => None,
        InterpolationMethod::WeightedAverageSlopes => Some(weighted_average_slopes(samples)),
    };

    let ratio = source_rate / target_rate;
    let last_segment = samples.len() - 2;
    let output = (0..new_len)
        .map(|i| {
            // Position on the source grid, in samples
            let x = i as f64 * ratio;
            let idx = (x.floor() as usize).min(last_segment);
            let t = (x - idx as f64).clamp(0.0, 1.0);
            let (y0, y1) = (samples[idx], samples[idx + 1]);
            match &slopes {
                None => y0 + t * (y1 - y0),
                Some(s) => hermite(y0, y1, s[idx], s[idx + 1], t),
            }
        })
        .collect();

    Ok(output)
}

/// Node slopes for weighted-average-slopes interpolation (unit sample spacing)
fn weighted_average_slopes(samples: &[f64]) -> Vec<f64> {
    let segment: Vec<f64> = samples.windows(2).map(|w| w[1] - w[0]).collect();
    let weights: Vec<f64> = segment
        .iter()
        .map(|m| 1.0 / m.abs().max(SLOPE_EPSILON))
        .collect();

    let mut slopes = Vec::with_capacity(samples.len());
    slopes.push(segment[0]);
    for k in 1..segment.len() {
        let (w0, w1) = (weights[k - 1], weights[k]);
        slopes.push((w0 * segment[k - 1] + w1 * segment[k]) / (w0 + w1));
    }
    slopes.push(segment[segment.len() - 1]);
    slopes
}

/// Cubic Hermite basis on a unit interval
fn hermite(y0: f64, y1: f64, s0: f64, s1: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    h00 * y0 + h10 * s0 + h01 * y1 + h11 * s1
}
