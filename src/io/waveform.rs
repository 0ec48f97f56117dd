//! Three-component waveform store
//!
//! A [`Waveform`] owns three equal-length channels sharing one sampling rate,
//! the recording's time bounds and identifiers, and a retained copy of the
//! samples as they were loaded. Resampling and filtering mutate the working
//! channels in place; [`Waveform::reset`] restores them from the retained copy.
//!
//! The end time is the one the recording reports and survives resampling;
//! sample times are spread evenly between start and end. Every change to the
//! working samples bumps [`Waveform::generation`], so results derived from an
//! older state can be recognised.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{PickerError, Result};
use crate::preprocessing::butterworth::{ButterworthFilter, FilterBand, FilterKind};
use crate::preprocessing::resample::{resample, InterpolationMethod};

/// Absolute UTC time
pub type Timestamp = DateTime<Utc>;

/// Number of components in a recording
pub const CHANNEL_COUNT: usize = 3;

/// Identifiers of a three-component recording
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TraceMetadata {
    /// Station code
    pub station: String,
    /// Network code
    pub network: String,
    /// Channel code of each component, in trace order
    pub channels: [String; CHANNEL_COUNT],
    /// File the recording was read from, if any
    pub source: Option<PathBuf>,
}

/// Convert seconds to a chrono duration with nanosecond resolution
pub(crate) fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::nanoseconds((seconds * 1e9).round() as i64)
}

/// Three-channel seismic recording
#[derive(Debug, Clone)]
pub struct Waveform {
    metadata: TraceMetadata,
    start: Timestamp,
    end: Timestamp,
    sampling_rate: f64,
    traces: [Vec<f64>; CHANNEL_COUNT],
    original_traces: [Vec<f64>; CHANNEL_COUNT],
    original_rate: f64,
    generation: u64,
}

impl Waveform {
    /// Create a waveform from three channels
    ///
    /// # Arguments
    ///
    /// * `metadata` - Station, network and channel identifiers
    /// * `start` - Time of the first sample
    /// * `sampling_rate` - Sampling rate in Hz
    /// * `traces` - The three channels, all the same non-zero length
    ///
    /// # Errors
    ///
    /// Returns `PickerError::InvalidInput` if the channels are empty or differ
    /// in length, or if the sampling rate is not a positive finite number.
    pub fn new(
        metadata: TraceMetadata,
        start: Timestamp,
        sampling_rate: f64,
        traces: [Vec<f64>; CHANNEL_COUNT],
    ) -> Result<Self> {
        if !sampling_rate.is_finite() || sampling_rate <= 0.0 {
            return Err(PickerError::InvalidInput(format!(
                "Sampling rate must be > 0, got {}",
                sampling_rate
            )));
        }
        let len = traces[0].len();
        if len == 0 {
            return Err(PickerError::InvalidInput("Empty waveform channels".to_string()));
        }
        if traces.iter().any(|t| t.len() != len) {
            return Err(PickerError::InvalidInput(format!(
                "Channel lengths differ: {} / {} / {}",
                traces[0].len(),
                traces[1].len(),
                traces[2].len()
            )));
        }

        Ok(Self {
            metadata,
            start,
            end: start + seconds_to_duration((len - 1) as f64 / sampling_rate),
            sampling_rate,
            original_traces: traces.clone(),
            traces,
            original_rate: sampling_rate,
            generation: 0,
        })
    }

    /// Replace the derived end time with the one the recording reports
    ///
    /// # Errors
    ///
    /// Returns `PickerError::InvalidInput` if `end` precedes the start time.
    pub fn with_end_time(mut self, end: Timestamp) -> Result<Self> {
        if end < self.start {
            return Err(PickerError::InvalidInput(format!(
                "End time {} precedes start time {}",
                end, self.start
            )));
        }
        self.end = end;
        Ok(self)
    }

    /// Interpolate every channel to `target_rate`
    ///
    /// A no-op when the waveform is already at `target_rate`. Start and end
    /// times are kept; the sample interval follows from the new length.
    ///
    /// # Errors
    ///
    /// Returns `PickerError::InvalidInput` if `target_rate` is not positive.
    pub fn resample(&mut self, target_rate: f64, method: InterpolationMethod) -> Result<()> {
        if target_rate == self.sampling_rate {
            return Ok(());
        }

        let resampled = [
            resample(&self.traces[0], self.sampling_rate, target_rate, method)?,
            resample(&self.traces[1], self.sampling_rate, target_rate, method)?,
            resample(&self.traces[2], self.sampling_rate, target_rate, method)?,
        ];

        log::debug!(
            "Resampled {}: {} → {} samples ({} Hz → {} Hz)",
            self.metadata.station,
            self.len(),
            resampled[0].len(),
            self.sampling_rate,
            target_rate
        );

        self.traces = resampled;
        self.sampling_rate = target_rate;
        self.generation += 1;
        Ok(())
    }

    /// Apply a causal Butterworth filter to all channels in place
    ///
    /// The filter is designed at the current sampling rate.
    ///
    /// # Errors
    ///
    /// Returns `PickerError::InvalidFilterParameter` for an invalid order or
    /// band; the samples are left untouched in that case.
    pub fn apply_filter(&mut self, order: i32, band: FilterBand, kind: FilterKind) -> Result<()> {
        let filter = ButterworthFilter::design(order, band, kind, self.sampling_rate)?;
        for trace in self.traces.iter_mut() {
            filter.apply(trace);
        }
        self.generation += 1;
        log::debug!(
            "Applied {:?} filter {:?} (order {}) to {}",
            kind,
            band,
            order,
            self.metadata.station
        );
        Ok(())
    }

    /// Restore the loaded samples, then resample to `target_rate`
    ///
    /// Any filters applied since loading are discarded.
    pub fn reset(&mut self, target_rate: f64, method: InterpolationMethod) -> Result<()> {
        self.traces = self.original_traces.clone();
        self.sampling_rate = self.original_rate;
        self.generation += 1;
        self.resample(target_rate, method)
    }

    /// Counter bumped whenever the working samples change
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Recording identifiers
    pub fn metadata(&self) -> &TraceMetadata {
        &self.metadata
    }

    /// Station code
    pub fn station(&self) -> &str {
        &self.metadata.station
    }

    /// Current sampling rate in Hz
    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    /// Sampling rate the waveform was loaded with
    pub fn original_sampling_rate(&self) -> f64 {
        self.original_rate
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.traces[0].len()
    }

    /// Always false for a constructed waveform
    pub fn is_empty(&self) -> bool {
        self.traces[0].is_empty()
    }

    /// One channel's samples
    ///
    /// # Panics
    ///
    /// Panics if `channel >= CHANNEL_COUNT`.
    pub fn trace(&self, channel: usize) -> &[f64] {
        &self.traces[channel]
    }

    /// All three channels
    pub fn traces(&self) -> &[Vec<f64>; CHANNEL_COUNT] {
        &self.traces
    }

    /// Time of the first sample
    pub fn start_time(&self) -> Timestamp {
        self.start
    }

    /// Time of the last sample
    pub fn end_time(&self) -> Timestamp {
        self.end
    }

    /// Nanoseconds between samples, `(end - start) / (n - 1)`; 0 for one sample
    pub fn sample_interval_ns(&self) -> f64 {
        let len = self.len();
        if len < 2 {
            return 0.0;
        }
        let span_ns = (self.end - self.start)
            .num_nanoseconds()
            .unwrap_or(i64::MAX) as f64;
        span_ns / (len - 1) as f64
    }

    /// Timestamp of every sample, evenly spaced between start and end
    pub fn timestamps(&self) -> Vec<Timestamp> {
        let interval_ns = self.sample_interval_ns();
        (0..self.len())
            .map(|i| self.start + Duration::nanoseconds((i as f64 * interval_ns).round() as i64))
            .collect()
    }

    /// Minimum and maximum of each channel over samples `[from, to)`
    ///
    /// The range is clamped to the waveform; returns `None` when it is empty.
    pub fn amplitude_range(&self, from: usize, to: usize) -> Option<[(f64, f64); CHANNEL_COUNT]> {
        let to = to.min(self.len());
        if from >= to {
            return None;
        }
        let range = |trace: &Vec<f64>| {
            trace[from..to]
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
                    (lo.min(x), hi.max(x))
                })
        };
        Some([
            range(&self.traces[0]),
            range(&self.traces[1]),
            range(&self.traces[2]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metadata() -> TraceMetadata {
        TraceMetadata {
            station: "ARU".to_string(),
            network: "II".to_string(),
            channels: ["BHE".to_string(), "BHN".to_string(), "BHZ".to_string()],
            source: None,
        }
    }

    fn start() -> Timestamp {
        Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap()
    }

    fn sine_waveform(len: usize, rate: f64) -> Waveform {
        let trace = |phase: f64| -> Vec<f64> {
            (0..len)
                .map(|i| (2.0 * std::f64::consts::PI * 3.0 * i as f64 / rate + phase).sin())
                .collect()
        };
        Waveform::new(metadata(), start(), rate, [trace(0.0), trace(1.0), trace(2.0)]).unwrap()
    }

    #[test]
    fn test_new_validates_channels() {
        let ok = vec![0.0; 10];
        assert!(Waveform::new(metadata(), start(), 100.0, [ok.clone(), ok.clone(), vec![0.0; 9]])
            .is_err());
        assert!(Waveform::new(metadata(), start(), 100.0, [vec![], vec![], vec![]]).is_err());
        assert!(Waveform::new(metadata(), start(), 0.0, [ok.clone(), ok.clone(), ok]).is_err());
    }

    #[test]
    fn test_resample_keeps_channels_aligned() {
        let mut waveform = sine_waveform(1001, 200.0);
        waveform
            .resample(100.0, InterpolationMethod::WeightedAverageSlopes)
            .unwrap();
        assert_eq!(waveform.sampling_rate(), 100.0);
        assert_eq!(waveform.len(), 501);
        assert!(waveform.traces().iter().all(|t| t.len() == 501));
        assert_eq!(waveform.end_time() - waveform.start_time(), Duration::seconds(5));
        assert_eq!(waveform.original_sampling_rate(), 200.0);
    }

    #[test]
    fn test_resample_same_rate_is_noop() {
        let mut waveform = sine_waveform(300, 100.0);
        let before = waveform.traces().clone();
        waveform.resample(100.0, InterpolationMethod::Linear).unwrap();
        assert_eq!(waveform.traces(), &before);
    }

    #[test]
    fn test_failed_filter_leaves_samples_identical() {
        let mut waveform = sine_waveform(500, 100.0);
        let before: Vec<Vec<u64>> = waveform
            .traces()
            .iter()
            .map(|t| t.iter().map(|x| x.to_bits()).collect())
            .collect();

        let result = waveform.apply_filter(4, FilterBand::Single(-5.0), FilterKind::Lowpass);
        assert!(matches!(result, Err(PickerError::InvalidFilterParameter(_))));

        let after: Vec<Vec<u64>> = waveform
            .traces()
            .iter()
            .map(|t| t.iter().map(|x| x.to_bits()).collect())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_filter_then_reset_restores_original() {
        let mut waveform = sine_waveform(600, 200.0);
        let loaded = waveform.traces().clone();
        waveform
            .resample(100.0, InterpolationMethod::WeightedAverageSlopes)
            .unwrap();
        let resampled = waveform.traces().clone();

        waveform
            .apply_filter(2, FilterBand::Pair(1.0, 10.0), FilterKind::Bandpass)
            .unwrap();
        assert_ne!(waveform.traces(), &resampled);

        waveform
            .reset(100.0, InterpolationMethod::WeightedAverageSlopes)
            .unwrap();
        assert_eq!(waveform.traces(), &resampled);

        waveform
            .reset(200.0, InterpolationMethod::WeightedAverageSlopes)
            .unwrap();
        assert_eq!(waveform.traces(), &loaded);
    }

    #[test]
    fn test_timestamps_evenly_spaced() {
        let waveform = sine_waveform(11, 10.0);
        let times = waveform.timestamps();
        assert_eq!(times.len(), 11);
        assert_eq!(times[0], start());
        assert_eq!(times[10], start() + Duration::seconds(1));
        assert_eq!(times[3] - times[2], Duration::milliseconds(100));
    }

    #[test]
    fn test_reported_end_time_sets_spacing() {
        let waveform = sine_waveform(11, 10.0)
            .with_end_time(start() + Duration::milliseconds(1_100))
            .unwrap();
        assert_eq!(waveform.sample_interval_ns(), 110_000_000.0);
        let times = waveform.timestamps();
        assert_eq!(times[10], start() + Duration::milliseconds(1_100));
        assert_eq!(times[5] - times[4], Duration::milliseconds(110));

        assert!(sine_waveform(11, 10.0)
            .with_end_time(start() - Duration::seconds(1))
            .is_err());
    }

    #[test]
    fn test_resample_keeps_reported_end() {
        let end = start() + Duration::milliseconds(5_004);
        let mut waveform = sine_waveform(1001, 200.0).with_end_time(end).unwrap();
        waveform
            .resample(100.0, InterpolationMethod::Linear)
            .unwrap();
        assert_eq!(waveform.end_time(), end);
        assert_eq!(waveform.timestamps()[waveform.len() - 1], end);
    }

    #[test]
    fn test_generation_tracks_sample_changes() {
        let mut waveform = sine_waveform(600, 200.0);
        assert_eq!(waveform.generation(), 0);

        waveform.resample(200.0, InterpolationMethod::Linear).unwrap();
        assert_eq!(waveform.generation(), 0);
        assert!(waveform
            .apply_filter(4, FilterBand::Single(-5.0), FilterKind::Lowpass)
            .is_err());
        assert_eq!(waveform.generation(), 0);

        waveform.resample(100.0, InterpolationMethod::Linear).unwrap();
        let resampled = waveform.generation();
        assert!(resampled > 0);
        waveform
            .apply_filter(4, FilterBand::Single(1.0), FilterKind::Highpass)
            .unwrap();
        let filtered = waveform.generation();
        assert!(filtered > resampled);
        waveform.reset(100.0, InterpolationMethod::Linear).unwrap();
        assert!(waveform.generation() > filtered);
    }

    #[test]
    fn test_amplitude_range() {
        let ramp: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let neg: Vec<f64> = ramp.iter().map(|x| -x).collect();
        let waveform =
            Waveform::new(metadata(), start(), 1.0, [ramp.clone(), neg, ramp]).unwrap();
        let ranges = waveform.amplitude_range(2, 5).unwrap();
        assert_eq!(ranges[0], (2.0, 4.0));
        assert_eq!(ranges[1], (-4.0, -2.0));
        assert_eq!(waveform.amplitude_range(8, 100).unwrap()[2], (8.0, 9.0));
        assert!(waveform.amplitude_range(5, 5).is_none());
    }
}
