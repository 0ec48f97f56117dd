//! Waveform input contract
//!
//! Decoding seismic file formats is left to the caller: anything that can
//! produce single-channel [`TraceRecord`]s implements [`WaveformSource`].
//! Records are grouped into three-component [`Waveform`]s by station and
//! channel, and a source that fails to read or group is skipped so the rest
//! of a batch still loads.

use std::path::PathBuf;

use crate::config::PickerConfig;
use crate::error::{PickerError, Result};
use crate::io::waveform::{Timestamp, TraceMetadata, Waveform};

/// One channel as produced by an external reader
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    /// Station code
    pub station: String,
    /// Network code
    pub network: String,
    /// Channel code, e.g. `BHZ`
    pub channel: String,
    /// Time of the first sample
    pub start: Timestamp,
    /// Time of the last sample as the file reports it; derived from the rate
    /// when absent
    pub end: Option<Timestamp>,
    /// Sampling rate in Hz
    pub sampling_rate: f64,
    /// Samples
    pub samples: Vec<f64>,
}

/// Something that yields trace records, typically one file
pub trait WaveformSource {
    /// Label used in logs and failure reports
    fn name(&self) -> String;

    /// Path of the underlying file, if there is one
    fn path(&self) -> Option<PathBuf> {
        None
    }

    /// Read every channel the source holds
    fn read(&self) -> Result<Vec<TraceRecord>>;
}

/// Source over records already in memory
#[derive(Debug, Clone)]
pub struct InMemorySource {
    name: String,
    records: Vec<TraceRecord>,
}

impl InMemorySource {
    /// Wrap records under a display name
    pub fn new(name: impl Into<String>, records: Vec<TraceRecord>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }
}

impl WaveformSource for InMemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read(&self) -> Result<Vec<TraceRecord>> {
        Ok(self.records.clone())
    }
}

/// Outcome of loading a batch of sources
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Waveforms in source order, triads in station order within a source
    pub waveforms: Vec<Waveform>,
    /// Skipped sources with the reason
    pub failures: Vec<(String, PickerError)>,
}

/// Group records into three-component waveforms
///
/// Records are sorted by `(station, channel)` and taken three at a time; the
/// first two members of each triad are then swapped, so a sorted
/// `E, N, Z` group is stored as `N, E, Z`.
///
/// # Errors
///
/// Returns `PickerError::LoadFailure` if the record count is not a multiple
/// of three or a triad's records cannot form a waveform (mixed rates or
/// lengths).
pub fn group_into_triads(mut records: Vec<TraceRecord>, source: Option<PathBuf>) -> Result<Vec<Waveform>> {
    if records.len() % 3 != 0 {
        return Err(PickerError::LoadFailure(format!(
            "{} channels cannot be grouped into three-component recordings",
            records.len()
        )));
    }

    records.sort_by(|a, b| (&a.station, &a.channel).cmp(&(&b.station, &b.channel)));

    records
        .chunks_mut(3)
        .map(|triad| {
            triad.swap(0, 1);
            build_waveform(triad, source.clone())
        })
        .collect()
}

fn build_waveform(triad: &[TraceRecord], source: Option<PathBuf>) -> Result<Waveform> {
    let first = &triad[0];
    if triad.iter().any(|r| r.sampling_rate != first.sampling_rate) {
        return Err(PickerError::LoadFailure(format!(
            "Station {} mixes sampling rates",
            first.station
        )));
    }

    let metadata = TraceMetadata {
        station: first.station.clone(),
        network: first.network.clone(),
        channels: [
            triad[0].channel.clone(),
            triad[1].channel.clone(),
            triad[2].channel.clone(),
        ],
        source,
    };
    let traces = [
        triad[0].samples.clone(),
        triad[1].samples.clone(),
        triad[2].samples.clone(),
    ];

    let waveform = Waveform::new(metadata, first.start, first.sampling_rate, traces)
        .and_then(|w| match first.end {
            Some(end) => w.with_end_time(end),
            None => Ok(w),
        });
    waveform.map_err(|e| PickerError::LoadFailure(format!("Station {}: {}", first.station, e)))
}

/// Load every source, resampling each waveform to the model rate
///
/// A source that fails is logged, recorded in the report and skipped.
pub fn load_waveforms(sources: &[&dyn WaveformSource], config: &PickerConfig) -> LoadReport {
    let mut report = LoadReport::default();

    for source in sources {
        let name = source.name();
        let loaded = source
            .read()
            .and_then(|records| group_into_triads(records, source.path()))
            .and_then(|mut waveforms| {
                for waveform in waveforms.iter_mut() {
                    waveform.resample(config.model_sampling_rate, config.interpolation)?;
                }
                Ok(waveforms)
            });

        match loaded {
            Ok(waveforms) => {
                log::debug!("Loaded {} waveform(s) from {}", waveforms.len(), name);
                report.waveforms.extend(waveforms);
            }
            Err(e) => {
                log::warn!("Skipping {}: {}", name, e);
                report.failures.push((name, e));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    struct BrokenSource;

    impl WaveformSource for BrokenSource {
        fn name(&self) -> String {
            "broken.mseed".to_string()
        }

        fn read(&self) -> Result<Vec<TraceRecord>> {
            Err(PickerError::LoadFailure("bad header".to_string()))
        }
    }

    fn record(station: &str, channel: &str, value: f64) -> TraceRecord {
        TraceRecord {
            station: station.to_string(),
            network: "KZ".to_string(),
            channel: channel.to_string(),
            start: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            end: None,
            sampling_rate: 100.0,
            samples: vec![value; 50],
        }
    }

    #[test]
    fn test_grouping_sorts_and_swaps() {
        let records = vec![
            record("MKAR", "BHZ", 3.0),
            record("AKTK", "BHN", 5.0),
            record("MKAR", "BHE", 1.0),
            record("AKTK", "BHE", 4.0),
            record("MKAR", "BHN", 2.0),
            record("AKTK", "BHZ", 6.0),
        ];
        let waveforms = group_into_triads(records, None).unwrap();
        assert_eq!(waveforms.len(), 2);
        assert_eq!(waveforms[0].station(), "AKTK");
        assert_eq!(waveforms[0].metadata().channels, ["BHN", "BHE", "BHZ"]);
        assert_eq!(waveforms[0].trace(0)[0], 5.0);
        assert_eq!(waveforms[1].station(), "MKAR");
        assert_eq!(waveforms[1].trace(1)[0], 1.0);
    }

    #[test]
    fn test_reported_end_time_is_kept() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::milliseconds(500);
        let records: Vec<TraceRecord> = ["BHE", "BHN", "BHZ"]
            .iter()
            .map(|channel| TraceRecord {
                end: Some(end),
                ..record("MKAR", channel, 1.0)
            })
            .collect();
        let waveforms = group_into_triads(records, None).unwrap();
        assert_eq!(waveforms[0].end_time(), end);
        // 50 samples over 0.5 s instead of the 0.49 s the rate implies
        assert_eq!(waveforms[0].sample_interval_ns(), 500_000_000.0 / 49.0);

        let derived = group_into_triads(
            vec![
                record("MKAR", "BHE", 0.0),
                record("MKAR", "BHN", 0.0),
                record("MKAR", "BHZ", 0.0),
            ],
            None,
        )
        .unwrap();
        assert_eq!(derived[0].end_time(), start + chrono::Duration::milliseconds(490));
    }

    #[test]
    fn test_end_before_start_rejected() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let records: Vec<TraceRecord> = ["BHE", "BHN", "BHZ"]
            .iter()
            .map(|channel| TraceRecord {
                end: Some(start - chrono::Duration::seconds(1)),
                ..record("MKAR", channel, 1.0)
            })
            .collect();
        assert!(matches!(
            group_into_triads(records, None),
            Err(PickerError::LoadFailure(_))
        ));
    }

    #[test]
    fn test_incomplete_triad_rejected() {
        let records = vec![record("MKAR", "BHZ", 0.0), record("MKAR", "BHE", 0.0)];
        assert!(matches!(
            group_into_triads(records, None),
            Err(PickerError::LoadFailure(_))
        ));
    }

    #[test]
    fn test_failed_source_is_skipped() {
        let good = InMemorySource::new(
            "good.mseed",
            vec![
                record("MKAR", "BHE", 0.0),
                record("MKAR", "BHN", 0.0),
                record("MKAR", "BHZ", 0.0),
            ],
        );
        let short = InMemorySource::new("short.mseed", vec![record("MKAR", "BHE", 0.0)]);
        let sources: Vec<&dyn WaveformSource> = vec![&BrokenSource, &good, &short];

        let report = load_waveforms(&sources, &PickerConfig::default());
        assert_eq!(report.waveforms.len(), 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].0, "broken.mseed");
        assert_eq!(report.failures[1].0, "short.mseed");
    }
}
