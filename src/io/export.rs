//! RAW and PKS text exports
//!
//! RAW lists every detected candidate with its probabilities; PKS lists the
//! curated picks once per channel with the amplitude at the pick. Each file
//! holds one waveform, one record per line.
//!
//! Numbers use the shortest text that reads back to the same value. Values
//! below `1e-4` or from `1e16` up are written in exponent form with a signed,
//! at least two-digit exponent (`1e-05`, `1.5e+16`) to stay byte-compatible
//! with files written by earlier tools.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::io::waveform::{Timestamp, Waveform, CHANNEL_COUNT};

/// UTC timestamp layout of PKS lines (microsecond precision)
pub const PKS_TIME_FORMAT: &str = "%Y%m%d%H%M%S%6f";

/// Export file type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    /// Candidate dump with probabilities
    Raw,
    /// Curated pick list
    Pks,
}

impl ExportFormat {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Raw => "raw",
            ExportFormat::Pks => "pks",
        }
    }
}

/// One candidate row of a RAW export
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRow {
    /// Sample index of the candidate window
    pub sample: usize,
    /// Probability of the row's class
    pub class_probability: f32,
    /// Probability of noise
    pub noise_probability: f32,
}

/// One accepted pick as seen by the PKS writer
#[derive(Debug, Clone, PartialEq)]
pub struct PksEntry {
    /// Phase label, `P` or `S`
    pub label: &'static str,
    /// Pick time
    pub time: Timestamp,
    /// Sample index the amplitude is read from
    pub sample: usize,
}

/// Shortest round-trip text of an `f64`
pub fn format_f64(value: f64) -> String {
    pad_exponent(format!("{:?}", value))
}

/// Shortest round-trip text of an `f32`
pub fn format_f32(value: f32) -> String {
    pad_exponent(format!("{:?}", value))
}

fn pad_exponent(text: String) -> String {
    if text == "NaN" {
        return "nan".to_string();
    }
    let Some((mantissa, exponent)) = text.split_once('e') else {
        return text;
    };
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    format!("{}e{}{:0>2}", mantissa, sign, digits)
}

/// Build RAW lines: `P`, the P rows, `S`, the S rows
pub fn raw_lines(p_rows: &[RawRow], s_rows: &[RawRow]) -> Vec<String> {
    let mut lines = Vec::with_capacity(p_rows.len() + s_rows.len() + 2);
    for (label, rows) in [("P", p_rows), ("S", s_rows)] {
        lines.push(label.to_string());
        lines.extend(rows.iter().map(|row| {
            format!(
                "{} {} {}",
                row.sample,
                format_f32(row.class_probability),
                format_f32(row.noise_probability)
            )
        }));
    }
    lines
}

/// Build PKS lines, one per pick and channel
///
/// Each line reads
/// `#T<station> <channel> <network> <label> ? e <YYYYMMDDHHMMSSffffff> <amplitude>`.
pub fn pks_lines(waveform: &Waveform, entries: &[PksEntry]) -> Vec<String> {
    let metadata = waveform.metadata();
    let last = waveform.len() - 1;
    let mut lines = Vec::with_capacity(entries.len() * CHANNEL_COUNT);

    for entry in entries {
        let stamp = entry.time.format(PKS_TIME_FORMAT);
        let sample = entry.sample.min(last);
        for channel in 0..CHANNEL_COUNT {
            lines.push(format!(
                "#T{} {} {} {} ? e {} {}",
                metadata.station,
                metadata.channels[channel],
                metadata.network,
                entry.label,
                stamp,
                format_f64(waveform.trace(channel)[sample])
            ));
        }
    }
    lines
}

/// Output path for one waveform
///
/// A single export writes to `<base>.<ext>`; a sequence export names each
/// file `<base>_<source file name>_<station>.<ext>`.
pub fn export_path(base: &Path, waveform: &Waveform, format: ExportFormat, as_sequence: bool) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    if as_sequence {
        let file_name = waveform
            .metadata()
            .source
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push(format!("_{}_{}", file_name, waveform.station()));
    }
    name.push(".");
    name.push(format.extension());
    PathBuf::from(name)
}

/// Write lines to `path`, each terminated by a newline
pub fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut content = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    fs::write(path, content)?;
    log::debug!("Wrote {} lines to {}", lines.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::waveform::TraceMetadata;
    use chrono::{Duration, TimeZone, Utc};

    fn waveform() -> Waveform {
        let metadata = TraceMetadata {
            station: "BRVK".to_string(),
            network: "KZ".to_string(),
            channels: ["BHN".to_string(), "BHE".to_string(), "BHZ".to_string()],
            source: Some(PathBuf::from("/data/event_01.mseed")),
        };
        let ramp: Vec<f64> = (0..100).map(|i| i as f64 * 0.5).collect();
        let neg: Vec<f64> = ramp.iter().map(|x| -x).collect();
        Waveform::new(
            metadata,
            Utc.with_ymd_and_hms(2019, 7, 30, 12, 0, 0).unwrap(),
            100.0,
            [ramp.clone(), neg, ramp],
        )
        .unwrap()
    }

    #[test]
    fn test_raw_layout() {
        let p = [RawRow {
            sample: 40,
            class_probability: 0.5,
            noise_probability: 0.25,
        }];
        let lines = raw_lines(&p, &[]);
        assert_eq!(lines, vec!["P", "40 0.5 0.25", "S"]);
    }

    #[test]
    fn test_number_text() {
        assert_eq!(format_f64(10.0), "10.0");
        assert_eq!(format_f64(-0.5), "-0.5");
        assert_eq!(format_f64(0.0001), "0.0001");
        assert_eq!(format_f64(1e-5), "1e-05");
        assert_eq!(format_f64(-2.5e-7), "-2.5e-07");
        assert_eq!(format_f64(1e16), "1e+16");
        assert_eq!(format_f64(1.5e300), "1.5e+300");
        assert_eq!(format_f64(f64::NAN), "nan");
        assert_eq!(format_f64(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_f32(0.1), "0.1");
        assert_eq!(format_f32(3e-6), "3e-06");
    }

    #[test]
    fn test_raw_small_probabilities() {
        let s = [RawRow {
            sample: 980,
            class_probability: 0.9999,
            noise_probability: 2e-5,
        }];
        let lines = raw_lines(&[], &s);
        assert_eq!(lines, vec!["P", "S", "980 0.9999 2e-05"]);
    }

    #[test]
    fn test_pks_layout() {
        let waveform = waveform();
        let entries = [PksEntry {
            label: "P",
            time: waveform.start_time() + Duration::microseconds(200_123),
            sample: 20,
        }];
        let lines = pks_lines(&waveform, &entries);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "#TBRVK BHN KZ P ? e 20190730120000200123 10.0");
        assert_eq!(lines[1], "#TBRVK BHE KZ P ? e 20190730120000200123 -10.0");
        assert!(lines[2].starts_with("#TBRVK BHZ KZ P"));
    }

    #[test]
    fn test_export_paths() {
        let waveform = waveform();
        let base = Path::new("/out/picks");
        assert_eq!(
            export_path(base, &waveform, ExportFormat::Pks, false),
            PathBuf::from("/out/picks.pks")
        );
        assert_eq!(
            export_path(base, &waveform, ExportFormat::Raw, true),
            PathBuf::from("/out/picks_event_01.mseed_BRVK.raw")
        );
    }

    #[test]
    fn test_write_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.raw");
        write_lines(&path, &["P".to_string(), "S".to_string()]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "P\nS\n");
    }
}
