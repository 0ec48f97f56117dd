//! Example: Pick many waveform files in parallel
//!
//! Usage:
//!   cargo run --release --example pick_batch -- [--jobs N] [--config picker.toml] [--out base] <file1.json> ...
//!
//! Each input is a JSON array of channel records:
//! `{"station", "network", "channel", "start", "sampling_rate", "samples"}`.
//! Files that cannot be read or grouped into three-component recordings are
//! reported and skipped.
//!
//! Notes:
//! - Parallelism is across waveforms; each waveform runs sequentially.
//! - Default workers: (available CPU threads - 1).

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use phase_picker::io::loader::{TraceRecord, WaveformSource};
use phase_picker::ml::inference::ComputeBackend;
use phase_picker::{
    CancelToken, ExportFormat, InferenceService, PhaseClass, PickerConfig, PickerError, Workspace,
};
use serde::Deserialize;

#[derive(Deserialize)]
struct JsonRecord {
    station: String,
    network: String,
    channel: String,
    start: DateTime<Utc>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
    sampling_rate: f64,
    samples: Vec<f64>,
}

struct JsonSource(PathBuf);

impl WaveformSource for JsonSource {
    fn name(&self) -> String {
        self.0.display().to_string()
    }

    fn path(&self) -> Option<PathBuf> {
        Some(self.0.clone())
    }

    fn read(&self) -> phase_picker::Result<Vec<TraceRecord>> {
        let content = fs::read_to_string(&self.0)?;
        let records: Vec<JsonRecord> = serde_json::from_str(&content)
            .map_err(|e| PickerError::LoadFailure(e.to_string()))?;
        Ok(records
            .into_iter()
            .map(|r| TraceRecord {
                station: r.station,
                network: r.network,
                channel: r.channel,
                start: r.start,
                end: r.end,
                sampling_rate: r.sampling_rate,
                samples: r.samples,
            })
            .collect())
    }
}

fn default_jobs() -> usize {
    let n = std::thread::available_parallelism().map(|v| v.get()).unwrap_or(1);
    std::cmp::max(1, n.saturating_sub(1))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let mut jobs: Option<usize> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut out: Option<PathBuf> = None;
    let mut paths: Vec<PathBuf> = Vec::new();

    while let Some(a) = args.first().cloned() {
        args.remove(0);
        match a.as_str() {
            "--jobs" => {
                let v = args
                    .first()
                    .ok_or("--jobs requires a value")?
                    .parse::<usize>()?;
                args.remove(0);
                jobs = Some(std::cmp::max(1, v));
            }
            "--config" => {
                config_path = Some(args.first().ok_or("--config requires a path")?.into());
                args.remove(0);
            }
            "--out" => {
                out = Some(args.first().ok_or("--out requires a path")?.into());
                args.remove(0);
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: pick_batch [--jobs N] [--config picker.toml] [--out base] <file1.json> ...\n\
                     \n\
                     --jobs N   Parallel workers (default: CPU-1)\n\
                     --config   TOML configuration (default: built-in defaults)\n\
                     --out      Write <base>_<file>_<station>.pks for every waveform\n"
                );
                return Ok(());
            }
            _ => paths.push(a.into()),
        }
    }

    if paths.is_empty() {
        eprintln!("ERROR: Provide at least one waveform file. Use --help for usage.");
        std::process::exit(2);
    }

    let mut config = match &config_path {
        Some(path) => PickerConfig::from_toml_file(path)?,
        None => PickerConfig::default(),
    };
    config.backend = ComputeBackend::Sequential;
    let service = InferenceService::from_config(&config)?;

    let sources: Vec<JsonSource> = paths.into_iter().map(JsonSource).collect();
    let sources: Vec<&dyn WaveformSource> = sources.iter().map(|s| s as &dyn WaveformSource).collect();

    let mut workspace = Workspace::new(config);
    for (name, error) in workspace.load(&sources) {
        eprintln!("SKIP {}: {}", name, error);
    }
    workspace.select_all(true);

    let jobs = jobs.unwrap_or_else(default_jobs);
    eprintln!("Batch: {} waveforms, jobs={}", workspace.len(), jobs);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;

    let t0 = Instant::now();
    let outcomes = pool.install(|| {
        workspace.run_inference_on_selected(&service, &CancelToken::new(), |_, _| {})
    });

    for (index, outcome) in &outcomes {
        let session = &workspace.sessions()[*index];
        match outcome {
            Ok(()) => println!(
                "{:<8} P={:<3} S={:<3}",
                session.waveform().station(),
                session.picks().picks(PhaseClass::P).len(),
                session.picks().picks(PhaseClass::S).len()
            ),
            Err(e) => println!("{:<8} ERROR {}", session.waveform().station(), e),
        }
    }
    eprintln!("Done in {:.2} s", t0.elapsed().as_secs_f64());

    if let Some(base) = out {
        for path in workspace.export_selected(ExportFormat::Pks, &base, true)? {
            eprintln!("Wrote {}", path.display());
        }
    }

    Ok(())
}
