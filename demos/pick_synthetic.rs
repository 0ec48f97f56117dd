//! Example: Pick a synthetic three-component event
//!
//! Usage:
//!   cargo run --release --example pick_synthetic -- [--weights model.json] [--out picks]
//!
//! Without `--weights` the classifier runs on seeded random weights, which
//! exercises the whole pipeline but produces meaningless picks.

use std::env;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{TimeZone, Utc};
use phase_picker::ml::resnet::ResNetClassifier;
use phase_picker::ml::weights::ModelWeights;
use phase_picker::{
    pick_waveform, ExportFormat, FilterBand, FilterKind, InferenceService, PhaseClass,
    PickerConfig, TraceMetadata, Waveform,
};

fn synthetic_event(rate: f64, seconds: f64) -> Waveform {
    let len = (rate * seconds) as usize;
    let wavelet = |i: usize, onset: f64, freq: f64, amp: f64| {
        let t = i as f64 / rate - onset;
        if t < 0.0 {
            0.0
        } else {
            amp * (-t / 1.5).exp() * (2.0 * std::f64::consts::PI * freq * t).sin()
        }
    };
    let hum = |i: usize, phase: f64| 0.02 * (i as f64 * 0.37 + phase).sin();

    let n = (0..len).map(|i| wavelet(i, 14.0, 2.5, 1.6) + hum(i, 0.0)).collect();
    let e = (0..len).map(|i| wavelet(i, 14.1, 2.2, 1.3) + hum(i, 1.0)).collect();
    let z = (0..len).map(|i| wavelet(i, 8.0, 6.0, 0.9) + hum(i, 2.0)).collect();

    let metadata = TraceMetadata {
        station: "SYN".to_string(),
        network: "XX".to_string(),
        channels: ["HHN".to_string(), "HHE".to_string(), "HHZ".to_string()],
        source: None,
    };
    let start = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default();
    Waveform::new(metadata, start, rate, [n, e, z]).unwrap_or_else(|e| {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let mut weights: Option<PathBuf> = None;
    let mut out: Option<PathBuf> = None;

    while let Some(a) = args.first().cloned() {
        args.remove(0);
        match a.as_str() {
            "--weights" => {
                weights = Some(args.first().ok_or("--weights requires a path")?.into());
                args.remove(0);
            }
            "--out" => {
                out = Some(args.first().ok_or("--out requires a path")?.into());
                args.remove(0);
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: pick_synthetic [--weights model.json] [--out base]\n\
                     \n\
                     --weights  Trained weight artifact (default: seeded random weights)\n\
                     --out      Write <base>.pks and <base>.raw\n"
                );
                return Ok(());
            }
            other => return Err(format!("Unknown argument: {}", other).into()),
        }
    }

    let config = PickerConfig::default();
    let service = match &weights {
        Some(path) => InferenceService::new(
            ResNetClassifier::from_file(path)?,
            config.batch_size,
            config.backend,
        )?,
        None => {
            eprintln!("No --weights given, using seeded random weights");
            InferenceService::new(
                ResNetClassifier::new(&ModelWeights::he_normal(2024))?,
                config.batch_size,
                config.backend,
            )?
        }
    };

    let mut waveform = synthetic_event(200.0, 30.0);
    waveform.apply_filter(4, FilterBand::Pair(1.0, 30.0), FilterKind::Bandpass)?;

    let t0 = Instant::now();
    let session = pick_waveform(waveform, &service, &config)?;
    eprintln!(
        "Classified {} windows in {:.1} ms",
        session.window_count(),
        t0.elapsed().as_secs_f64() * 1000.0
    );

    for class in PhaseClass::ALL {
        let picks = session.picks().picks(class);
        println!("{} picks: {}", class.label(), picks.len());
        for pick in picks {
            if let Some(time) = session.picks().pick_time(pick) {
                println!("  window {:>4}  {}", pick.window, time.format("%H:%M:%S%.3f"));
            }
        }
    }

    if let Some(base) = out {
        for format in [ExportFormat::Pks, ExportFormat::Raw] {
            let path = base.with_extension(format.extension());
            session.write_export(format, &path)?;
            eprintln!("Wrote {}", path.display());
        }
    }

    Ok(())
}
