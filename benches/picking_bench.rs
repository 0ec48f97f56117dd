//! Performance benchmarks for the picking pipeline

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use phase_picker::features::peak_picking::find_candidates;
use phase_picker::features::spectrogram::SpectrogramFrontEnd;
use phase_picker::features::windowing::{extract_windows, WindowParams};
use phase_picker::ml::inference::{ComputeBackend, NoProgress};
use phase_picker::ml::resnet::ResNetClassifier;
use phase_picker::ml::weights::ModelWeights;
use phase_picker::preprocessing::butterworth::ButterworthFilter;
use phase_picker::{
    pick_waveform, CancelToken, FilterBand, FilterKind, InferenceService, PickerConfig,
    TraceMetadata, Waveform,
};

fn waveform(seconds: usize) -> Waveform {
    // 100 Hz, three channels of mixed tones
    let len = seconds * 100;
    let tone = |f: f64| -> Vec<f64> {
        (0..len)
            .map(|i| (i as f64 * f * 2.0 * std::f64::consts::PI / 100.0).sin())
            .collect()
    };
    Waveform::new(
        TraceMetadata::default(),
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        100.0,
        [tone(1.5), tone(3.0), tone(7.0)],
    )
    .unwrap()
}

fn bench_preprocessing(c: &mut Criterion) {
    let samples: Vec<f64> = waveform(600).trace(0).to_vec();
    let filter =
        ButterworthFilter::design(4, FilterBand::Pair(1.0, 20.0), FilterKind::Bandpass, 100.0)
            .unwrap();

    c.bench_function("bandpass_600s", |b| {
        b.iter(|| {
            let mut x = samples.clone();
            filter.apply(black_box(&mut x));
        });
    });

    let wf = waveform(60);
    c.bench_function("extract_windows_60s", |b| {
        b.iter(|| extract_windows(black_box(wf.traces()), &WindowParams::default()));
    });
}

fn bench_classifier(c: &mut Criterion) {
    let wf = waveform(60);
    let windows = extract_windows(wf.traces(), &WindowParams::default());
    let front_end = SpectrogramFrontEnd::new();
    let first = windows.index_axis(ndarray::Axis(0), 0);

    c.bench_function("spectrogram_window", |b| {
        b.iter(|| front_end.transform(black_box(first)));
    });

    let weights = ModelWeights::he_normal(1);
    for backend in [ComputeBackend::Sequential, ComputeBackend::Parallel] {
        let service =
            InferenceService::new(ResNetClassifier::new(&weights).unwrap(), 32, backend).unwrap();
        c.bench_function(&format!("classify_60s_{:?}", backend), |b| {
            b.iter(|| {
                service
                    .predict(black_box(windows.view()), &mut NoProgress, &CancelToken::new())
                    .unwrap()
            });
        });
    }
}

fn bench_picking(c: &mut Criterion) {
    let column = ndarray::Array1::from_iter((0..5000).map(|i| ((i as f32) * 0.37).sin().abs()));
    c.bench_function("find_candidates_5000", |b| {
        b.iter(|| find_candidates(black_box(column.view())));
    });

    let config = PickerConfig {
        backend: ComputeBackend::Parallel,
        ..PickerConfig::default()
    };
    let service = InferenceService::new(
        ResNetClassifier::new(&ModelWeights::he_normal(1)).unwrap(),
        config.batch_size,
        config.backend,
    )
    .unwrap();
    c.bench_function("pick_waveform_30s", |b| {
        b.iter(|| pick_waveform(black_box(waveform(30)), &service, &config).unwrap());
    });
}

criterion_group!(benches, bench_preprocessing, bench_classifier, bench_picking);
criterion_main!(benches);
