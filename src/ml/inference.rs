//! Batched inference with progress reporting and cooperative cancellation
//!
//! [`InferenceService`] owns one classifier and is built once, then shared by
//! reference (or `Arc`) with every session that needs predictions. A batch is
//! processed in fixed-size sub-batches; the [`ProgressObserver`] hears about
//! each finished sub-batch and the [`CancelToken`] is checked before each one.
//!
//! # Example
//!
//! ```
//! use ndarray::Array3;
//! use phase_picker::ml::inference::{CancelToken, ComputeBackend, InferenceService, NoProgress};
//! use phase_picker::ml::resnet::ResNetClassifier;
//! use phase_picker::ml::weights::ModelWeights;
//!
//! let model = ResNetClassifier::new(&ModelWeights::he_normal(0))?;
//! let service = InferenceService::new(model, 32, ComputeBackend::Sequential)?;
//! let batch = Array3::<f32>::zeros((0, 400, 3));
//! let table = service.predict(batch.view(), &mut NoProgress, &CancelToken::new())?;
//! assert_eq!(table.dim(), (0, 3));
//! # Ok::<(), phase_picker::PickerError>(())
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{s, Array2, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::PickerConfig;
use crate::error::{PickerError, Result};
use crate::ml::resnet::{ResNetClassifier, CLASS_COUNT};

/// Class probabilities of one window: `[P, S, noise]`
pub type Probabilities = [f32; CLASS_COUNT];

/// A classifier that scores one `(samples, channels)` window at a time
pub trait PhaseModel: Send + Sync {
    /// Probabilities of one window, summing to 1
    fn predict_window(&self, window: ArrayView2<'_, f32>) -> Result<Probabilities>;
}

/// Compute path used for the windows of a sub-batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComputeBackend {
    /// Parallel when more than one CPU is available, otherwise sequential
    #[default]
    Auto,
    /// One window after another on the calling thread
    Sequential,
    /// Windows spread over the rayon thread pool
    Parallel,
}

impl ComputeBackend {
    /// Replace `Auto` with the concrete backend for this machine
    pub fn resolve(self) -> Self {
        match self {
            ComputeBackend::Auto => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                if cpus > 1 {
                    ComputeBackend::Parallel
                } else {
                    ComputeBackend::Sequential
                }
            }
            other => other,
        }
    }
}

/// Receives progress while a batch is classified
pub trait ProgressObserver {
    /// Called once before the first sub-batch
    fn on_begin(&mut self, _total_batches: usize) {}

    /// Called after every sub-batch with the fraction of windows done
    fn on_batch_end(&mut self, fraction: f32);

    /// Called once after the last sub-batch
    fn on_end(&mut self) {}
}

/// Observer that ignores progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_batch_end(&mut self, _fraction: f32) {}
}

/// Adapts a closure to [`ProgressObserver`]
pub struct ProgressFn<F>(pub F);

impl<F: FnMut(f32)> ProgressObserver for ProgressFn<F> {
    fn on_batch_end(&mut self, fraction: f32) {
        (self.0)(fraction)
    }
}

/// Shared flag asking a running inference to stop
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; seen before the next sub-batch starts
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Classifier plus batching policy
pub struct InferenceService {
    model: Box<dyn PhaseModel>,
    batch_size: usize,
    backend: ComputeBackend,
}

impl std::fmt::Debug for InferenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceService")
            .field("batch_size", &self.batch_size)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl InferenceService {
    /// Wrap a model
    ///
    /// # Errors
    ///
    /// Returns `PickerError::InvalidInput` if `batch_size` is zero.
    pub fn new(
        model: impl PhaseModel + 'static,
        batch_size: usize,
        backend: ComputeBackend,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(PickerError::InvalidInput("Batch size must be > 0".to_string()));
        }
        let backend = backend.resolve();
        log::info!(
            "Inference service ready: {:?} backend, batch size {}",
            backend,
            batch_size
        );
        Ok(Self {
            model: Box::new(model),
            batch_size,
            backend,
        })
    }

    /// Load the residual classifier from `config.weights_path`
    pub fn from_config(config: &PickerConfig) -> Result<Self> {
        let model = ResNetClassifier::from_file(&config.weights_path)?;
        Self::new(model, config.batch_size, config.backend)
    }

    /// Resolved compute backend
    pub fn backend(&self) -> ComputeBackend {
        self.backend
    }

    /// Windows per sub-batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Classify a `(N, samples, channels)` batch into an `(N, 3)` table
    ///
    /// An empty batch yields an empty table without touching the model.
    ///
    /// # Errors
    ///
    /// `PickerError::Cancelled` when `cancel` is set before a sub-batch (any
    /// finished rows are discarded), or the model's own error.
    pub fn predict(
        &self,
        batch: ArrayView3<'_, f32>,
        observer: &mut dyn ProgressObserver,
        cancel: &CancelToken,
    ) -> Result<Array2<f32>> {
        let n = batch.len_of(Axis(0));
        let mut table = Array2::<f32>::zeros((n, CLASS_COUNT));
        if n == 0 {
            log::debug!("Empty window batch, classifier not invoked");
            return Ok(table);
        }

        let total = n.div_ceil(self.batch_size);
        log::debug!(
            "Classifying {} windows in {} sub-batches ({:?})",
            n,
            total,
            self.backend
        );
        observer.on_begin(total);

        for index in 0..total {
            if cancel.is_cancelled() {
                log::warn!("Inference cancelled after {} of {} sub-batches", index, total);
                return Err(PickerError::Cancelled {
                    completed: index,
                    total,
                });
            }

            let start = index * self.batch_size;
            let end = (start + self.batch_size).min(n);
            let rows = self.predict_range(batch.slice(s![start..end, .., ..]))?;
            for (offset, probs) in rows.iter().enumerate() {
                for (c, &p) in probs.iter().enumerate() {
                    table[[start + offset, c]] = p;
                }
            }

            observer.on_batch_end(end as f32 / n as f32);
        }

        observer.on_end();
        Ok(table)
    }

    fn predict_range(&self, windows: ArrayView3<'_, f32>) -> Result<Vec<Probabilities>> {
        match self.backend {
            ComputeBackend::Parallel => (0..windows.len_of(Axis(0)))
                .into_par_iter()
                .map(|i| self.model.predict_window(windows.index_axis(Axis(0), i)))
                .collect(),
            _ => windows
                .axis_iter(Axis(0))
                .map(|window| self.model.predict_window(window))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::sync::atomic::AtomicUsize;

    /// Scores a window by its mean sample value
    struct MeanModel {
        calls: Arc<AtomicUsize>,
    }

    impl PhaseModel for MeanModel {
        fn predict_window(&self, window: ArrayView2<'_, f32>) -> Result<Probabilities> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let m = window.mean().unwrap_or(0.0).clamp(0.0, 1.0);
            Ok([m * 0.5, m * 0.5, 1.0 - m])
        }
    }

    fn service(batch_size: usize, backend: ComputeBackend) -> (InferenceService, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = MeanModel {
            calls: Arc::clone(&calls),
        };
        (InferenceService::new(model, batch_size, backend).unwrap(), calls)
    }

    fn batch(n: usize) -> Array3<f32> {
        Array3::from_shape_fn((n, 400, 3), |(w, _, _)| w as f32 / n as f32)
    }

    #[derive(Default)]
    struct Recorder {
        begun: Option<usize>,
        fractions: Vec<f32>,
        ended: bool,
    }

    impl ProgressObserver for Recorder {
        fn on_begin(&mut self, total_batches: usize) {
            self.begun = Some(total_batches);
        }
        fn on_batch_end(&mut self, fraction: f32) {
            self.fractions.push(fraction);
        }
        fn on_end(&mut self) {
            self.ended = true;
        }
    }

    #[test]
    fn test_empty_batch_skips_model() {
        let (service, calls) = service(32, ComputeBackend::Sequential);
        let table = service
            .predict(batch(0).view(), &mut NoProgress, &CancelToken::new())
            .unwrap();
        assert_eq!(table.dim(), (0, 3));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_progress_per_sub_batch() {
        let (service, calls) = service(32, ComputeBackend::Sequential);
        let mut recorder = Recorder::default();
        let table = service
            .predict(batch(70).view(), &mut recorder, &CancelToken::new())
            .unwrap();

        assert_eq!(table.dim(), (70, 3));
        assert_eq!(calls.load(Ordering::SeqCst), 70);
        assert_eq!(recorder.begun, Some(3));
        assert_eq!(recorder.fractions, vec![32.0 / 70.0, 64.0 / 70.0, 1.0]);
        assert!(recorder.ended);
        for row in table.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_backends_agree() {
        let (sequential, _) = service(8, ComputeBackend::Sequential);
        let (parallel, _) = service(8, ComputeBackend::Parallel);
        let windows = batch(20);
        let a = sequential
            .predict(windows.view(), &mut NoProgress, &CancelToken::new())
            .unwrap();
        let b = parallel
            .predict(windows.view(), &mut NoProgress, &CancelToken::new())
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cancel_between_sub_batches() {
        let (service, calls) = service(10, ComputeBackend::Sequential);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let mut observer = ProgressFn(move |fraction: f32| {
            if fraction >= 0.2 {
                trigger.cancel();
            }
        });

        let result = service.predict(batch(50).view(), &mut observer, &cancel);
        assert_eq!(
            result,
            Err(PickerError::Cancelled {
                completed: 1,
                total: 5
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        assert!(InferenceService::new(MeanModel { calls }, 0, ComputeBackend::Auto).is_err());
    }

    #[test]
    fn test_auto_resolves() {
        assert_ne!(ComputeBackend::Auto.resolve(), ComputeBackend::Auto);
        assert_eq!(ComputeBackend::Parallel.resolve(), ComputeBackend::Parallel);
    }
}
