//! Per-waveform picking session
//!
//! A [`TraceSession`] ties one [`Waveform`] to its prediction table and
//! [`PickSet`]. It runs the pipeline (windows → classifier → candidates →
//! picks), forwards filter and reset requests to the waveform, and produces
//! the RAW and PKS exports.
//!
//! # Example
//!
//! ```no_run
//! use phase_picker::analysis::session::TraceSession;
//! use phase_picker::ml::inference::{CancelToken, InferenceService, NoProgress};
//! use phase_picker::PickerConfig;
//! # fn load() -> phase_picker::io::waveform::Waveform { unimplemented!() }
//!
//! let config = PickerConfig::default();
//! let service = InferenceService::from_config(&config)?;
//! let mut session = TraceSession::new(load(), &config);
//! session.run_inference(&service, &mut NoProgress, &CancelToken::new())?;
//! for line in session.export_pks() {
//!     println!("{}", line);
//! }
//! # Ok::<(), phase_picker::PickerError>(())
//! ```

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use ndarray::{Array2, Array3};

use crate::analysis::coordinates::CoordinateMapper;
use crate::analysis::picks::{PhaseClass, PickSet, Thresholds, NOISE_COLUMN};
use crate::config::PickerConfig;
use crate::error::{PickerError, Result};
use crate::features::windowing::{extract_windows, WindowParams};
use crate::io::export::{pks_lines, raw_lines, write_lines, ExportFormat, PksEntry, RawRow};
use crate::io::waveform::Waveform;
use crate::ml::inference::{CancelToken, InferenceService, ProgressObserver};
use crate::preprocessing::butterworth::{FilterBand, FilterKind};
use crate::preprocessing::resample::InterpolationMethod;

/// Prediction table produced for one session
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    /// `(window_count, 3)` probabilities
    pub predictions: Array2<f32>,
    /// [`Waveform::generation`] of the samples the table was computed from
    pub generation: u64,
}

/// Inference running on a background thread
#[derive(Debug)]
pub struct InferenceHandle {
    handle: JoinHandle<Result<InferenceOutput>>,
}

impl InferenceHandle {
    /// Whether the worker has finished
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker and take its result
    pub fn join(self) -> Result<InferenceOutput> {
        self.handle
            .join()
            .map_err(|_| PickerError::Internal("Inference worker panicked".to_string()))?
    }
}

/// One waveform with its predictions and picks
#[derive(Debug)]
pub struct TraceSession {
    waveform: Waveform,
    picks: PickSet,
    params: WindowParams,
    thresholds: Thresholds,
    model_rate: f64,
    interpolation: InterpolationMethod,
    selected_for_batch: bool,
}

impl TraceSession {
    /// Start a session on an already prepared waveform
    pub fn new(waveform: Waveform, config: &PickerConfig) -> Self {
        let thresholds = Thresholds::new(config.confidence_threshold, config.noise_threshold);
        Self {
            waveform,
            picks: PickSet::new(thresholds),
            params: WindowParams::from(config),
            thresholds,
            model_rate: config.model_sampling_rate,
            interpolation: config.interpolation,
            selected_for_batch: false,
        }
    }

    /// The waveform
    pub fn waveform(&self) -> &Waveform {
        &self.waveform
    }

    /// The picks
    pub fn picks(&self) -> &PickSet {
        &self.picks
    }

    /// The picks, for editing
    pub fn picks_mut(&mut self) -> &mut PickSet {
        &mut self.picks
    }

    /// Whether batch operations include this session
    pub fn is_selected_for_batch(&self) -> bool {
        self.selected_for_batch
    }

    /// Include or exclude this session from batch operations
    pub fn set_selected_for_batch(&mut self, selected: bool) {
        self.selected_for_batch = selected;
    }

    /// Window geometry
    pub fn window_params(&self) -> WindowParams {
        self.params
    }

    /// Windows over the current samples
    pub fn window_count(&self) -> usize {
        self.params.window_count(self.waveform.len())
    }

    /// Mapper over the current samples
    pub fn mapper(&self) -> CoordinateMapper {
        CoordinateMapper::for_waveform(&self.waveform, self.params.stride, self.window_count())
    }

    /// Window batch of the current samples
    pub fn extract_windows(&self) -> Array3<f32> {
        extract_windows(self.waveform.traces(), &self.params)
    }

    /// Classify the waveform and install the result
    ///
    /// # Errors
    ///
    /// `PickerError::Cancelled` if `cancel` fires; the picks are left as
    /// they were.
    pub fn run_inference(
        &mut self,
        service: &InferenceService,
        observer: &mut dyn ProgressObserver,
        cancel: &CancelToken,
    ) -> Result<()> {
        let windows = self.extract_windows();
        let predictions = service.predict(windows.view(), observer, cancel)?;
        self.install(InferenceOutput {
            predictions,
            generation: self.waveform.generation(),
        })
    }

    /// Classify on a background thread
    ///
    /// The windows are copied up front, so the session stays free for other
    /// work while the worker runs. Pass the result to [`install`](Self::install);
    /// it is refused if the samples were filtered or reset in the meantime.
    pub fn spawn_inference<O>(
        &self,
        service: Arc<InferenceService>,
        mut observer: O,
        cancel: CancelToken,
    ) -> InferenceHandle
    where
        O: ProgressObserver + Send + 'static,
    {
        let windows = self.extract_windows();
        let station = self.waveform.station().to_string();
        let generation = self.waveform.generation();
        let handle = std::thread::spawn(move || {
            log::debug!("Background inference started for {}", station);
            service
                .predict(windows.view(), &mut observer, &cancel)
                .map(|predictions| InferenceOutput {
                    predictions,
                    generation,
                })
        });
        InferenceHandle { handle }
    }

    /// Install predictions and apply the configured thresholds
    ///
    /// # Errors
    ///
    /// `PickerError::InvalidInput` if the table was computed from samples
    /// that have since been resampled, filtered or reset, or does not have
    /// one row per window.
    pub fn install(&mut self, output: InferenceOutput) -> Result<()> {
        if output.generation != self.waveform.generation() {
            log::warn!(
                "Discarding stale predictions for {}",
                self.waveform.station()
            );
            return Err(PickerError::InvalidInput(format!(
                "Predictions were computed from sample generation {}, waveform is at {}",
                output.generation,
                self.waveform.generation()
            )));
        }
        let mapper = self.mapper();
        self.picks.install(output.predictions, mapper)?;
        for class in PhaseClass::ALL {
            self.picks
                .set_thresholds(class, self.thresholds.confidence, self.thresholds.noise);
        }
        Ok(())
    }

    /// Filter the waveform; existing predictions are kept
    pub fn apply_filter(&mut self, order: i32, band: FilterBand, kind: FilterKind) -> Result<()> {
        self.waveform.apply_filter(order, band, kind)
    }

    /// Restore the loaded samples and discard predictions and picks
    pub fn reset(&mut self) -> Result<()> {
        self.waveform.reset(self.model_rate, self.interpolation)?;
        self.picks.reset_all();
        for class in PhaseClass::ALL {
            self.picks
                .set_thresholds(class, self.thresholds.confidence, self.thresholds.noise);
        }
        Ok(())
    }

    /// RAW lines: every candidate with its class and noise probability
    ///
    /// Lists the unfiltered candidates, not the accepted picks.
    ///
    /// # Errors
    ///
    /// `PickerError::NotReady` before inference.
    pub fn export_raw(&self) -> Result<Vec<String>> {
        let (Some(predictions), Some(mapper)) = (self.picks.predictions(), self.picks.mapper())
        else {
            return Err(PickerError::NotReady("no predictions to export".to_string()));
        };

        let rows = |class: PhaseClass| -> Vec<RawRow> {
            self.picks
                .candidates(class)
                .iter()
                .map(|&w| RawRow {
                    sample: mapper.window_to_sample(w),
                    class_probability: predictions[[w, class.column()]],
                    noise_probability: predictions[[w, NOISE_COLUMN]],
                })
                .collect()
        };
        Ok(raw_lines(&rows(PhaseClass::P), &rows(PhaseClass::S)))
    }

    /// PKS lines for every accepted pick, P first, three channels each
    pub fn export_pks(&self) -> Vec<String> {
        let entries: Vec<PksEntry> = PhaseClass::ALL
            .iter()
            .flat_map(|&class| self.picks.picks(class).iter())
            .filter_map(|pick| {
                Some(PksEntry {
                    label: pick.class.label(),
                    time: self.picks.pick_time(pick)?,
                    sample: self.picks.pick_sample(pick)?,
                })
            })
            .collect();
        pks_lines(&self.waveform, &entries)
    }

    /// Write one export file
    pub fn write_export(&self, format: ExportFormat, path: &Path) -> Result<()> {
        let lines = match format {
            ExportFormat::Raw => self.export_raw()?,
            ExportFormat::Pks => self.export_pks(),
        };
        write_lines(path, &lines)
    }
}
