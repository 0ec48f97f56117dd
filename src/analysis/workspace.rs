//! Batch operations over many picking sessions
//!
//! A [`Workspace`] holds one [`TraceSession`] per loaded waveform. Batch
//! operations act on the sessions selected for batch work only.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::analysis::session::TraceSession;
use crate::config::PickerConfig;
use crate::error::{PickerError, Result};
use crate::io::export::{export_path, ExportFormat};
use crate::io::loader::{load_waveforms, WaveformSource};
use crate::io::waveform::Waveform;
use crate::ml::inference::{CancelToken, InferenceService, ProgressFn};
use crate::preprocessing::butterworth::{FilterBand, FilterKind};

/// Ordered collection of sessions sharing one configuration
#[derive(Debug, Default)]
pub struct Workspace {
    sessions: Vec<TraceSession>,
    config: PickerConfig,
}

impl Workspace {
    /// Empty workspace
    pub fn new(config: PickerConfig) -> Self {
        Self {
            sessions: Vec::new(),
            config,
        }
    }

    /// Configuration new sessions are created with
    pub fn config(&self) -> &PickerConfig {
        &self.config
    }

    /// Append a session for a prepared waveform; returns its index
    pub fn add(&mut self, waveform: Waveform) -> usize {
        self.sessions.push(TraceSession::new(waveform, &self.config));
        self.sessions.len() - 1
    }

    /// Load sources and append a session per waveform
    ///
    /// Returns the sources that were skipped and why.
    pub fn load(&mut self, sources: &[&dyn WaveformSource]) -> Vec<(String, PickerError)> {
        let report = load_waveforms(sources, &self.config);
        log::info!(
            "Loaded {} waveform(s), skipped {} source(s)",
            report.waveforms.len(),
            report.failures.len()
        );
        for waveform in report.waveforms {
            self.add(waveform);
        }
        report.failures
    }

    /// All sessions in insertion order
    pub fn sessions(&self) -> &[TraceSession] {
        &self.sessions
    }

    /// Session at `index`
    pub fn session(&self, index: usize) -> Option<&TraceSession> {
        self.sessions.get(index)
    }

    /// Session at `index`, for editing
    pub fn session_mut(&mut self, index: usize) -> Option<&mut TraceSession> {
        self.sessions.get_mut(index)
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether there are no sessions
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop the session at `index`
    pub fn remove(&mut self, index: usize) -> Option<TraceSession> {
        (index < self.sessions.len()).then(|| self.sessions.remove(index))
    }

    /// Select or deselect every session
    pub fn select_all(&mut self, selected: bool) {
        for session in &mut self.sessions {
            session.set_selected_for_batch(selected);
        }
    }

    /// Flip every session's batch selection
    pub fn invert_selection(&mut self) {
        for session in &mut self.sessions {
            session.set_selected_for_batch(!session.is_selected_for_batch());
        }
    }

    /// Indices of selected sessions
    pub fn selected_indices(&self) -> Vec<usize> {
        self.sessions
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.is_selected_for_batch().then_some(i))
            .collect()
    }

    /// Filter every selected session in order
    ///
    /// # Errors
    ///
    /// Stops at the first session whose filter is rejected; sessions before
    /// it stay filtered, the rest are untouched.
    pub fn apply_filter_to_selected(&mut self, order: i32, band: FilterBand, kind: FilterKind) -> Result<usize> {
        let mut filtered = 0;
        for session in self.sessions.iter_mut().filter(|s| s.is_selected_for_batch()) {
            if let Err(e) = session.apply_filter(order, band, kind) {
                log::warn!(
                    "Filter rejected on {} after {} session(s): {}",
                    session.waveform().station(),
                    filtered,
                    e
                );
                return Err(e);
            }
            filtered += 1;
        }
        Ok(filtered)
    }

    /// Classify every selected session, sessions in parallel
    ///
    /// `progress` receives `(session index, completed fraction)`. One
    /// session's failure does not stop the others.
    ///
    /// # Returns
    ///
    /// `(session index, outcome)` for each selected session, in order
    pub fn run_inference_on_selected<F>(
        &mut self,
        service: &InferenceService,
        cancel: &CancelToken,
        progress: F,
    ) -> Vec<(usize, Result<()>)>
    where
        F: Fn(usize, f32) + Sync,
    {
        let progress = &progress;
        self.sessions
            .par_iter_mut()
            .enumerate()
            .filter(|(_, s)| s.is_selected_for_batch())
            .map(|(index, session)| {
                let mut observer = ProgressFn(|fraction| progress(index, fraction));
                let outcome = session.run_inference(service, &mut observer, cancel);
                if let Err(e) = &outcome {
                    log::warn!("Inference failed on {}: {}", session.waveform().station(), e);
                }
                (index, outcome)
            })
            .collect()
    }

    /// Reset every selected session to its loaded samples
    pub fn reset_selected(&mut self) -> Result<()> {
        for session in self.sessions.iter_mut().filter(|s| s.is_selected_for_batch()) {
            session.reset()?;
        }
        Ok(())
    }

    /// Export one session to `path`
    pub fn export_session(&self, index: usize, format: ExportFormat, path: &Path) -> Result<()> {
        let session = self
            .sessions
            .get(index)
            .ok_or_else(|| PickerError::InvalidInput(format!("No session at index {}", index)))?;
        session.write_export(format, path)
    }

    /// Export every selected session
    ///
    /// With `as_sequence` each file is named
    /// `<base>_<source file name>_<station>.<ext>`. Without it the export
    /// goes to `<base>.<ext>`, which only makes sense for a single session.
    ///
    /// # Errors
    ///
    /// `PickerError::InvalidInput` for a plain export of more than one
    /// session; otherwise stops at the first failed write and keeps the
    /// files already written.
    pub fn export_selected(&self, format: ExportFormat, base: &Path, as_sequence: bool) -> Result<Vec<PathBuf>> {
        let selected: Vec<&TraceSession> = self
            .sessions
            .iter()
            .filter(|s| s.is_selected_for_batch())
            .collect();
        if !as_sequence && selected.len() > 1 {
            return Err(PickerError::InvalidInput(format!(
                "{} sessions selected, a plain export takes one",
                selected.len()
            )));
        }

        let mut written = Vec::with_capacity(selected.len());
        for session in selected {
            let path = export_path(base, session.waveform(), format, as_sequence);
            session.write_export(format, &path)?;
            written.push(path);
        }
        log::info!("Exported {} file(s)", written.len());
        Ok(written)
    }
}
