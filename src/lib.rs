//! # Phase Picker
//!
//! A seismic phase picking engine: three-component waveforms go in, P and S
//! arrival picks come out.
//!
//! ## Features
//!
//! - **Preparation**: Resampling to the classifier rate and Butterworth filtering
//! - **Classification**: Sliding 4 s windows scored by a residual CNN on log spectrograms
//! - **Picking**: Local-maximum candidates filtered by confidence and noise thresholds
//! - **Editing**: Manual add, move, lock, demote and delete with change events
//! - **Export**: RAW candidate dumps and PKS pick files
//!
//! ## Quick Start
//!
//! ```no_run
//! use phase_picker::{pick_waveform, InferenceService, PhaseClass, PickerConfig};
//! # fn load() -> phase_picker::Waveform { unimplemented!() }
//!
//! let config = PickerConfig::from_toml_file("picker.toml")?;
//! let service = InferenceService::from_config(&config)?;
//!
//! let session = pick_waveform(load(), &service, &config)?;
//! for pick in session.picks().picks(PhaseClass::P) {
//!     println!("P at {:?}", session.picks().pick_time(pick));
//! }
//! # Ok::<(), phase_picker::PickerError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Waveform → Resample/Filter → Windows → Spectrogram → ResNet → Candidates → Picks → Export
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod config;
pub mod error;
pub mod features;
pub mod io;
pub mod ml;
pub mod preprocessing;

// Re-export main types
pub use analysis::coordinates::CoordinateMapper;
pub use analysis::picks::{PhaseClass, Pick, PickEvent, PickId, PickListener, PickSet, Thresholds};
pub use analysis::session::TraceSession;
pub use analysis::workspace::Workspace;
pub use config::PickerConfig;
pub use error::{PickerError, Result};
pub use io::export::ExportFormat;
pub use io::waveform::{TraceMetadata, Waveform};
pub use ml::inference::{CancelToken, InferenceService, ProgressObserver};
pub use preprocessing::butterworth::{FilterBand, FilterKind};

/// Pick one waveform end to end
///
/// Resamples the waveform to the classifier rate if needed, classifies every
/// window and applies the configured thresholds.
///
/// # Arguments
///
/// * `waveform` - Three-component recording at any sampling rate
/// * `service` - Loaded classifier
/// * `config` - Window geometry, model rate and thresholds
///
/// # Returns
///
/// A session holding the prepared waveform, its predictions and picks
///
/// # Errors
///
/// Returns `PickerError` if resampling or inference fails
///
/// # Example
///
/// ```no_run
/// use phase_picker::{pick_waveform, InferenceService, PickerConfig};
/// # fn load() -> phase_picker::Waveform { unimplemented!() }
///
/// let config = PickerConfig::default();
/// let service = InferenceService::from_config(&config)?;
/// let session = pick_waveform(load(), &service, &config)?;
/// println!("{}", session.export_pks().join("\n"));
/// # Ok::<(), phase_picker::PickerError>(())
/// ```
pub fn pick_waveform(
    mut waveform: Waveform,
    service: &InferenceService,
    config: &PickerConfig,
) -> Result<TraceSession> {
    use std::time::Instant;
    let start_time = Instant::now();

    config.validate()?;
    waveform.resample(config.model_sampling_rate, config.interpolation)?;

    let mut session = TraceSession::new(waveform, config);
    session.run_inference(
        service,
        &mut ml::inference::NoProgress,
        &CancelToken::new(),
    )?;

    log::debug!(
        "Picked {} in {:.1} ms: {} P, {} S",
        session.waveform().station(),
        start_time.elapsed().as_secs_f32() * 1000.0,
        session.picks().picks(PhaseClass::P).len(),
        session.picks().picks(PhaseClass::S).len()
    );
    Ok(session)
}
