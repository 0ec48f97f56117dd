//! Curated P/S pick set with the two-threshold filter
//!
//! For each phase class the set owns the candidate list produced by the peak
//! detector, the accepted picks, and the `(confidence, noise)` thresholds. A
//! candidate at window `i` is accepted automatically when
//! `class_prob[i] > confidence && noise_prob[i] < noise`.
//!
//! Hand-curated picks (added manually, moved, or promoted) are exempt from
//! thresholding. Deleting a candidate-derived pick also drops its candidate,
//! so relaxing the thresholds later never brings it back; demoting only
//! removes the pick.
//!
//! Every mutation bumps [`PickSet::revision`] and is reported to registered
//! [`PickListener`]s.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::analysis::coordinates::CoordinateMapper;
use crate::error::{PickerError, Result};
use crate::features::peak_picking::find_candidates;
use crate::io::waveform::Timestamp;
use crate::ml::resnet::CLASS_COUNT;

/// Stable pick identifier, unique within one pick set
pub type PickId = u64;

/// Probability column of the noise class
pub const NOISE_COLUMN: usize = 2;

/// Seismic phase of a pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseClass {
    /// Primary (compressional) arrival
    P,
    /// Secondary (shear) arrival
    S,
}

impl PhaseClass {
    /// Both classes, in export order
    pub const ALL: [PhaseClass; 2] = [PhaseClass::P, PhaseClass::S];

    /// `"P"` or `"S"`
    pub fn label(&self) -> &'static str {
        match self {
            PhaseClass::P => "P",
            PhaseClass::S => "S",
        }
    }

    /// Probability column of this class in the prediction table
    pub fn column(&self) -> usize {
        match self {
            PhaseClass::P => 0,
            PhaseClass::S => 1,
        }
    }
}

/// Where a pick came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Accepted automatically from candidate window `.0`
    Candidate(usize),
    /// Derived from candidate window `.0`, then moved or promoted by hand
    Pinned(usize),
    /// Placed by hand
    Manual,
}

/// One arrival marker
#[derive(Debug, Clone, PartialEq)]
pub struct Pick {
    /// Identifier
    pub id: PickId,
    /// Phase
    pub class: PhaseClass,
    /// Window index the marker sits on
    pub window: usize,
    /// Whether the marker may be dragged
    pub movable: bool,
    /// Whether the marker is the current selection
    pub selected: bool,
    /// Origin of the marker
    pub provenance: Provenance,
}

impl Pick {
    /// True for picks exempt from thresholding
    pub fn is_hand_curated(&self) -> bool {
        !matches!(self.provenance, Provenance::Candidate(_))
    }

    /// Candidate window this pick derives from, if any
    pub fn candidate(&self) -> Option<usize> {
        match self.provenance {
            Provenance::Candidate(i) | Provenance::Pinned(i) => Some(i),
            Provenance::Manual => None,
        }
    }
}

/// Inclusion thresholds of one class, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Class probability must exceed this
    pub confidence: f32,
    /// Noise probability must stay below this
    pub noise: f32,
}

impl Thresholds {
    /// Thresholds clamped to `[0, 1]`; NaN becomes 0
    pub fn new(confidence: f32, noise: f32) -> Self {
        let clamp = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        Self {
            confidence: clamp(confidence),
            noise: clamp(noise),
        }
    }

    /// Inclusion rule
    pub fn accepts(&self, class_probability: f32, noise_probability: f32) -> bool {
        class_probability > self.confidence && noise_probability < self.noise
    }

    /// Whether these thresholds admit something `other` would reject
    pub fn loosens(&self, other: &Thresholds) -> bool {
        self.confidence < other.confidence || self.noise > other.noise
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new(0.01, 0.80)
    }
}

/// Candidates, accepted picks and thresholds of one phase class
#[derive(Debug, Clone)]
pub struct PickClass {
    class: PhaseClass,
    candidates: Vec<usize>,
    accepted: Vec<Pick>,
    thresholds: Thresholds,
    // Demoted candidates and the thresholds in force when they were demoted
    suppressed: Vec<(usize, Thresholds)>,
}

impl PickClass {
    fn new(class: PhaseClass, thresholds: Thresholds) -> Self {
        Self {
            class,
            candidates: Vec::new(),
            accepted: Vec::new(),
            thresholds,
            suppressed: Vec::new(),
        }
    }

    /// Demoted candidate windows still held back from refiltering
    pub fn suppressed(&self) -> impl Iterator<Item = usize> + '_ {
        self.suppressed.iter().map(|&(window, _)| window)
    }

    /// Phase of this record
    pub fn class(&self) -> PhaseClass {
        self.class
    }

    /// Candidate windows, ascending
    pub fn candidates(&self) -> &[usize] {
        &self.candidates
    }

    /// Accepted picks in insertion order
    pub fn accepted(&self) -> &[Pick] {
        &self.accepted
    }

    /// Active thresholds
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }
}

/// Change notification for pick observers
#[derive(Debug, Clone, PartialEq)]
pub enum PickEvent {
    /// A pick entered the accepted list
    Added(Pick),
    /// A pick left the accepted list
    Removed(Pick),
    /// A pick changed window
    Moved {
        /// The pick after the move
        pick: Pick,
        /// Window before the move
        from: usize,
    },
    /// The selection changed
    SelectionChanged {
        /// Newly selected pick
        selected: Option<PickId>,
        /// Previously selected pick
        previous: Option<PickId>,
    },
    /// Everything was discarded
    Cleared,
}

/// Receives pick events synchronously, in mutation order
pub trait PickListener: Send {
    /// Handle one event
    fn on_pick_event(&mut self, event: &PickEvent);
}

/// P and S picks of one waveform
pub struct PickSet {
    classes: [PickClass; 2],
    predictions: Option<Array2<f32>>,
    mapper: Option<CoordinateMapper>,
    selected: Option<PickId>,
    next_id: PickId,
    revision: u64,
    listeners: Vec<Box<dyn PickListener>>,
}

impl std::fmt::Debug for PickSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PickSet")
            .field("classes", &self.classes)
            .field("ready", &self.is_ready())
            .field("selected", &self.selected)
            .field("revision", &self.revision)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for PickSet {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

impl PickSet {
    /// Empty set; both classes start with `thresholds`
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            classes: [
                PickClass::new(PhaseClass::P, thresholds),
                PickClass::new(PhaseClass::S, thresholds),
            ],
            predictions: None,
            mapper: None,
            selected: None,
            next_id: 1,
            revision: 0,
            listeners: Vec::new(),
        }
    }

    /// Register an observer
    pub fn add_listener(&mut self, listener: Box<dyn PickListener>) {
        self.listeners.push(listener);
    }

    fn notify(&mut self, event: PickEvent) {
        for listener in self.listeners.iter_mut() {
            listener.on_pick_event(&event);
        }
    }

    fn class_slot(class: PhaseClass) -> usize {
        class.column()
    }

    /// Record of one class
    pub fn class(&self, class: PhaseClass) -> &PickClass {
        &self.classes[Self::class_slot(class)]
    }

    /// Accepted picks of one class
    pub fn picks(&self, class: PhaseClass) -> &[Pick] {
        &self.class(class).accepted
    }

    /// Candidate windows of one class
    pub fn candidates(&self, class: PhaseClass) -> &[usize] {
        &self.class(class).candidates
    }

    /// Active thresholds of one class
    pub fn thresholds(&self, class: PhaseClass) -> Thresholds {
        self.class(class).thresholds
    }

    /// Installed prediction table
    pub fn predictions(&self) -> Option<&Array2<f32>> {
        self.predictions.as_ref()
    }

    /// Mapper of the installed predictions
    pub fn mapper(&self) -> Option<&CoordinateMapper> {
        self.mapper.as_ref()
    }

    /// Whether predictions are installed and edits are allowed
    pub fn is_ready(&self) -> bool {
        self.predictions.is_some() && self.mapper.is_some()
    }

    /// Mutation counter
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Look up a pick by id
    pub fn get(&self, id: PickId) -> Option<&Pick> {
        self.locate(id).map(|(slot, pos)| &self.classes[slot].accepted[pos])
    }

    /// Currently selected pick
    pub fn selected(&self) -> Option<&Pick> {
        self.selected.and_then(|id| self.get(id))
    }

    /// Time of a pick's window centre
    pub fn pick_time(&self, pick: &Pick) -> Option<Timestamp> {
        self.mapper.map(|m| m.window_to_timestamp(pick.window))
    }

    /// Sample index of a pick's window centre
    pub fn pick_sample(&self, pick: &Pick) -> Option<usize> {
        self.mapper.map(|m| m.window_to_sample(pick.window))
    }

    fn locate(&self, id: PickId) -> Option<(usize, usize)> {
        self.classes.iter().enumerate().find_map(|(slot, record)| {
            record
                .accepted
                .iter()
                .position(|p| p.id == id)
                .map(|pos| (slot, pos))
        })
    }

    fn require_ready(&self) -> Result<CoordinateMapper> {
        match (&self.predictions, self.mapper) {
            (Some(_), Some(mapper)) => Ok(mapper),
            _ => Err(PickerError::NotReady(
                "run inference before editing picks".to_string(),
            )),
        }
    }

    fn allocate(&mut self, class: PhaseClass, window: usize, provenance: Provenance) -> Pick {
        let pick = Pick {
            id: self.next_id,
            class,
            window,
            movable: false,
            selected: false,
            provenance,
        };
        self.next_id += 1;
        pick
    }

    /// Install a prediction table and derive candidates and picks
    ///
    /// Any previous picks are discarded; the current thresholds are kept.
    ///
    /// # Errors
    ///
    /// `PickerError::InvalidInput` if the table is not `(window_count, 3)`
    /// for the mapper.
    pub fn install(&mut self, predictions: Array2<f32>, mapper: CoordinateMapper) -> Result<()> {
        if predictions.ncols() != CLASS_COUNT || predictions.nrows() != mapper.window_count() {
            return Err(PickerError::InvalidInput(format!(
                "Prediction table {:?} does not match {} windows",
                predictions.dim(),
                mapper.window_count()
            )));
        }

        if self.is_ready() {
            self.clear();
        }

        for record in self.classes.iter_mut() {
            record.candidates = find_candidates(predictions.column(record.class.column()));
        }
        self.predictions = Some(predictions);
        self.mapper = Some(mapper);

        for class in PhaseClass::ALL {
            self.refilter(class);
        }
        self.revision += 1;

        log::debug!(
            "Installed {} windows: {} P / {} S candidates, {} P / {} S picks",
            mapper.window_count(),
            self.candidates(PhaseClass::P).len(),
            self.candidates(PhaseClass::S).len(),
            self.picks(PhaseClass::P).len(),
            self.picks(PhaseClass::S).len()
        );
        Ok(())
    }

    /// Change one class's thresholds and rescan its candidates
    ///
    /// Values are clamped to `[0, 1]`. Before predictions are installed the
    /// thresholds are only stored.
    pub fn set_thresholds(&mut self, class: PhaseClass, confidence: f32, noise: f32) {
        let thresholds = Thresholds::new(confidence, noise);
        self.classes[Self::class_slot(class)].thresholds = thresholds;
        if self.is_ready() {
            self.refilter(class);
        }
        self.revision += 1;
        log::debug!(
            "{} thresholds: confidence {:.2}, noise {:.2}",
            class.label(),
            thresholds.confidence,
            thresholds.noise
        );
    }

    /// Rescan candidates of one class against its thresholds
    ///
    /// Passing automatic picks keep their id, failing ones are dropped, and
    /// newly passing candidates are appended in ascending window order. A
    /// demoted candidate stays out until the thresholds are looser than at
    /// demotion.
    fn refilter(&mut self, class: PhaseClass) {
        let Some(predictions) = self.predictions.as_ref() else {
            return;
        };
        let slot = Self::class_slot(class);
        let column = class.column();
        {
            let record = &mut self.classes[slot];
            let current = record.thresholds;
            record.suppressed.retain(|(_, at_demote)| !current.loosens(at_demote));
        }
        let record = &self.classes[slot];
        let thresholds = record.thresholds;
        let passes = |i: usize| thresholds.accepts(predictions[[i, column]], predictions[[i, NOISE_COLUMN]]);

        let (kept, dropped): (Vec<Pick>, Vec<Pick>) = record
            .accepted
            .iter()
            .cloned()
            .partition(|p| match p.provenance {
                Provenance::Candidate(i) => record.candidates.contains(&i) && passes(i),
                _ => true,
            });

        let fresh: Vec<usize> = record
            .candidates
            .iter()
            .copied()
            .filter(|&i| {
                passes(i)
                    && !kept.iter().any(|p| p.candidate() == Some(i))
                    && !record.suppressed.iter().any(|&(w, _)| w == i)
            })
            .collect();

        self.classes[slot].accepted = kept;
        for pick in dropped {
            if self.selected == Some(pick.id) {
                self.set_selection(None);
            }
            self.notify(PickEvent::Removed(pick));
        }
        for window in fresh {
            let pick = self.allocate(class, window, Provenance::Candidate(window));
            self.classes[slot].accepted.push(pick.clone());
            self.notify(PickEvent::Added(pick));
        }
    }

    /// Add a hand-placed pick at the window nearest to `time`
    ///
    /// # Errors
    ///
    /// `PickerError::NotReady` before predictions are installed.
    pub fn add_manual(&mut self, class: PhaseClass, time: Timestamp) -> Result<PickId> {
        let mapper = self.require_ready()?;
        let window = mapper.timestamp_to_window(time);
        let pick = self.allocate(class, window, Provenance::Manual);
        let id = pick.id;
        self.classes[Self::class_slot(class)].accepted.push(pick.clone());
        self.revision += 1;
        log::debug!("Added manual {} pick {} at window {}", class.label(), id, window);
        self.notify(PickEvent::Added(pick));
        Ok(id)
    }

    fn take(&mut self, id: PickId) -> Result<Pick> {
        let (slot, pos) = self.locate(id).ok_or(PickerError::PickNotFound(id))?;
        let pick = self.classes[slot].accepted.remove(pos);
        if self.selected == Some(id) {
            self.set_selection(None);
        }
        self.revision += 1;
        Ok(pick)
    }

    /// Remove a pick permanently
    ///
    /// A candidate-derived pick also removes its candidate, so no later
    /// threshold change can bring it back.
    ///
    /// # Errors
    ///
    /// `PickerError::PickNotFound` for an unknown or already removed id.
    pub fn delete(&mut self, id: PickId) -> Result<Pick> {
        let pick = self.take(id)?;
        if let Some(window) = pick.candidate() {
            let record = &mut self.classes[Self::class_slot(pick.class)];
            record.candidates.retain(|&c| c != window);
            record.suppressed.retain(|&(w, _)| w != window);
        }
        log::debug!("Deleted {} pick {}", pick.class.label(), id);
        self.notify(PickEvent::Removed(pick.clone()));
        Ok(pick)
    }

    /// Remove a pick but keep its candidate
    ///
    /// The candidate is accepted again only after the class thresholds are
    /// loosened past the ones in force now, or on an explicit promote.
    pub fn demote(&mut self, id: PickId) -> Result<Pick> {
        let pick = self.take(id)?;
        if let Some(window) = pick.candidate() {
            let record = &mut self.classes[Self::class_slot(pick.class)];
            let thresholds = record.thresholds;
            record.suppressed.retain(|&(w, _)| w != window);
            record.suppressed.push((window, thresholds));
        }
        log::debug!("Demoted {} pick {}", pick.class.label(), id);
        self.notify(PickEvent::Removed(pick.clone()));
        Ok(pick)
    }

    /// Accept a candidate regardless of thresholds
    ///
    /// An existing automatic pick on the candidate is pinned in place.
    ///
    /// # Errors
    ///
    /// `PickerError::NotReady` before installation, `PickerError::InvalidInput`
    /// if `window` is not a candidate of `class`.
    pub fn promote(&mut self, class: PhaseClass, window: usize) -> Result<PickId> {
        self.require_ready()?;
        let slot = Self::class_slot(class);
        if !self.classes[slot].candidates.contains(&window) {
            return Err(PickerError::InvalidInput(format!(
                "Window {} is not a {} candidate",
                window,
                class.label()
            )));
        }
        self.classes[slot].suppressed.retain(|&(w, _)| w != window);

        let existing = self.classes[slot]
            .accepted
            .iter_mut()
            .find(|p| p.candidate() == Some(window));
        if let Some(pick) = existing {
            pick.provenance = Provenance::Pinned(window);
            let id = pick.id;
            self.revision += 1;
            return Ok(id);
        }

        let pick = self.allocate(class, window, Provenance::Pinned(window));
        let id = pick.id;
        self.classes[slot].accepted.push(pick.clone());
        self.revision += 1;
        self.notify(PickEvent::Added(pick));
        Ok(id)
    }

    /// Move a pick to the window nearest to `time`
    ///
    /// A moved candidate pick becomes pinned.
    ///
    /// # Errors
    ///
    /// `PickerError::PickNotFound` for an unknown id, `PickerError::PickLocked`
    /// when the pick is not movable; the set is unchanged in both cases.
    pub fn move_pick(&mut self, id: PickId, time: Timestamp) -> Result<()> {
        let mapper = self.require_ready()?;
        let (slot, pos) = self.locate(id).ok_or(PickerError::PickNotFound(id))?;
        let pick = &mut self.classes[slot].accepted[pos];
        if !pick.movable {
            return Err(PickerError::PickLocked(id));
        }

        let from = pick.window;
        pick.window = mapper.timestamp_to_window(time);
        if let Provenance::Candidate(i) = pick.provenance {
            pick.provenance = Provenance::Pinned(i);
        }
        let moved = pick.clone();
        self.revision += 1;
        self.notify(PickEvent::Moved { pick: moved, from });
        Ok(())
    }

    /// Flip a pick's movable flag, returning the new value
    pub fn toggle_movable(&mut self, id: PickId) -> Result<bool> {
        let (slot, pos) = self.locate(id).ok_or(PickerError::PickNotFound(id))?;
        let pick = &mut self.classes[slot].accepted[pos];
        pick.movable = !pick.movable;
        let movable = pick.movable;
        self.revision += 1;
        Ok(movable)
    }

    fn set_selection(&mut self, id: Option<PickId>) {
        let previous = self.selected;
        if previous == id {
            return;
        }
        for pick in self.classes.iter_mut().flat_map(|c| c.accepted.iter_mut()) {
            pick.selected = Some(pick.id) == id;
        }
        self.selected = id;
        self.revision += 1;
        self.notify(PickEvent::SelectionChanged {
            selected: id,
            previous,
        });
    }

    /// Select one pick, clearing any previous selection
    pub fn select(&mut self, id: PickId) -> Result<()> {
        self.locate(id).ok_or(PickerError::PickNotFound(id))?;
        self.set_selection(Some(id));
        Ok(())
    }

    /// Clear the selection
    pub fn clear_selection(&mut self) {
        self.set_selection(None);
    }

    fn clear(&mut self) {
        for record in self.classes.iter_mut() {
            record.candidates.clear();
            record.accepted.clear();
            record.suppressed.clear();
        }
        self.predictions = None;
        self.mapper = None;
        self.selected = None;
        self.notify(PickEvent::Cleared);
    }

    /// Return to the pre-inference state
    ///
    /// Candidates, picks, selection and predictions are discarded; edits fail
    /// with `NotReady` until predictions are installed again. Thresholds are
    /// kept.
    pub fn reset_all(&mut self) {
        self.clear();
        self.revision += 1;
        log::debug!("Pick set reset");
    }
}
