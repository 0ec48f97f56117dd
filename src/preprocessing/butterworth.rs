//! Butterworth filter design and causal second-order-section filtering
//!
//! Filters are designed from the analog Butterworth prototype, moved to the
//! requested band with the usual lowpass→lowpass/highpass/bandpass/bandstop
//! frequency transforms, mapped to the z-plane with the bilinear transform
//! (cutoffs pre-warped) and finally factored into second-order sections.
//! Filtering runs the sections in cascade, each in Direct Form II
//! transposed, starting from a zero state. The result is causal, so phase
//! is not preserved.
//!
//! # Example
//!
//! ```
//! use phase_picker::preprocessing::butterworth::{ButterworthFilter, FilterBand, FilterKind};
//!
//! let filter = ButterworthFilter::design(4, FilterBand::Pair(1.0, 10.0), FilterKind::Bandpass, 100.0)?;
//! let mut samples = vec![0.0f64; 500];
//! samples[0] = 1.0;
//! filter.apply(&mut samples);
//! # Ok::<(), phase_picker::PickerError>(())
//! ```

use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::PickerError;

/// Highest accepted filter order
pub const MAX_ORDER: i32 = 100;

/// Imaginary parts below this are treated as real roots
const ROOT_TOLERANCE: f64 = 1e-10;

/// Filter response type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    /// Pass below the cutoff
    Lowpass,
    /// Pass above the cutoff
    Highpass,
    /// Pass between the two edges
    Bandpass,
    /// Reject between the two edges
    Bandstop,
}

impl FilterKind {
    /// Whether the kind takes a `(low, high)` pair
    pub fn is_band(&self) -> bool {
        matches!(self, FilterKind::Bandpass | FilterKind::Bandstop)
    }
}

/// Corner frequencies in Hz
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterBand {
    /// Single cutoff for lowpass/highpass
    Single(f64),
    /// `(low, high)` edges for bandpass/bandstop
    Pair(f64, f64),
}

/// One biquad: `(b0 + b1 z^-1 + b2 z^-2) / (1 + a1 z^-1 + a2 z^-2)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecondOrderSection {
    /// Numerator `[b0, b1, b2]`
    pub b: [f64; 3],
    /// Denominator `[a1, a2]`, `a0` normalised to 1
    pub a: [f64; 2],
}

impl SecondOrderSection {
    /// Filter `samples` in place, Direct Form II transposed
    fn run(&self, samples: &mut [f64]) {
        let mut state = [0.0f64; 2];
        for x in samples.iter_mut() {
            let input = *x;
            let output = self.b[0] * input + state[0];
            state[0] = self.b[1] * input - self.a[0] * output + state[1];
            state[1] = self.b[2] * input - self.a[1] * output;
            *x = output;
        }
    }

    /// Poles inside the unit circle
    pub fn is_stable(&self) -> bool {
        self.a[1].abs() < 1.0 && self.a[0].abs() < 1.0 + self.a[1]
    }
}

/// Digital Butterworth filter as a cascade of second-order sections
#[derive(Debug, Clone)]
pub struct ButterworthFilter {
    sections: Vec<SecondOrderSection>,
    kind: FilterKind,
    order: usize,
}

impl ButterworthFilter {
    /// Design a Butterworth filter
    ///
    /// # Arguments
    ///
    /// * `order` - Prototype order (band filters end up with twice as many poles)
    /// * `band` - Cutoff (`Single`) or edges (`Pair`) in Hz
    /// * `kind` - Response type; must agree with the shape of `band`
    /// * `sample_rate` - Sampling rate of the data to be filtered, in Hz
    ///
    /// # Errors
    ///
    /// Returns `PickerError::InvalidFilterParameter` when the order is not in
    /// `1..=MAX_ORDER`, a frequency is not in `(0, nyquist)`, `low >= high`, or
    /// the band shape does not match the kind.
    pub fn design(
        order: i32,
        band: FilterBand,
        kind: FilterKind,
        sample_rate: f64,
    ) -> Result<Self, PickerError> {
        if order <= 0 || order > MAX_ORDER {
            return Err(PickerError::InvalidFilterParameter(format!(
                "Filter order must be in 1..={}, got {}",
                MAX_ORDER, order
            )));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(PickerError::InvalidFilterParameter(format!(
                "Sampling rate must be > 0, got {}",
                sample_rate
            )));
        }

        let nyquist = sample_rate / 2.0;
        let check = |f: f64| -> Result<f64, PickerError> {
            if !f.is_finite() || f <= 0.0 || f >= nyquist {
                Err(PickerError::InvalidFilterParameter(format!(
                    "Frequency {} Hz outside (0, {}) Hz",
                    f, nyquist
                )))
            } else {
                Ok(f)
            }
        };

        let order = order as usize;
        let fs2 = 2.0 * sample_rate;
        let warp = |f: f64| fs2 * (PI * f / sample_rate).tan();
        let prototype = prototype_poles(order);

        let (zeros, poles, gain) = match (kind, band) {
            (FilterKind::Lowpass, FilterBand::Single(f)) => lowpass(&prototype, warp(check(f)?)),
            (FilterKind::Highpass, FilterBand::Single(f)) => {
                highpass(&prototype, warp(check(f)?))
            }
            (FilterKind::Bandpass | FilterKind::Bandstop, FilterBand::Pair(low, high)) => {
                let (low, high) = (check(low)?, check(high)?);
                if low >= high {
                    return Err(PickerError::InvalidFilterParameter(format!(
                        "Band edges must satisfy low < high, got {} >= {}",
                        low, high
                    )));
                }
                let (w1, w2) = (warp(low), warp(high));
                if kind == FilterKind::Bandpass {
                    bandpass(&prototype, w1, w2)
                } else {
                    bandstop(&prototype, w1, w2)
                }
            }
            (kind, band) => {
                return Err(PickerError::InvalidFilterParameter(format!(
                    "{:?} filter cannot use corner frequencies {:?}",
                    kind, band
                )));
            }
        };

        let (zeros, poles, gain) = bilinear(&zeros, &poles, gain, fs2);
        let sections = to_sections(&zeros, &poles, gain);

        log::debug!(
            "Designed {:?} Butterworth filter: order {}, {:?}, fs={} Hz, {} sections",
            kind,
            order,
            band,
            sample_rate,
            sections.len()
        );

        Ok(Self {
            sections,
            kind,
            order,
        })
    }

    /// Filter samples in place (causal, zero initial state)
    pub fn apply(&self, samples: &mut [f64]) {
        for section in &self.sections {
            section.run(samples);
        }
    }

    /// Cascaded sections
    pub fn sections(&self) -> &[SecondOrderSection] {
        &self.sections
    }

    /// Response type
    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Prototype order
    pub fn order(&self) -> usize {
        self.order
    }

    /// Whether every section is stable
    pub fn is_stable(&self) -> bool {
        self.sections.iter().all(SecondOrderSection::is_stable)
    }

    /// Magnitude of the frequency response at `freq_hz`
    pub fn magnitude_response(&self, freq_hz: f64, sample_rate: f64) -> f64 {
        let omega = 2.0 * PI * freq_hz / sample_rate;
        let z1 = Complex64::new(omega.cos(), -omega.sin());
        let z2 = z1 * z1;
        self.sections
            .iter()
            .map(|s| {
                let num = s.b[0] + z1 * s.b[1] + z2 * s.b[2];
                let den = 1.0 + z1 * s.a[0] + z2 * s.a[1];
                (num / den).norm()
            })
            .product()
    }
}

type Zpk = (Vec<Complex64>, Vec<Complex64>, f64);

/// Analog prototype poles on the left half of the unit circle
fn prototype_poles(order: usize) -> Vec<Complex64> {
    (0..order)
        .map(|k| {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            Complex64::new(theta.cos(), theta.sin())
        })
        .collect()
}

fn lowpass(prototype: &[Complex64], wc: f64) -> Zpk {
    let poles = prototype.iter().map(|p| p * wc).collect();
    (Vec::new(), poles, wc.powi(prototype.len() as i32))
}

fn highpass(prototype: &[Complex64], wc: f64) -> Zpk {
    let poles = prototype.iter().map(|p| wc / p).collect();
    let zeros = vec![Complex64::new(0.0, 0.0); prototype.len()];
    (zeros, poles, 1.0)
}

fn bandpass(prototype: &[Complex64], w1: f64, w2: f64) -> Zpk {
    let bw = w2 - w1;
    let w0_sq = w1 * w2;
    let mut poles = Vec::with_capacity(2 * prototype.len());
    for p in prototype {
        let scaled = p * (bw / 2.0);
        let root = (scaled * scaled - w0_sq).sqrt();
        poles.push(scaled + root);
        poles.push(scaled - root);
    }
    let zeros = vec![Complex64::new(0.0, 0.0); prototype.len()];
    (zeros, poles, bw.powi(prototype.len() as i32))
}

fn bandstop(prototype: &[Complex64], w1: f64, w2: f64) -> Zpk {
    let bw = w2 - w1;
    let w0_sq = w1 * w2;
    let w0 = w0_sq.sqrt();
    let mut poles = Vec::with_capacity(2 * prototype.len());
    let mut zeros = Vec::with_capacity(2 * prototype.len());
    for p in prototype {
        let inverted = (bw / 2.0) / p;
        let root = (inverted * inverted - w0_sq).sqrt();
        poles.push(inverted + root);
        poles.push(inverted - root);
        zeros.push(Complex64::new(0.0, w0));
        zeros.push(Complex64::new(0.0, -w0));
    }
    // Prototype poles multiply to 1, so the passband gain is already unity
    (zeros, poles, 1.0)
}

/// Bilinear transform; zeros at infinity land on z = -1
fn bilinear(zeros: &[Complex64], poles: &[Complex64], gain: f64, fs2: f64) -> Zpk {
    let map = |s: &Complex64| (fs2 + s) / (fs2 - s);
    let mut digital_zeros: Vec<Complex64> = zeros.iter().map(map).collect();
    let digital_poles: Vec<Complex64> = poles.iter().map(map).collect();
    digital_zeros.resize(poles.len(), Complex64::new(-1.0, 0.0));

    let num: Complex64 = zeros.iter().map(|z| fs2 - z).product();
    let den: Complex64 = poles.iter().map(|p| fs2 - p).product();
    let digital_gain = gain * (num / den).re;
    (digital_zeros, digital_poles, digital_gain)
}

/// Split roots into conjugate pairs followed by pairs of real roots
fn root_groups(roots: &[Complex64]) -> Vec<Vec<Complex64>> {
    let mut groups: Vec<Vec<Complex64>> = roots
        .iter()
        .filter(|r| r.im > ROOT_TOLERANCE)
        .map(|r| vec![*r, r.conj()])
        .collect();

    let mut reals: Vec<f64> = roots
        .iter()
        .filter(|r| r.im.abs() <= ROOT_TOLERANCE)
        .map(|r| r.re)
        .collect();
    reals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    groups.extend(
        reals
            .chunks(2)
            .map(|c| c.iter().map(|&re| Complex64::new(re, 0.0)).collect()),
    );
    groups
}

/// Monic polynomial coefficients `[c1, c2]` of `(1 - r1 z^-1)(1 - r2 z^-1)`
fn quadratic(roots: &[Complex64]) -> [f64; 2] {
    match roots {
        [r] => [-r.re, 0.0],
        [r1, r2] => [-(r1 + r2).re, (r1 * r2).re],
        _ => [0.0, 0.0],
    }
}

fn to_sections(zeros: &[Complex64], poles: &[Complex64], gain: f64) -> Vec<SecondOrderSection> {
    let zero_groups = root_groups(zeros);
    let pole_groups = root_groups(poles);

    let mut sections: Vec<SecondOrderSection> = pole_groups
        .iter()
        .enumerate()
        .map(|(i, poles)| {
            let num = zero_groups.get(i).map(|z| quadratic(z)).unwrap_or([0.0, 0.0]);
            SecondOrderSection {
                b: [1.0, num[0], num[1]],
                a: quadratic(poles),
            }
        })
        .collect();

    if let Some(first) = sections.first_mut() {
        for b in first.b.iter_mut() {
            *b *= gain;
        }
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 100.0;

    fn db(filter: &ButterworthFilter, f: f64) -> f64 {
        20.0 * filter.magnitude_response(f, FS).log10()
    }

    #[test]
    fn test_lowpass_response() {
        let filter =
            ButterworthFilter::design(4, FilterBand::Single(10.0), FilterKind::Lowpass, FS).unwrap();
        assert_eq!(filter.sections().len(), 2);
        assert!(filter.is_stable());
        assert!((filter.magnitude_response(0.0, FS) - 1.0).abs() < 1e-9);
        assert!((db(&filter, 10.0) + 3.0103).abs() < 1e-3);
        assert!(db(&filter, 30.0) < -35.0);
    }

    #[test]
    fn test_odd_order_has_first_order_section() {
        let filter =
            ButterworthFilter::design(3, FilterBand::Single(5.0), FilterKind::Lowpass, FS).unwrap();
        assert_eq!(filter.sections().len(), 2);
        assert!(filter.sections().iter().any(|s| s.a[1] == 0.0 && s.b[2] == 0.0));
        assert!((filter.magnitude_response(0.0, FS) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let filter =
            ButterworthFilter::design(2, FilterBand::Single(2.0), FilterKind::Highpass, FS).unwrap();
        assert!(filter.magnitude_response(0.0, FS) < 1e-9);
        assert!((filter.magnitude_response(49.9, FS) - 1.0).abs() < 1e-3);

        let mut samples = vec![1.0; 2000];
        filter.apply(&mut samples);
        assert!(samples[1999].abs() < 1e-6);
    }

    #[test]
    fn test_bandpass_edges_at_half_power() {
        let filter =
            ButterworthFilter::design(3, FilterBand::Pair(2.0, 8.0), FilterKind::Bandpass, FS)
                .unwrap();
        assert_eq!(filter.sections().len(), 3);
        assert!(filter.is_stable());
        assert!((db(&filter, 2.0) + 3.0103).abs() < 1e-3);
        assert!((db(&filter, 8.0) + 3.0103).abs() < 1e-3);
        assert!(filter.magnitude_response(0.0, FS) < 1e-9);
        assert!(db(&filter, 40.0) < -40.0);
    }

    #[test]
    fn test_bandstop_notches_band() {
        let filter =
            ButterworthFilter::design(2, FilterBand::Pair(5.0, 15.0), FilterKind::Bandstop, FS)
                .unwrap();
        assert!((filter.magnitude_response(0.0, FS) - 1.0).abs() < 1e-9);
        assert!((db(&filter, 5.0) + 3.0103).abs() < 1e-3);
        assert!((db(&filter, 15.0) + 3.0103).abs() < 1e-3);
        assert!(db(&filter, 9.0) < -20.0);
    }

    #[test]
    fn test_invalid_parameters() {
        let cases = [
            (0, FilterBand::Single(5.0), FilterKind::Lowpass),
            (-2, FilterBand::Single(5.0), FilterKind::Lowpass),
            (4, FilterBand::Single(-1.0), FilterKind::Lowpass),
            (4, FilterBand::Single(0.0), FilterKind::Highpass),
            (4, FilterBand::Single(50.0), FilterKind::Lowpass),
            (4, FilterBand::Pair(10.0, 5.0), FilterKind::Bandpass),
            (4, FilterBand::Pair(5.0, 5.0), FilterKind::Bandstop),
            (4, FilterBand::Pair(5.0, 60.0), FilterKind::Bandpass),
            (4, FilterBand::Single(5.0), FilterKind::Bandpass),
            (4, FilterBand::Pair(1.0, 5.0), FilterKind::Lowpass),
        ];
        for (order, band, kind) in cases {
            let result = ButterworthFilter::design(order, band, kind, FS);
            assert!(
                matches!(result, Err(PickerError::InvalidFilterParameter(_))),
                "{:?} {:?} {:?} should be rejected",
                order,
                band,
                kind
            );
        }
    }

    #[test]
    fn test_impulse_response_decays() {
        let filter =
            ButterworthFilter::design(6, FilterBand::Pair(1.0, 20.0), FilterKind::Bandpass, FS)
                .unwrap();
        let mut samples = vec![0.0; 3000];
        samples[0] = 1.0;
        filter.apply(&mut samples);
        assert!(samples.iter().all(|x| x.is_finite()));
        assert!(samples[2990..].iter().all(|x| x.abs() < 1e-6));
    }
}
