//! Candidate detection on per-window probability sequences
//!
//! A window index is a candidate when the class probability strictly rises
//! into it and does not rise out of it. The first index of a plateau after a
//! rise therefore qualifies, while monotonic runs and the two boundary
//! indices never do.

use ndarray::ArrayView1;

/// Find local-maximum candidates in one class's probability column
///
/// # Arguments
///
/// * `probabilities` - Probability of one class for every window
///
/// # Returns
///
/// Ascending window indices `i` with `1 <= i <= N - 2`,
/// `p[i] - p[i-1] > 0` and `p[i+1] - p[i] <= 0`
///
/// # Example
///
/// ```
/// use phase_picker::features::peak_picking::find_candidates;
/// use ndarray::arr1;
///
/// let column = arr1(&[0.1f32, 0.4, 0.4, 0.2, 0.6, 0.3]);
/// assert_eq!(find_candidates(column.view()), vec![1, 4]);
/// ```
pub fn find_candidates(probabilities: ArrayView1<'_, f32>) -> Vec<usize> {
    let n = probabilities.len();
    if n <= 2 {
        return Vec::new();
    }

    let candidates: Vec<usize> = (1..n - 1)
        .filter(|&i| {
            let rise = probabilities[i] - probabilities[i - 1];
            let next = probabilities[i + 1] - probabilities[i];
            rise > 0.0 && next <= 0.0
        })
        .collect();

    log::debug!("Found {} candidates in {} windows", candidates.len(), n);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn candidates(values: &[f32]) -> Vec<usize> {
        find_candidates(Array1::from_vec(values.to_vec()).view())
    }

    #[test]
    fn test_unimodal_bump() {
        assert_eq!(candidates(&[0.0, 0.1, 0.3, 0.9, 0.4, 0.2, 0.0]), vec![3]);
    }

    #[test]
    fn test_monotonic_sequences() {
        assert!(candidates(&[0.1, 0.2, 0.3, 0.4, 0.5]).is_empty());
        assert!(candidates(&[0.5, 0.4, 0.3, 0.2, 0.1]).is_empty());
        assert!(candidates(&[0.3, 0.3, 0.3, 0.3]).is_empty());
    }

    #[test]
    fn test_plateau_after_rise_takes_first_index() {
        assert_eq!(candidates(&[0.1, 0.5, 0.5, 0.5, 0.2]), vec![1]);
        // A plateau reached after a flat start does not qualify past the rise
        assert_eq!(candidates(&[0.2, 0.2, 0.6, 0.6, 0.1]), vec![2]);
    }

    #[test]
    fn test_boundaries_never_qualify() {
        assert!(candidates(&[0.9, 0.1, 0.0]).is_empty());
        assert!(candidates(&[0.0, 0.1, 0.9]).is_empty());
        assert!(candidates(&[0.1, 0.9]).is_empty());
        assert!(candidates(&[]).is_empty());
    }

    #[test]
    fn test_multiple_peaks_ascending() {
        assert_eq!(
            candidates(&[0.0, 0.7, 0.1, 0.2, 0.1, 0.8, 0.8, 0.3]),
            vec![1, 3, 5]
        );
    }
}
