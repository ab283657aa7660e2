use derive_more::{AsRef, Deref, From, Into};
use nalgebra::{Matrix3, Point3, UnitVector3, Vector3};
use std::collections::HashSet;

/// A correspondence between the keypoint at index `reference` of the reference frame
/// and the keypoint at index `current` of the current frame.
///
/// These are positions in the keypoint sequences, not landmark ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexMatch {
    pub reference: usize,
    pub current: usize,
}

impl IndexMatch {
    pub fn new(reference: usize, current: usize) -> Self {
        Self { reference, current }
    }
}

/// An ordered list of keypoint correspondences between two frames.
///
/// Matching is one-to-one: a reference index and a current index each appear at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, AsRef, Deref, From, Into)]
pub struct KeypointMatches(pub Vec<IndexMatch>);

impl KeypointMatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub fn push(&mut self, reference: usize, current: usize) {
        self.0.push(IndexMatch::new(reference, current));
    }

    /// Keeps only the matches at the given positions of this list, in their original order.
    ///
    /// Positions that are repeated are only kept once.
    ///
    /// # Panics
    ///
    /// Panics if a position is out of range.
    pub fn retain_positions(&mut self, positions: &[usize]) {
        let mut keep = vec![false; self.0.len()];
        for &ix in positions {
            assert!(
                ix < keep.len(),
                "match position {} out of range for {} matches",
                ix,
                keep.len()
            );
            keep[ix] = true;
        }
        let mut keep = keep.into_iter();
        self.0.retain(|_| keep.next().unwrap_or(false));
    }

    /// Checks that no reference index and no current index is used twice.
    pub fn is_one_to_one(&self) -> bool {
        let mut references = HashSet::with_capacity(self.0.len());
        let mut currents = HashSet::with_capacity(self.0.len());
        self.0
            .iter()
            .all(|m| references.insert(m.reference) && currents.insert(m.current))
    }
}

impl FromIterator<(usize, usize)> for KeypointMatches {
    fn from_iter<T: IntoIterator<Item = (usize, usize)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(reference, current)| IndexMatch::new(reference, current))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a KeypointMatches {
    type Item = &'a IndexMatch;
    type IntoIter = core::slice::Iter<'a, IndexMatch>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A pair of bearings observing the same landmark from the reference and the current camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BearingMatch(pub UnitVector3<f64>, pub UnitVector3<f64>);

/// A pair of triangulated points of the same landmark, expressed in the reference and the
/// current camera respectively.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMatch(pub Point3<f64>, pub Point3<f64>);

/// A stereo correspondence once the rotation between the two cameras is known.
///
/// `delta` is `p_ref - R * p_cur`, which is the translation this single correspondence
/// votes for, and `information` is the inverse of its covariance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CovariantPointMatch {
    pub delta: Vector3<f64>,
    pub information: Matrix3<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn retain_keeps_original_order() {
        let mut matches: KeypointMatches = vec![(0, 5), (1, 4), (2, 3), (3, 2)].into_iter().collect();
        matches.retain_positions(&[3, 0, 3]);
        assert_eq!(matches, vec![(0, 5), (3, 2)].into_iter().collect::<KeypointMatches>());
    }

    #[test]
    #[should_panic]
    fn retain_out_of_range_panics() {
        let mut matches: KeypointMatches = vec![(0, 0)].into_iter().collect();
        matches.retain_positions(&[1]);
    }

    #[test]
    fn one_to_one() {
        let ok: KeypointMatches = vec![(0, 1), (1, 0)].into_iter().collect();
        let bad: KeypointMatches = vec![(0, 1), (1, 1)].into_iter().collect();
        assert!(ok.is_one_to_one());
        assert!(!bad.is_one_to_one());
    }

    #[quickcheck]
    fn retain_never_grows(pairs: Vec<(u8, u8)>, positions: Vec<usize>) -> bool {
        let mut matches: KeypointMatches = pairs
            .iter()
            .map(|&(a, b)| (a as usize, b as usize))
            .collect();
        let before = matches.clone();
        if before.is_empty() {
            return true;
        }
        let positions: Vec<usize> = positions.iter().map(|p| p % before.len()).collect();
        matches.retain_positions(&positions);
        matches.len() <= before.len() && matches.iter().all(|m| before.contains(m))
    }
}
