use vio_core::KeypointMatches;

/// The positions of `matches` that are not listed in `inliers`, in increasing order.
///
/// # Panics
///
/// Panics if an inlier is not a valid position in `matches`.
pub fn find_outliers(matches: &KeypointMatches, inliers: &[usize]) -> Vec<usize> {
    let mut is_inlier = vec![false; matches.len()];
    for &inlier in inliers {
        assert!(
            inlier < matches.len(),
            "inlier {} is out of range for {} matches",
            inlier,
            matches.len()
        );
        is_inlier[inlier] = true;
    }
    is_inlier
        .iter()
        .enumerate()
        .filter(|&(_, &inlier)| !inlier)
        .map(|(ix, _)| ix)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::collections::HashSet;

    fn matches(n: usize) -> KeypointMatches {
        (0..n).map(|i| (i, n - 1 - i)).collect()
    }

    #[test]
    fn complement() {
        assert_eq!(find_outliers(&matches(6), &[4, 1, 2]), vec![0, 3, 5]);
        assert_eq!(find_outliers(&matches(3), &[]), vec![0, 1, 2]);
        assert!(find_outliers(&matches(0), &[]).is_empty());
    }

    #[test]
    #[should_panic]
    fn out_of_range_inlier_panics() {
        find_outliers(&matches(3), &[3]);
    }

    #[quickcheck]
    fn inliers_and_outliers_partition(n: u8, picks: Vec<u8>) -> bool {
        let n = n as usize;
        let inliers: Vec<usize> = if n == 0 {
            vec![]
        } else {
            picks.iter().map(|&p| p as usize % n).collect()
        };
        let outliers = find_outliers(&matches(n), &inliers);
        let inlier_set: HashSet<usize> = inliers.iter().copied().collect();
        let outlier_set: HashSet<usize> = outliers.iter().copied().collect();
        outliers.windows(2).all(|w| w[0] < w[1])
            && inlier_set.is_disjoint(&outlier_set)
            && inlier_set.len() + outlier_set.len() == n
    }
}
