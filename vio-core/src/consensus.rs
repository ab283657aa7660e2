use sample_consensus::Estimator;

/// An [`Estimator`] that can also fit its model to an arbitrary number of inliers.
///
/// Sample consensus uses this to polish the winning hypothesis with a least-squares fit
/// over its whole support. `model` is the hypothesis being polished; estimators that
/// produce several candidate solutions use it to pick the one closest to the hypothesis.
pub trait Refine<Data>: Estimator<Data> {
    /// Returns `None` when the refit is degenerate, in which case the hypothesis is kept.
    fn refine<I>(&self, model: &Self::Model, inliers: I) -> Option<Self::Model>
    where
        I: Iterator<Item = Data> + Clone;
}
