//! Random sample consensus with adaptive stopping.
//!
//! [`Ransac`] repeatedly draws minimal samples, asks an [`Estimator`] for candidate
//! models and keeps the one supported by the most inliers (a datum is an inlier when its
//! residual is strictly below the threshold). Ties are broken by the lower sum of inlier
//! residuals. The number of iterations adapts to the inlier ratio of the best hypothesis
//! so far:
//!
//! ```text
//! k = ln(1 - p) / ln(1 - w^s)
//! ```
//!
//! where `p` is the requested probability of drawing at least one outlier-free sample,
//! `w` the inlier ratio and `s` the minimal sample size. The loop is further bounded by
//! an iteration cap and an optional time budget.
//!
//! With the `rayon` feature the residuals of each candidate are computed in parallel.
//! Sampling stays sequential, so the result for a given seed does not depend on the
//! feature.

use log::{debug, trace};
use rand::{seq::index, RngCore};
use std::time::{Duration, Instant};
use vio_core::{
    sample_consensus::{Consensus, Estimator, Model},
    Refine,
};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Bound on data and models that must cross threads when scoring in parallel.
#[cfg(feature = "rayon")]
pub trait MaybeSync: Sync {}
#[cfg(feature = "rayon")]
impl<T: Sync> MaybeSync for T {}

/// Bound on data and models that must cross threads when scoring in parallel.
#[cfg(not(feature = "rayon"))]
pub trait MaybeSync {}
#[cfg(not(feature = "rayon"))]
impl<T> MaybeSync for T {}

/// The winning model of a consensus run and its support.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis<M> {
    pub model: M,
    /// Indices into the data, in increasing order.
    pub inliers: Vec<usize>,
    /// The sum of the residuals of the inliers.
    pub residual: f64,
    /// How many samples were drawn.
    pub iterations: usize,
}

impl<M> Hypothesis<M> {
    pub fn inlier_ratio(&self, data_len: usize) -> f64 {
        if data_len == 0 {
            0.0
        } else {
            self.inliers.len() as f64 / data_len as f64
        }
    }
}

/// The support of one candidate model.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Score {
    inliers: usize,
    residual: f64,
}

impl Score {
    /// More inliers wins, then the lower summed residual.
    fn is_better_than(&self, other: &Score) -> bool {
        self.inliers > other.inliers
            || (self.inliers == other.inliers && self.residual < other.residual)
    }

    fn is_not_worse_than(&self, other: &Score) -> bool {
        !other.is_better_than(self)
    }
}

/// The number of iterations needed to draw an outlier-free sample with `probability`
/// given the inlier ratio, clamped to `max_iterations`.
pub fn required_iterations(
    probability: f64,
    inlier_ratio: f64,
    sample_size: usize,
    max_iterations: usize,
) -> usize {
    let good_sample = inlier_ratio.powi(sample_size as i32);
    if good_sample >= 1.0 {
        return 1.min(max_iterations);
    }
    let denominator = (1.0 - good_sample).ln();
    if !denominator.is_finite() || denominator >= 0.0 {
        return max_iterations;
    }
    let k = ((1.0 - probability).ln() / denominator).ceil();
    if k.is_finite() && k >= 0.0 && k < max_iterations as f64 {
        (k as usize).max(1)
    } else {
        max_iterations
    }
}

/// The RANSAC engine.
///
/// The random number generator is owned so that a seeded generator makes runs
/// reproducible.
#[derive(Debug, Clone)]
pub struct Ransac<R> {
    threshold: f64,
    max_iterations: usize,
    probability: f64,
    max_time: Option<Duration>,
    refine: bool,
    rng: R,
}

impl<R> Ransac<R>
where
    R: RngCore,
{
    /// `threshold` is the residual below which a datum supports a model.
    ///
    /// Defaults to `1000` iterations, a probability of `0.99`, no time budget and no
    /// polish.
    pub fn new(threshold: f64, rng: R) -> Self {
        Self {
            threshold,
            max_iterations: 1000,
            probability: 0.99,
            max_time: None,
            refine: false,
            rng,
        }
    }

    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    #[must_use]
    pub fn probability(self, probability: f64) -> Self {
        Self {
            probability,
            ..self
        }
    }

    /// Stops sampling once this much time has passed, keeping the best hypothesis.
    #[must_use]
    pub fn max_time(self, max_time: Option<Duration>) -> Self {
        Self { max_time, ..self }
    }

    /// Polishes the winning hypothesis with [`Refine::refine`] in [`Ransac::run_refined`].
    #[must_use]
    pub fn refine(self, refine: bool) -> Self {
        Self { refine, ..self }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn residuals<M, Data>(model: &M, data: &[Data]) -> Vec<f64>
    where
        M: Model<Data> + MaybeSync,
        Data: MaybeSync,
    {
        #[cfg(not(feature = "rayon"))]
        let residuals = data.iter().map(|datum| model.residual(datum)).collect();
        #[cfg(feature = "rayon")]
        let residuals = data.par_iter().map(|datum| model.residual(datum)).collect();
        residuals
    }

    fn score(&self, residuals: &[f64]) -> Score {
        residuals
            .iter()
            .filter(|&&r| r < self.threshold)
            .fold(
                Score {
                    inliers: 0,
                    residual: 0.0,
                },
                |score, &r| Score {
                    inliers: score.inliers + 1,
                    residual: score.residual + r,
                },
            )
    }

    fn inliers(&self, residuals: &[f64]) -> Vec<usize> {
        residuals
            .iter()
            .enumerate()
            .filter(|&(_, &r)| r < self.threshold)
            .map(|(ix, _)| ix)
            .collect()
    }

    /// Runs sample consensus without polishing.
    ///
    /// Returns `None` when there are fewer data than the minimal sample size, or when the
    /// best hypothesis is supported by fewer than that many inliers.
    pub fn run<E, Data, I>(&mut self, estimator: &E, data: I) -> Option<Hypothesis<E::Model>>
    where
        E: Estimator<Data>,
        E::Model: MaybeSync,
        Data: Clone + MaybeSync,
        I: Iterator<Item = Data>,
    {
        let data: Vec<Data> = data.collect();
        self.sample(estimator, &data)
    }

    /// Runs sample consensus and, if enabled, polishes the winner over its inliers.
    ///
    /// The polished model replaces the hypothesis only if its support is not worse.
    pub fn run_refined<E, Data, I>(&mut self, estimator: &E, data: I) -> Option<Hypothesis<E::Model>>
    where
        E: Refine<Data>,
        E::Model: MaybeSync,
        Data: Clone + MaybeSync,
        I: Iterator<Item = Data>,
    {
        let data: Vec<Data> = data.collect();
        let hypothesis = self.sample(estimator, &data)?;
        if !self.refine {
            return Some(hypothesis);
        }
        let inliers = hypothesis.inliers.iter().map(|&ix| data[ix].clone());
        let refined = match estimator.refine(&hypothesis.model, inliers) {
            Some(refined) => refined,
            None => {
                debug!("polish was degenerate, keeping the sampled hypothesis");
                return Some(hypothesis);
            }
        };
        let residuals = Self::residuals(&refined, &data);
        let score = self.score(&residuals);
        let previous = Score {
            inliers: hypothesis.inliers.len(),
            residual: hypothesis.residual,
        };
        if score.is_not_worse_than(&previous) {
            trace!(
                "polish accepted: {} -> {} inliers",
                previous.inliers,
                score.inliers
            );
            Some(Hypothesis {
                model: refined,
                inliers: self.inliers(&residuals),
                residual: score.residual,
                iterations: hypothesis.iterations,
            })
        } else {
            trace!(
                "polish rejected: {} -> {} inliers",
                previous.inliers,
                score.inliers
            );
            Some(hypothesis)
        }
    }

    fn sample<E, Data>(&mut self, estimator: &E, data: &[Data]) -> Option<Hypothesis<E::Model>>
    where
        E: Estimator<Data>,
        E::Model: MaybeSync,
        Data: Clone + MaybeSync,
    {
        let sample_size = E::MIN_SAMPLES;
        if data.len() < sample_size || sample_size == 0 {
            debug!(
                "not enough data for consensus: {} < {}",
                data.len(),
                sample_size
            );
            return None;
        }
        let start = Instant::now();
        let mut required = self.max_iterations;
        let mut best: Option<(E::Model, Score, Vec<f64>)> = None;
        let mut iterations = 0;
        while iterations < required {
            if let Some(max_time) = self.max_time {
                if start.elapsed() >= max_time {
                    debug!("consensus time budget exhausted after {} iterations", iterations);
                    break;
                }
            }
            iterations += 1;
            let indices = index::sample(&mut self.rng, data.len(), sample_size).into_vec();
            let sample = indices.iter().map(|&ix| data[ix].clone());
            for model in estimator.estimate(sample) {
                let residuals = Self::residuals(&model, data);
                let score = self.score(&residuals);
                let improves = best
                    .as_ref()
                    .map_or(true, |(_, best_score, _)| score.is_better_than(best_score));
                if improves {
                    let ratio = score.inliers as f64 / data.len() as f64;
                    required = required_iterations(
                        self.probability,
                        ratio,
                        sample_size,
                        self.max_iterations,
                    );
                    best = Some((model, score, residuals));
                }
            }
        }

        let (model, score, residuals) = best?;
        if score.inliers < sample_size {
            debug!(
                "best hypothesis has only {} inliers after {} iterations",
                score.inliers, iterations
            );
            return None;
        }
        debug!(
            "consensus found {} of {} inliers in {} iterations",
            score.inliers,
            data.len(),
            iterations
        );
        Some(Hypothesis {
            model,
            inliers: self.inliers(&residuals),
            residual: score.residual,
            iterations,
        })
    }
}

impl<E, R, Data> Consensus<E, Data> for Ransac<R>
where
    E: Estimator<Data>,
    E::Model: MaybeSync,
    R: RngCore,
    Data: Clone + MaybeSync,
{
    type Inliers = Vec<usize>;

    fn model<I>(&mut self, estimator: &E, data: I) -> Option<E::Model>
    where
        I: Iterator<Item = Data> + Clone,
    {
        self.run(estimator, data).map(|hypothesis| hypothesis.model)
    }

    fn model_inliers<I>(&mut self, estimator: &E, data: I) -> Option<(E::Model, Self::Inliers)>
    where
        I: Iterator<Item = Data> + Clone,
    {
        self.run(estimator, data)
            .map(|hypothesis| (hypothesis.model, hypothesis.inliers))
    }
}
