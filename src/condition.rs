//! Interval rule conditions.
//!
//! A [RuleCondition] is an axis-aligned hyperrectangle of the input space
//! given as a `(nx, 2)` matrix where each row is the `[low, high]` interval
//! of the corresponding input dimension (same layout as `xlimits`).
//! Matching is binary and boundary inclusive.
use crate::errors::{BerblError, Result};

use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix1, Ix2, Zip};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Width under which an interval is considered as having no volume,
/// relative to the input range.
const EMPTY_WIDTH_RATIO: f64 = 1e-9;

/// Axis-aligned interval matching predicate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    bounds: Array2<f64>,
}

impl RuleCondition {
    /// Constructor from a `(nx, 2)` matrix of `[low, high]` rows.
    ///
    /// Returns an `InvalidConfigError` when a bound is NaN or `low > high`.
    pub fn new(bounds: Array2<f64>) -> Result<Self> {
        if bounds.ncols() != 2 {
            return Err(BerblError::InvalidConfigError(format!(
                "Rule bounds should be a (nx, 2) matrix, got {:?}",
                bounds.shape()
            )));
        }
        for row in bounds.rows() {
            if row[0].is_nan() || row[1].is_nan() || row[0] > row[1] {
                return Err(BerblError::InvalidConfigError(format!(
                    "Invalid rule interval [{}, {}]",
                    row[0], row[1]
                )));
            }
        }
        Ok(RuleCondition { bounds })
    }

    /// The condition matching any input of dimension `nx`, used as default rule.
    pub fn universal(nx: usize) -> Self {
        let mut bounds = Array2::zeros((nx, 2));
        bounds.column_mut(0).fill(f64::NEG_INFINITY);
        bounds.column_mut(1).fill(f64::INFINITY);
        RuleCondition { bounds }
    }

    /// Draws a broad condition: for each dimension the interval center is uniform
    /// within `xlimits` and its half-width is `spread` times the dimension range.
    pub fn random<R: Rng>(xlimits: &Array2<f64>, spread: f64, rng: &mut R) -> Self {
        let mut bounds = Array2::zeros((xlimits.nrows(), 2));
        Zip::from(bounds.rows_mut())
            .and(xlimits.rows())
            .for_each(|mut b, lim| {
                let range = lim[1] - lim[0];
                let center = lim[0] + rng.gen::<f64>() * range;
                let half = spread * range;
                b[0] = (center - half).max(lim[0]);
                b[1] = (center + half).min(lim[1]);
            });
        RuleCondition { bounds }
    }

    /// Input dimension
    pub fn dim(&self) -> usize {
        self.bounds.nrows()
    }

    /// The `(nx, 2)` matrix of `[low, high]` intervals
    pub fn bounds(&self) -> &Array2<f64> {
        &self.bounds
    }

    /// Lower bounds
    pub fn lows(&self) -> ArrayView1<f64> {
        self.bounds.column(0)
    }

    /// Upper bounds
    pub fn highs(&self) -> ArrayView1<f64> {
        self.bounds.column(1)
    }

    /// Whether this is the default rule condition matching everything
    pub fn is_universal(&self) -> bool {
        self.bounds
            .rows()
            .into_iter()
            .all(|b| b[0] == f64::NEG_INFINITY && b[1] == f64::INFINITY)
    }

    /// True iff every feature of `x` lies within its interval, bounds included.
    pub fn matches<D: Data<Elem = f64>>(&self, x: &ArrayBase<D, Ix1>) -> bool {
        Zip::from(self.bounds.rows())
            .and(x)
            .all(|b, &xi| b[0] <= xi && xi <= b[1])
    }

    /// Matching vector (1. if matched, 0. otherwise) of the rows of `x`
    pub fn match_vector<D: Data<Elem = f64>>(&self, x: &ArrayBase<D, Ix2>) -> Array1<f64> {
        x.map_axis(Axis(1), |row| if self.matches(&row) { 1. } else { 0. })
    }

    /// Volume of the hyperrectangle
    pub fn volume(&self) -> f64 {
        self.bounds.rows().into_iter().map(|b| b[1] - b[0]).product()
    }

    /// Whether the interval has (nearly) zero width on some dimension
    fn is_empty(&self, xlimits: &Array2<f64>) -> bool {
        Zip::from(self.bounds.rows())
            .and(xlimits.rows())
            .fold(false, |empty, b, lim| {
                empty || b[1] - b[0] <= EMPTY_WIDTH_RATIO * (lim[1] - lim[0])
            })
    }

    /// Returns a mutated copy of the condition.
    ///
    /// Each bound is moved with probability `rate` (at least one bound is moved)
    /// by a normal step of standard deviation `scale` times the dimension range,
    /// then clamped to `xlimits`. Bounds are reordered so that `low <= high`.
    /// A candidate with no volume is rejected and the mutation retried up to
    /// `max_retries` times, the condition being returned unchanged afterwards.
    pub fn mutate<R: Rng>(
        &self,
        rng: &mut R,
        rate: f64,
        scale: f64,
        xlimits: &Array2<f64>,
        max_retries: usize,
    ) -> RuleCondition {
        if self.is_universal() {
            return self.clone();
        }
        let nbounds = self.bounds.len();
        for _ in 0..max_retries {
            let mut bounds = self.bounds.clone();
            let forced = rng.gen_range(0..nbounds);
            for (k, b) in bounds.iter_mut().enumerate() {
                if k == forced || rng.gen::<f64>() < rate {
                    let lim = xlimits.row(k / 2);
                    let range = lim[1] - lim[0];
                    let step = match Normal::new(0., scale * range) {
                        Ok(normal) => normal.sample(rng),
                        Err(_) => 0.,
                    };
                    *b = (*b + step).clamp(lim[0], lim[1]);
                }
            }
            for mut row in bounds.rows_mut() {
                if row[0] > row[1] {
                    row.swap(0, 1);
                }
            }
            let candidate = RuleCondition { bounds };
            if !candidate.is_empty(xlimits) {
                return candidate;
            }
        }
        self.clone()
    }

    /// Distance from `x` to the hyperrectangle (0. when matched)
    pub fn distance<D: Data<Elem = f64>>(&self, x: &ArrayBase<D, Ix1>) -> f64 {
        Zip::from(self.bounds.rows())
            .and(x)
            .fold(0., |acc, b, &xi| {
                let d = (b[0] - xi).max(0.).max(xi - b[1]);
                acc + d * d
            })
            .sqrt()
    }

    /// Widens the intervals just enough for `x` to be matched
    pub fn extend_to<D: Data<Elem = f64>>(&mut self, x: &ArrayBase<D, Ix1>) {
        Zip::from(self.bounds.rows_mut())
            .and(x)
            .for_each(|mut b, &xi| {
                b[0] = b[0].min(xi);
                b[1] = b[1].max(xi);
            });
    }
}

/// Matching matrix `(n, K)` of the rows of `x` against the given conditions
pub fn matching_matrix<D: Data<Elem = f64>>(
    conditions: &[RuleCondition],
    x: &ArrayBase<D, Ix2>,
) -> Array2<f64> {
    let mut m = Array2::zeros((x.nrows(), conditions.len()));
    for (mut col, cond) in m.columns_mut().into_iter().zip(conditions) {
        col.assign(&cond.match_vector(x));
    }
    m
}
