//! Model evidence of a set of rules.
//!
//! The log marginal likelihood of the data given a set of rules is bounded below
//! by the variational bound `L(q) = sum_k L_k(q) + L_M(q)` summing the local
//! models bounds and the gating bound. The fitness of a set of `K` rules adds
//! `ln K!` to account for the `K!` equivalent orderings of the rules and
//! discounts rules too small to be fitted.
use crate::local_model::LocalModel;
use crate::mixing::Mixing;
use crate::utils::ln_factorial;

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Variational bound `L(q)` of a fitted mixture given the matching matrix `m`
/// and the responsibilities `r`
pub fn variational_bound(
    models: &[LocalModel],
    mixing: &Mixing,
    x_bias: &ArrayView2<f64>,
    y: &ArrayView1<f64>,
    m: &Array2<f64>,
    r: &Array2<f64>,
) -> f64 {
    let local: f64 = models
        .iter()
        .zip(r.columns())
        .map(|(model, rk)| model.bound(x_bias, y, &rk))
        .sum();
    local + mixing.bound(m, r)
}

/// Evidence based score of a set of rules
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Variational bound `L(q)`
    pub bound: f64,
    /// `ln K!` with `K` the number of fitted rules
    pub log_k_factorial: f64,
    /// Total penalty of degenerate rules
    pub degenerate_discount: f64,
    /// `bound + ln K! - discount`
    pub fitness: f64,
}

impl Evidence {
    /// Scores a mixture of `n_rules` fitted rules reaching the bound `bound`
    /// where `n_degenerate` rules were discarded at `penalty` each.
    pub fn new(bound: f64, n_rules: usize, n_degenerate: usize, penalty: f64) -> Self {
        let log_k_factorial = ln_factorial(n_rules);
        let degenerate_discount = n_degenerate as f64 * penalty;
        Evidence {
            bound,
            log_k_factorial,
            degenerate_discount,
            fitness: bound + log_k_factorial - degenerate_discount,
        }
    }
}
