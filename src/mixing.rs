//! Gating of the rules of a mixture.
//!
//! Rules are weighted by a generalized softmax restricted to the matching rules,
//! `g_k(x) = m_k(x) exp(v_k) / sum_j m_j(x) exp(v_j)`, with the gating
//! coefficients prior `v_k ~ N(0, 1/beta_k)`, `beta_k ~ Gam(a_beta, b_beta)`.
//! The posterior over `v` is approximated by a Laplace approximation around
//! the mode found by iteratively reweighted least squares.
use crate::errors::{BerblError, Result};
use crate::local_model::spd_inverse;
use crate::parameters::MixingPrior;
use crate::utils::normalize_log_rows;

use linfa_linalg::{cholesky::*, triangular::*};
use log::trace;
use ndarray::{Array1, Array2, Axis, Zip};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

const MAX_IRLS_ITERS: usize = 40;
const MAX_STEP_HALVINGS: usize = 20;
const IRLS_TOL: f64 = 1e-8;

/// Gating parameters of a mixture of `K` rules
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mixing {
    prior: MixingPrior,
    /// Gating coefficients mode
    v: Array1<f64>,
    /// Laplace covariance of the gating coefficients `Λ_V^-1`
    covariance: Array2<f64>,
    /// `ln|Λ_V^-1|`
    log_det_cov: f64,
    a_beta: Array1<f64>,
    b_beta: Array1<f64>,
}

/// Log gating weights `(n, K)` given matching `m` and coefficients `v`,
/// `-inf` where a rule does not match.
fn log_gating_with(m: &Array2<f64>, v: &Array1<f64>) -> Array2<f64> {
    let mut log_g = Array2::zeros(m.raw_dim());
    Zip::from(log_g.rows_mut())
        .and(m.rows())
        .for_each(|mut lg, mr| {
            Zip::from(&mut lg)
                .and(&mr)
                .and(v)
                .for_each(|l, &mi, &vi| {
                    *l = if mi > 0. {
                        vi + mi.ln()
                    } else {
                        f64::NEG_INFINITY
                    }
                });
        });
    normalize_log_rows(&mut log_g);
    log_g
}

/// `sum_nk r_nk ln g_nk` over the positive responsibilities
fn expected_log_gating(r: &Array2<f64>, log_g: &Array2<f64>) -> f64 {
    Zip::from(r)
        .and(log_g)
        .fold(0., |acc, &ri, &lg| if ri > 0. { acc + ri * lg } else { acc })
}

impl Mixing {
    /// Gating of `k` rules set to its prior
    pub fn new(k: usize, prior: MixingPrior) -> Self {
        let e_beta = prior.a_beta / prior.b_beta;
        Mixing {
            prior,
            v: Array1::zeros(k),
            covariance: Array2::eye(k) / e_beta,
            log_det_cov: -(k as f64) * e_beta.ln(),
            a_beta: Array1::from_elem(k, prior.a_beta),
            b_beta: Array1::from_elem(k, prior.b_beta),
        }
    }

    /// Number of gated rules
    pub fn n_rules(&self) -> usize {
        self.v.len()
    }

    /// Gating coefficients mode
    pub fn coefficients(&self) -> &Array1<f64> {
        &self.v
    }

    /// Log gating weights `(n, K)` for the matching matrix `m` `(n, K)`
    pub fn log_gating(&self, m: &Array2<f64>) -> Array2<f64> {
        log_gating_with(m, &self.v)
    }

    /// Gating weights `(n, K)` for the matching matrix `m` `(n, K)`
    pub fn gating(&self, m: &Array2<f64>) -> Array2<f64> {
        self.log_gating(m).mapv(f64::exp)
    }

    /// Responsibilities `(n, K)` of the rules given the matching matrix and
    /// the per-point expected log-likelihoods `(n, K)` of the local models.
    /// Each row sums to one over the matching rules.
    pub fn responsibilities(&self, m: &Array2<f64>, log_lik: &Array2<f64>) -> Array2<f64> {
        let mut log_r = self.log_gating(m) + log_lik;
        // unmatched entries stay at -inf whatever the likelihood
        Zip::from(&mut log_r).and(m).for_each(|lr, &mi| {
            if mi <= 0. {
                *lr = f64::NEG_INFINITY
            }
        });
        normalize_log_rows(&mut log_r);
        log_r.mapv(f64::exp)
    }

    /// Negative Hessian of the gating objective at the gating weights `g`
    fn hessian(&self, g: &Array2<f64>, e_beta: &Array1<f64>) -> Array2<f64> {
        let mut h = -g.t().dot(g);
        let diag = g.sum_axis(Axis(0)) + e_beta;
        h.diag_mut().zip_mut_with(&diag, |hi, &di| *hi += di);
        h
    }

    /// Updates `q(v)` (IRLS mode and Laplace covariance) then `q(beta)`
    /// given the matching matrix and the responsibilities.
    pub fn update(&mut self, m: &Array2<f64>, r: &Array2<f64>) -> Result<()> {
        let e_beta = &self.a_beta / &self.b_beta;
        let objective = |v: &Array1<f64>| {
            expected_log_gating(r, &log_gating_with(m, v)) - 0.5 * (&e_beta * v * v).sum()
        };

        let mut v = self.v.clone();
        let mut obj = objective(&v);
        for i in 0..MAX_IRLS_ITERS {
            let g = log_gating_with(m, &v).mapv(f64::exp);
            let grad = (r - &g).sum_axis(Axis(0)) - &e_beta * &v;
            let l = self.hessian(&g, &e_beta).cholesky()?;
            let z = l.solve_triangular(&grad.insert_axis(Axis(1)), UPLO::Lower)?;
            let step = l.t().solve_triangular(&z, UPLO::Upper)?.remove_axis(Axis(1));

            let mut t = 1.;
            let mut gain = None;
            for _ in 0..MAX_STEP_HALVINGS {
                let candidate = &v + &(t * &step);
                let cand_obj = objective(&candidate);
                if cand_obj >= obj {
                    gain = Some(cand_obj - obj);
                    v = candidate;
                    obj = cand_obj;
                    break;
                }
                t *= 0.5;
            }
            trace!("IRLS iter {} objective = {} gain = {:?}", i, obj, gain);
            match gain {
                Some(gain) if gain >= IRLS_TOL => continue,
                _ => break,
            }
        }
        if v.iter().any(|vi| !vi.is_finite()) {
            return Err(BerblError::FitError(
                "Non finite gating coefficients".to_string(),
            ));
        }

        let g = log_gating_with(m, &v).mapv(f64::exp);
        let (covariance, log_det_cov) = spd_inverse(&self.hessian(&g, &e_beta))?;
        self.a_beta.fill(self.prior.a_beta + 0.5);
        self.b_beta = Zip::from(&v)
            .and(covariance.diag())
            .map_collect(|&vi, &ci| self.prior.b_beta + 0.5 * (vi * vi + ci));
        self.v = v;
        self.covariance = covariance;
        self.log_det_cov = log_det_cov;
        Ok(())
    }

    /// Gating part `L_M(q)` of the variational bound given the matching matrix
    /// and the responsibilities
    pub fn bound(&self, m: &Array2<f64>, r: &Array2<f64>) -> f64 {
        let log_g = self.log_gating(m);
        let prior = &self.prior;
        let k = self.n_rules() as f64;

        let beta_kl = Zip::from(&self.a_beta)
            .and(&self.b_beta)
            .fold(0., |acc, &a, &b| {
                acc - ln_gamma(prior.a_beta) + prior.a_beta * prior.b_beta.ln() + ln_gamma(a)
                    - a * b.ln()
            });
        let assignment = Zip::from(r).and(&log_g).fold(0., |acc, &ri, &lg| {
            if ri > 0. {
                acc + ri * (lg - ri.ln())
            } else {
                acc
            }
        });
        beta_kl + assignment + 0.5 * self.log_det_cov + 0.5 * k
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_gating_restricted_to_matching_rules() {
        let mut mixing = Mixing::new(3, MixingPrior::default());
        mixing.v = array![0., 1., -1.];
        let m = array![[1., 1., 0.], [0., 0., 1.], [1., 1., 1.]];
        let g = mixing.gating(&m);
        assert_abs_diff_eq!(g[[0, 2]], 0.);
        assert_abs_diff_eq!(g[[1, 2]], 1., epsilon = 1e-12);
        let e = 1f64.exp();
        assert_abs_diff_eq!(g[[0, 1]], e / (1. + e), epsilon = 1e-12);
        assert_abs_diff_eq!(g.sum_axis(Axis(1)), array![1., 1., 1.], epsilon = 1e-12);
    }

    #[test]
    fn test_responsibilities_sum_to_one() {
        let mixing = Mixing::new(3, MixingPrior::default());
        let m = array![[1., 1., 0.], [0., 1., 1.], [1., 1., 1.], [1., 0., 0.]];
        let log_lik = array![
            [-1., -50., 3.],
            [0.2, -700., -800.],
            [-1e3, -2e3, -1.5e3],
            [-3., 1., 2.]
        ];
        let r = mixing.responsibilities(&m, &log_lik);
        for (rr, mr) in r.rows().into_iter().zip(m.rows()) {
            assert_abs_diff_eq!(rr.sum(), 1., epsilon = 1e-6);
            Zip::from(&rr).and(&mr).for_each(|&ri, &mi| {
                if mi == 0. {
                    assert_eq!(ri, 0.)
                }
            });
        }
        // the more likely rule takes most of the responsibility
        assert!(r[[0, 0]] > 0.99);
        assert_abs_diff_eq!(r[[3, 0]], 1., epsilon = 1e-12);
    }

    #[test]
    fn test_update_on_exclusive_matching_keeps_zero_coefficients() {
        let mut mixing = Mixing::new(2, MixingPrior::default());
        let m = array![[1., 0.], [1., 0.], [0., 1.]];
        mixing.update(&m, &m).unwrap();
        assert_abs_diff_eq!(mixing.coefficients(), &array![0., 0.], epsilon = 1e-12);
        // gating is fixed by matching: the update is a fixed point
        let bound = mixing.bound(&m, &m);
        assert!(bound.is_finite());
        mixing.update(&m, &m).unwrap();
        assert_abs_diff_eq!(mixing.bound(&m, &m), bound, epsilon = 1e-9);
    }

    #[test]
    fn test_update_moves_coefficients_toward_responsibilities() {
        let mut mixing = Mixing::new(2, MixingPrior { a_beta: 1., b_beta: 1. });
        let m = Array2::ones((20, 2));
        let mut r = Array2::zeros((20, 2));
        r.column_mut(0).fill(0.8);
        r.column_mut(1).fill(0.2);
        mixing.update(&m, &r).unwrap();
        let g = mixing.gating(&m);
        // the prior shrinks toward equal gating
        assert!(g[[0, 0]] > 0.6 && g[[0, 0]] < 0.8);
        assert!(mixing.coefficients()[0] > mixing.coefficients()[1]);
    }
}
