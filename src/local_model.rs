//! Variational Bayesian linear regression model local to a rule.
//!
//! The model is `y = w.x + e` with `e ~ N(0, 1/tau)` on bias-augmented inputs.
//! The prior is `p(w, tau | alpha) = N(w | 0, (alpha tau)^-1 I) Gam(tau | a_tau, b_tau)`
//! with the hyperprior `alpha ~ Gam(a_alpha, b_alpha)`. The variational posterior
//! factorizes as `q(w, tau) q(alpha)` where `q(w, tau)` is Normal-Gamma and
//! `q(alpha)` is Gamma. Each training point is weighted by its matching or
//! responsibility so that the model only explains the data assigned to its rule.
use crate::errors::{BerblError, Result};
use crate::parameters::LocalPrior;

use linfa_linalg::{cholesky::*, triangular::*};
use log::trace;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix1, Zip};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::{digamma, ln_gamma};
use std::f64::consts::PI;

/// Inverse and log-determinant of the inverse of a symmetric positive definite matrix
pub(crate) fn spd_inverse(m: &Array2<f64>) -> Result<(Array2<f64>, f64)> {
    let l = m.cholesky()?;
    let z = l.solve_triangular(&Array2::eye(m.nrows()), UPLO::Lower)?;
    let log_det_inv = -2. * l.diag().mapv(f64::ln).sum();
    Ok((z.t().dot(&z), log_det_inv))
}

/// Bayesian linear model fitted by variational inference
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalModel {
    prior: LocalPrior,
    /// Posterior mean of the weights (intercept first)
    weights: Array1<f64>,
    /// Posterior weights covariance scaled by the noise precision, `Λ^-1`
    covariance: Array2<f64>,
    /// `ln|Λ^-1|`
    log_det_cov: f64,
    a_alpha: f64,
    b_alpha: f64,
    a_tau: f64,
    b_tau: f64,
}

impl LocalModel {
    /// A model of `dim` weights (bias included) set to its prior
    pub fn new(dim: usize, prior: LocalPrior) -> Self {
        let e_alpha = prior.a_alpha / prior.b_alpha;
        LocalModel {
            prior,
            weights: Array1::zeros(dim),
            covariance: Array2::eye(dim) / e_alpha,
            log_det_cov: -(dim as f64) * e_alpha.ln(),
            a_alpha: prior.a_alpha,
            b_alpha: prior.b_alpha,
            a_tau: prior.a_tau,
            b_tau: prior.b_tau,
        }
    }

    /// Fits a model on bias-augmented inputs `x` `(n, dim)` and targets `y`
    /// with point weights `r` by iterating variational updates until the bound
    /// gain is lower than `tol` or `max_iters` updates.
    ///
    /// Returns `DataInsufficientError` when fewer than `dim` points have a positive weight.
    pub fn fit(
        x: &ArrayView2<f64>,
        y: &ArrayView1<f64>,
        r: &ArrayView1<f64>,
        prior: LocalPrior,
        tol: f64,
        max_iters: usize,
    ) -> Result<Self> {
        let dim = x.ncols();
        let got = r.iter().filter(|&&v| v > 0.).count();
        if got < dim {
            return Err(BerblError::DataInsufficientError { needed: dim, got });
        }
        let mut model = LocalModel::new(dim, prior);
        let mut prev = f64::NEG_INFINITY;
        for i in 0..max_iters {
            model.update(x, y, r)?;
            let bound = model.bound(x, y, r);
            trace!("Local fit iter {} bound = {}", i, bound);
            if (bound - prev).abs() < tol {
                break;
            }
            prev = bound;
        }
        Ok(model)
    }

    /// One sweep of variational updates of `q(w, tau)` then `q(alpha)`
    pub fn update(
        &mut self,
        x: &ArrayView2<f64>,
        y: &ArrayView1<f64>,
        r: &ArrayView1<f64>,
    ) -> Result<()> {
        let dim = x.ncols() as f64;
        let xr = x * &r.view().insert_axis(Axis(1));
        let e_alpha = self.a_alpha / self.b_alpha;

        let mut precision = xr.t().dot(x);
        precision.diag_mut().mapv_inplace(|v| v + e_alpha);
        let (covariance, log_det_cov) = spd_inverse(&precision)?;
        let xry = xr.t().dot(y);
        let weights = covariance.dot(&xry);
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(BerblError::FitError(
                "Non finite local model weights".to_string(),
            ));
        }

        let yry = Zip::from(r).and(y).fold(0., |acc, &ri, &yi| acc + ri * yi * yi);
        self.a_tau = self.prior.a_tau + 0.5 * r.sum();
        // w.Λ.w = w.X'Ry since Λw = X'Ry
        self.b_tau = self.prior.b_tau + 0.5 * (yry - weights.dot(&xry)).max(0.);
        let e_tau = self.a_tau / self.b_tau;

        self.a_alpha = self.prior.a_alpha + 0.5 * dim;
        self.b_alpha = self.prior.b_alpha
            + 0.5 * (e_tau * weights.dot(&weights) + covariance.diag().sum());

        self.weights = weights;
        self.covariance = covariance;
        self.log_det_cov = log_det_cov;
        Ok(())
    }

    /// Expected log-likelihood of each point under the model
    /// `E[ln N(y_n | w.x_n, 1/tau)]`
    pub fn log_likelihoods(&self, x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Array1<f64> {
        let e_tau = self.noise_precision();
        let cst = 0.5 * (digamma(self.a_tau) - self.b_tau.ln() - (2. * PI).ln());
        let pred = x.dot(&self.weights);
        let quad = (x.dot(&self.covariance) * x).sum_axis(Axis(1));
        let mut ll = Array1::zeros(x.nrows());
        Zip::from(&mut ll)
            .and(&pred)
            .and(&quad)
            .and(y)
            .for_each(|l, &p, &q, &yi| *l = cst - 0.5 * (e_tau * (yi - p) * (yi - p) + q));
        ll
    }

    /// Variational lower bound `L_k(q)` of the model given point weights `r`
    pub fn bound(&self, x: &ArrayView2<f64>, y: &ArrayView1<f64>, r: &ArrayView1<f64>) -> f64 {
        let dim = x.ncols() as f64;
        let prior = &self.prior;
        let e_tau = self.noise_precision();

        let data_fit = r.dot(&self.log_likelihoods(x, y));
        let weights_kl = -ln_gamma(prior.a_alpha) + prior.a_alpha * prior.b_alpha.ln()
            + ln_gamma(self.a_alpha)
            - self.a_alpha * self.b_alpha.ln()
            + 0.5 * dim
            + 0.5 * self.log_det_cov;
        let noise_kl = -ln_gamma(prior.a_tau) + prior.a_tau * prior.b_tau.ln()
            + (prior.a_tau - self.a_tau) * digamma(self.a_tau)
            - prior.a_tau * self.b_tau.ln()
            - prior.b_tau * e_tau
            + ln_gamma(self.a_tau)
            + self.a_tau;
        data_fit + weights_kl + noise_kl
    }

    /// Predictive mean and variance at a bias-augmented input.
    ///
    /// The predictive distribution is a Student-t whose variance is
    /// `b_tau / (a_tau - 1) (1 + x.Λ^-1.x)`, the plug-in noise variance
    /// `b_tau / a_tau` being used when `a_tau <= 1`.
    pub fn predict<D: Data<Elem = f64>>(&self, x: &ArrayBase<D, Ix1>) -> (f64, f64) {
        let mean = x.dot(&self.weights);
        let spread = 1. + x.dot(&self.covariance.dot(x));
        (mean, self.noise_variance() * spread)
    }

    /// Predictive means and variances at bias-augmented inputs `(n, dim)`
    pub fn predict_valvar(&self, x: &ArrayView2<f64>) -> (Array1<f64>, Array1<f64>) {
        let means = x.dot(&self.weights);
        let spread = (x.dot(&self.covariance) * x).sum_axis(Axis(1));
        let vars = spread.mapv(|s| self.noise_variance() * (1. + s));
        (means, vars)
    }

    fn noise_variance(&self) -> f64 {
        if self.a_tau > 1. {
            self.b_tau / (self.a_tau - 1.)
        } else {
            self.b_tau / self.a_tau
        }
    }

    /// Number of weights, bias included
    pub fn dim(&self) -> usize {
        self.weights.len()
    }

    /// Posterior mean of the weights, intercept first
    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// Weights covariance up to the noise precision, `Λ^-1`
    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    /// Posterior mean of the noise precision `E[tau]`
    pub fn noise_precision(&self) -> f64 {
        self.a_tau / self.b_tau
    }

    /// Shape and rate of the noise precision posterior
    pub fn tau_posterior(&self) -> (f64, f64) {
        (self.a_tau, self.b_tau)
    }

    /// Shape and rate of the weight prior precision posterior
    pub fn alpha_posterior(&self) -> (f64, f64) {
        (self.a_alpha, self.b_alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::add_bias;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, s};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;

    fn line_data(n: usize, noise: f64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let x = Array1::linspace(0., 1., n).insert_axis(Axis(1));
        let e = Array1::random_using(n, Normal::new(0., noise).unwrap(), &mut rng);
        let y = x.column(0).mapv(|v| 2. * v + 1.) + e;
        (add_bias(&x), y)
    }

    #[test]
    fn test_fit_line() {
        let (x, y) = line_data(50, 0.01);
        let r = Array1::ones(50);
        let model = LocalModel::fit(
            &x.view(),
            &y.view(),
            &r.view(),
            LocalPrior::default(),
            1e-6,
            50,
        )
        .unwrap();
        assert_abs_diff_eq!(model.weights(), &array![1., 2.], epsilon = 2e-2);
        // noise std around 0.01
        let noise_var = 1. / model.noise_precision();
        assert!(noise_var < 1e-3, "noise variance {noise_var}");
        let (mean, var) = model.predict(&array![1., 0.5]);
        assert_abs_diff_eq!(mean, 2., epsilon = 1e-2);
        assert!(var > 0.);
    }

    #[test]
    fn test_insufficient_data() {
        let (x, y) = line_data(10, 0.1);
        let mut r = Array1::zeros(10);
        r[3] = 1.;
        let res = LocalModel::fit(
            &x.view(),
            &y.view(),
            &r.view(),
            LocalPrior::default(),
            1e-4,
            20,
        );
        assert!(matches!(
            res,
            Err(BerblError::DataInsufficientError { needed: 2, got: 1 })
        ));
    }

    #[test]
    fn test_bound_increases_along_updates() {
        let (x, y) = line_data(30, 0.1);
        let r = Array1::ones(30);
        let mut model = LocalModel::new(2, LocalPrior::default());
        let mut prev = f64::NEG_INFINITY;
        for _ in 0..10 {
            model.update(&x.view(), &y.view(), &r.view()).unwrap();
            let bound = model.bound(&x.view(), &y.view(), &r.view());
            assert!(bound >= prev - 1e-8 * bound.abs().max(1.));
            prev = bound;
        }
    }

    #[test]
    fn test_zero_weights_are_ignored() {
        let (x, y) = line_data(40, 0.1);
        let mut r = Array1::ones(40);
        r.slice_mut(s![20..]).fill(0.);
        let prior = LocalPrior::default();
        let full = LocalModel::fit(&x.view(), &y.view(), &r.view(), prior, 1e-8, 30).unwrap();
        let sub = LocalModel::fit(
            &x.slice(s![..20, ..]),
            &y.slice(s![..20]),
            &Array1::ones(20).view(),
            prior,
            1e-8,
            30,
        )
        .unwrap();
        assert_abs_diff_eq!(full.weights(), sub.weights(), epsilon = 1e-8);
        assert_abs_diff_eq!(full.noise_precision(), sub.noise_precision(), epsilon = 1e-6);
    }

    #[test]
    fn test_predictive_variance_grows_away_from_data() {
        let (x, y) = line_data(30, 0.1);
        let r = Array1::ones(30);
        let model = LocalModel::fit(
            &x.view(),
            &y.view(),
            &r.view(),
            LocalPrior::default(),
            1e-6,
            30,
        )
        .unwrap();
        let (_, inner) = model.predict(&array![1., 0.5]);
        let (_, outer) = model.predict(&array![1., 10.]);
        assert!(outer > inner);
        let (means, vars) = model.predict_valvar(&array![[1., 0.5], [1., 10.]].view());
        assert_abs_diff_eq!(means[0], model.predict(&array![1., 0.5]).0, epsilon = 1e-12);
        assert_abs_diff_eq!(vars[1], outer, epsilon = 1e-12);
    }
}
