//! Mixture of rules fitted by variational EM.
//!
//! Rules are first trained independently on the points they match, then the
//! local models and the gating are jointly refined: responsibilities are
//! computed from the gating and the local models likelihoods (E-step), each
//! local model and the gating are updated given the responsibilities (M-step),
//! until the variational bound stops improving.
use crate::condition::{matching_matrix, RuleCondition};
use crate::errors::{BerblError, Result};
use crate::evidence::variational_bound;
use crate::local_model::LocalModel;
use crate::mixing::Mixing;
use crate::parameters::FitParams;
use crate::types::{FitWarning, TrainingData};

use log::{debug, trace};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use serde::{Deserialize, Serialize};

/// A rule: an interval condition and the local model fitted on the data it matches
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    condition: RuleCondition,
    model: LocalModel,
}

impl Rule {
    /// Matching condition
    pub fn condition(&self) -> &RuleCondition {
        &self.condition
    }

    /// Local model
    pub fn model(&self) -> &LocalModel {
        &self.model
    }
}

/// Result of the fit of a set of rule conditions
#[derive(Clone, Debug)]
pub struct MixtureFit {
    /// Fitted mixture
    pub model: MixtureModel,
    /// Variational bound reached
    pub bound: f64,
    /// Bound value after each EM iteration
    pub bound_trace: Vec<f64>,
    /// Number of conditions discarded for matching too few points
    pub n_degenerate: usize,
    /// Set when the EM loop did not converge
    pub warning: Option<FitWarning>,
}

/// Trained mixture of rules
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MixtureModel {
    rules: Vec<Rule>,
    mixing: Mixing,
}

fn with_bias<D: Data<Elem = f64>>(x: &ArrayBase<D, Ix1>) -> Array1<f64> {
    std::iter::once(1.).chain(x.iter().cloned()).collect()
}

fn log_likelihoods(models: &[LocalModel], data: &TrainingData) -> Array2<f64> {
    let mut ll = Array2::zeros((data.nsamples(), models.len()));
    for (mut col, model) in ll.columns_mut().into_iter().zip(models) {
        col.assign(&model.log_likelihoods(&data.x_bias.view(), &data.y.view()));
    }
    ll
}

/// Fits the rules defined by `conditions` on the training data.
///
/// Conditions matching fewer points than the local model weights count are
/// discarded and counted as degenerate. Fails with `UnmatchedInputError` when
/// a training point is matched by none of the remaining rules.
pub fn fit_mixture(
    conditions: &[RuleCondition],
    data: &TrainingData,
    params: &FitParams,
) -> Result<MixtureFit> {
    let x_bias = data.x_bias.view();
    let y = data.y.view();

    let mut all_conditions = conditions.to_vec();
    if params.default_rule && !conditions.iter().any(|c| c.is_universal()) {
        all_conditions.push(RuleCondition::universal(data.nx()));
    }

    let mut kept = vec![];
    let mut models = vec![];
    let mut n_degenerate = 0;
    for condition in all_conditions {
        let matched = condition.match_vector(&data.x);
        match LocalModel::fit(
            &x_bias,
            &y,
            &matched.view(),
            params.local_prior,
            params.local_tol,
            params.max_local_iters,
        ) {
            Ok(model) => {
                kept.push(condition);
                models.push(model);
            }
            Err(BerblError::DataInsufficientError { needed, got }) => {
                trace!("Degenerate rule matching {got} points (< {needed})");
                n_degenerate += 1;
            }
            Err(err) => return Err(err),
        }
    }

    let m = matching_matrix(&kept, &data.x);
    if let Some(index) = m
        .sum_axis(Axis(1))
        .iter()
        .position(|&count| count == 0.)
    {
        return Err(BerblError::UnmatchedInputError { index });
    }

    let mut mixing = Mixing::new(kept.len(), params.mixing_prior);
    let mut bound = f64::NEG_INFINITY;
    let mut bound_trace = Vec::with_capacity(params.max_em_iters);
    let mut delta = f64::INFINITY;
    let mut converged = false;
    for i in 0..params.max_em_iters {
        let previous = (models.clone(), mixing.clone());

        let r = mixing.responsibilities(&m, &log_likelihoods(&models, data));
        for (model, rk) in models.iter_mut().zip(r.columns()) {
            model.update(&x_bias, &y, &rk)?;
        }
        mixing.update(&m, &r)?;

        let new_bound = variational_bound(&models, &mixing, &x_bias, &y, &m, &r);
        if new_bound.is_nan() {
            return Err(BerblError::FitError(
                "Variational bound is not a number".to_string(),
            ));
        }
        trace!("EM iter {} bound = {}", i, new_bound);

        if new_bound < bound {
            // gating approximation may slightly decrease the bound: keep previous state
            (models, mixing) = previous;
            converged = true;
            break;
        }
        bound_trace.push(new_bound);
        delta = new_bound - bound;
        bound = new_bound;
        if delta < params.em_tol {
            converged = true;
            break;
        }
    }

    let warning = if converged {
        None
    } else {
        let warning = FitWarning::NonConvergence {
            iterations: params.max_em_iters,
            delta,
        };
        debug!("{}", warning);
        Some(warning)
    };

    let rules = kept
        .into_iter()
        .zip(models)
        .map(|(condition, model)| Rule { condition, model })
        .collect();
    Ok(MixtureFit {
        model: MixtureModel { rules, mixing },
        bound,
        bound_trace,
        n_degenerate,
        warning,
    })
}

impl MixtureModel {
    /// Number of rules
    pub fn n_rules(&self) -> usize {
        self.rules.len()
    }

    /// Rules of the mixture
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Gating of the mixture
    pub fn mixing(&self) -> &Mixing {
        &self.mixing
    }

    /// Input dimension
    pub fn dim(&self) -> usize {
        self.rules.first().map(|r| r.model.dim() - 1).unwrap_or(0)
    }

    /// Predictive mean and variance at `x` mixing the predictions of the
    /// matching rules weighted by the gating.
    ///
    /// Returns `UnmatchedInputError` when no rule matches `x` and
    /// `InvalidConfigError` when `x` is not of the input dimension.
    pub fn predict_point<D: Data<Elem = f64>>(&self, x: &ArrayBase<D, Ix1>) -> Result<(f64, f64)> {
        if x.len() != self.dim() {
            return Err(BerblError::InvalidConfigError(format!(
                "Input has {} features, rules have {}",
                x.len(),
                self.dim()
            )));
        }
        let xb = with_bias(x);
        let v = self.mixing.coefficients();
        let matching: Vec<usize> = (0..self.n_rules())
            .filter(|&k| self.rules[k].condition.matches(x))
            .collect();
        if matching.is_empty() {
            return Err(BerblError::UnmatchedInputError { index: 0 });
        }
        let vmax = matching
            .iter()
            .map(|&k| v[k])
            .fold(f64::NEG_INFINITY, f64::max);
        let norm: f64 = matching.iter().map(|&k| (v[k] - vmax).exp()).sum();

        let (mut mean, mut second) = (0., 0.);
        for &k in matching.iter() {
            let g = (v[k] - vmax).exp() / norm;
            let (mu, var) = self.rules[k].model.predict(&xb);
            mean += g * mu;
            second += g * (var + mu * mu);
        }
        Ok((mean, (second - mean * mean).max(0.)))
    }

    /// Predictive means and variances at inputs `(n, nx)`
    ///
    /// Returns `UnmatchedInputError` with the index of the first input matched by no rule.
    pub fn predict_valvar<D: Data<Elem = f64>>(
        &self,
        x: &ArrayBase<D, Ix2>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        let mut means = Array1::zeros(x.nrows());
        let mut vars = Array1::zeros(x.nrows());
        for (index, row) in x.rows().into_iter().enumerate() {
            let (mean, var) = self.predict_point(&row).map_err(|err| match err {
                BerblError::UnmatchedInputError { .. } => {
                    BerblError::UnmatchedInputError { index }
                }
                err => err,
            })?;
            means[index] = mean;
            vars[index] = var;
        }
        Ok((means, vars))
    }

    /// Predictive means at inputs `(n, nx)`
    pub fn predict<D: Data<Elem = f64>>(&self, x: &ArrayBase<D, Ix2>) -> Result<Array1<f64>> {
        Ok(self.predict_valvar(x)?.0)
    }

    /// Predictive means and variances `(n, K)` of each rule at inputs `(n, nx)`,
    /// NaN where a rule does not match.
    pub fn predict_rules<D: Data<Elem = f64>>(
        &self,
        x: &ArrayBase<D, Ix2>,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        if x.ncols() != self.dim() {
            return Err(BerblError::InvalidConfigError(format!(
                "Inputs have {} features, rules have {}",
                x.ncols(),
                self.dim()
            )));
        }
        let mut means = Array2::from_elem((x.nrows(), self.n_rules()), f64::NAN);
        let mut vars = Array2::from_elem((x.nrows(), self.n_rules()), f64::NAN);
        for (i, row) in x.rows().into_iter().enumerate() {
            let xb = with_bias(&row);
            for (k, rule) in self.rules.iter().enumerate() {
                if rule.condition.matches(&row) {
                    let (mu, var) = rule.model.predict(&xb);
                    means[[i, k]] = mu;
                    vars[[i, k]] = var;
                }
            }
        }
        Ok((means, vars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Zip};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;

    /// Two lines joined at x = 1 with a jump
    fn piecewise(n: usize, noise: f64) -> TrainingData {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let x = Array1::linspace(0., 2., n);
        let e = Array1::random_using(n, Normal::new(0., noise).unwrap(), &mut rng);
        let y = x.mapv(|v| if v < 1. { 2. * v + 1. } else { -3. * v + 5. }) + e;
        TrainingData::new(&x.insert_axis(Axis(1)), &y)
    }

    fn cond(low: f64, high: f64) -> RuleCondition {
        RuleCondition::new(array![[low, high]]).unwrap()
    }

    #[test]
    fn test_bound_monotone_on_exclusive_rules() {
        let data = piecewise(40, 0.1);
        let params = FitParams::default().em_tol(1e-12).max_em_iters(30);
        let fit = fit_mixture(&[cond(0., 0.99), cond(1., 2.)], &data, &params).unwrap();
        assert!(fit.bound_trace.len() > 1);
        for pair in fit.bound_trace.windows(2) {
            assert!(
                pair[1] >= pair[0] - 1e-8 * pair[0].abs().max(1.),
                "bound decreased {:?}",
                pair
            );
        }
    }

    #[test]
    fn test_bound_monotone_on_overlapping_rules() {
        let data = piecewise(60, 0.05);
        let params = FitParams::default().em_tol(1e-12).max_em_iters(40);
        let fit = fit_mixture(&[cond(0., 1.3), cond(0.7, 2.)], &data, &params).unwrap();
        assert!(!fit.bound_trace.is_empty());
        for pair in fit.bound_trace.windows(2) {
            assert!(pair[1] >= pair[0], "bound decreased {:?}", pair);
        }
        // the returned bound is the one of the returned state
        assert_eq!(fit.bound, *fit.bound_trace.last().unwrap());
    }

    #[test]
    fn test_exact_partition_beats_single_rule() {
        let data = piecewise(60, 0.05);
        let params = FitParams::default();
        let split = fit_mixture(&[cond(0., 0.99), cond(1., 2.)], &data, &params).unwrap();
        let single = fit_mixture(&[cond(0., 2.)], &data, &params).unwrap();
        assert!(split.bound > single.bound);
        assert_eq!(split.n_degenerate, 0);
        assert!(split.warning.is_none());
    }

    #[test]
    fn test_responsibilities_on_overlap() {
        let data = piecewise(60, 0.05);
        let fit = fit_mixture(&[cond(0., 1.3), cond(0.7, 2.)], &data, &FitParams::default())
            .unwrap();
        let model = &fit.model;
        let m = matching_matrix(
            &model.rules().iter().map(|r| r.condition().clone()).collect::<Vec<_>>(),
            &data.x,
        );
        let models: Vec<_> = model.rules().iter().map(|r| r.model().clone()).collect();
        let r = model
            .mixing()
            .responsibilities(&m, &log_likelihoods(&models, &data));
        Zip::from(r.rows()).for_each(|row| assert_abs_diff_eq!(row.sum(), 1., epsilon = 1e-6));
        // left line points of the overlap, away from the lines crossing at 0.8
        let i = data.x.column(0).iter().position(|&v| v > 0.95).unwrap();
        assert!(r[[i, 0]] > 0.9);
    }

    #[test]
    fn test_degenerate_rules_are_discarded() {
        let data = piecewise(20, 0.05);
        // a rule matching a single point
        let fit = fit_mixture(&[cond(0., 2.), cond(0.5, 0.55)], &data, &FitParams::default())
            .unwrap();
        assert_eq!(fit.n_degenerate, 1);
        assert_eq!(fit.model.n_rules(), 1);
    }

    #[test]
    fn test_unmatched_training_point() {
        let data = piecewise(20, 0.05);
        let res = fit_mixture(&[cond(0., 1.5)], &data, &FitParams::default());
        assert!(matches!(res, Err(BerblError::UnmatchedInputError { .. })));
        let params = FitParams::default().default_rule(true);
        let fit = fit_mixture(&[cond(0., 1.5)], &data, &params).unwrap();
        assert_eq!(fit.model.n_rules(), 2);
        assert!(fit.model.predict_point(&array![10.]).is_ok());
    }

    #[test]
    fn test_predictions() {
        let data = piecewise(100, 0.05);
        let fit = fit_mixture(&[cond(0., 0.99), cond(1., 2.)], &data, &FitParams::default())
            .unwrap();
        let x = array![[0.5], [1.5]];
        let (means, vars) = fit.model.predict_valvar(&x).unwrap();
        assert_abs_diff_eq!(means, array![2., 0.5], epsilon = 5e-2);
        assert!(vars.iter().all(|&v| v > 0. && v < 0.1));

        assert!(matches!(
            fit.model.predict_point(&array![0.5, 0.5]),
            Err(BerblError::InvalidConfigError(_))
        ));
        assert!(matches!(
            fit.model.predict(&array![[0.5, 1.], [1.5, 1.]]),
            Err(BerblError::InvalidConfigError(_))
        ));

        let (rule_means, _) = fit.model.predict_rules(&x).unwrap();
        assert!(rule_means[[0, 1]].is_nan());
        assert_abs_diff_eq!(rule_means[[0, 0]], means[0], epsilon = 1e-12);

        let res = fit.model.predict(&array![[0.5], [2.5]]);
        assert!(matches!(
            res,
            Err(BerblError::UnmatchedInputError { index: 1 })
        ));
    }
}
