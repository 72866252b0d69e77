use crate::errors::{BerblError, Result};

use linfa::ParamGuard;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use web_time::Duration;

/// Hyperparameters of the local models priors: Gamma prior `Gam(a_alpha, b_alpha)`
/// over the weight prior precision and `Gam(a_tau, b_tau)` over the noise precision.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalPrior {
    /// Shape of the weight prior precision hyperprior
    pub a_alpha: f64,
    /// Rate of the weight prior precision hyperprior
    pub b_alpha: f64,
    /// Shape of the noise precision prior
    pub a_tau: f64,
    /// Rate of the noise precision prior
    pub b_tau: f64,
}

impl Default for LocalPrior {
    fn default() -> Self {
        LocalPrior {
            a_alpha: 1e-2,
            b_alpha: 1e-4,
            a_tau: 1e-2,
            b_tau: 1e-4,
        }
    }
}

/// Hyperparameters of the gating coefficients prior `Gam(a_beta, b_beta)`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MixingPrior {
    /// Shape of the gating prior precision hyperprior
    pub a_beta: f64,
    /// Rate of the gating prior precision hyperprior
    pub b_beta: f64,
}

impl Default for MixingPrior {
    fn default() -> Self {
        MixingPrior {
            a_beta: 1e-2,
            b_beta: 1e-4,
        }
    }
}

/// Settings of the variational fit of a set of rules
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitParams {
    pub(crate) local_prior: LocalPrior,
    pub(crate) mixing_prior: MixingPrior,
    pub(crate) em_tol: f64,
    pub(crate) max_em_iters: usize,
    pub(crate) local_tol: f64,
    pub(crate) max_local_iters: usize,
    pub(crate) default_rule: bool,
    pub(crate) degenerate_penalty: Option<f64>,
}

impl Default for FitParams {
    fn default() -> Self {
        FitParams {
            local_prior: LocalPrior::default(),
            mixing_prior: MixingPrior::default(),
            em_tol: 1e-4,
            max_em_iters: 40,
            local_tol: 1e-4,
            max_local_iters: 20,
            default_rule: false,
            degenerate_penalty: None,
        }
    }
}

impl FitParams {
    /// Set the local models prior
    pub fn local_prior(mut self, prior: LocalPrior) -> Self {
        self.local_prior = prior;
        self
    }

    /// Set the gating prior
    pub fn mixing_prior(mut self, prior: MixingPrior) -> Self {
        self.mixing_prior = prior;
        self
    }

    /// Set the variational bound gain under which the EM loop stops
    pub fn em_tol(mut self, tol: f64) -> Self {
        self.em_tol = tol;
        self
    }

    /// Set the maximum number of EM iterations
    pub fn max_em_iters(mut self, n: usize) -> Self {
        self.max_em_iters = n;
        self
    }

    /// Set the bound gain under which the independent local fit stops
    pub fn local_tol(mut self, tol: f64) -> Self {
        self.local_tol = tol;
        self
    }

    /// Set the maximum number of independent local fit iterations
    pub fn max_local_iters(mut self, n: usize) -> Self {
        self.max_local_iters = n;
        self
    }

    /// Whether a default rule matching every input is appended to each individual
    pub fn default_rule(mut self, default_rule: bool) -> Self {
        self.default_rule = default_rule;
        self
    }

    /// Set the fitness penalty applied per degenerate rule.
    /// When not set, `0.5 * (nx + 1) * ln(n)` is used.
    pub fn degenerate_penalty(mut self, penalty: f64) -> Self {
        self.degenerate_penalty = Some(penalty);
        self
    }

    /// Penalty per degenerate rule for `n` points of dimension `nx`
    pub(crate) fn penalty_for(&self, nx: usize, n: usize) -> f64 {
        self.degenerate_penalty
            .unwrap_or(0.5 * (nx + 1) as f64 * (n.max(1) as f64).ln())
    }

    fn check(&self) -> Result<()> {
        let LocalPrior {
            a_alpha,
            b_alpha,
            a_tau,
            b_tau,
        } = self.local_prior;
        let MixingPrior { a_beta, b_beta } = self.mixing_prior;
        if [a_alpha, b_alpha, a_tau, b_tau, a_beta, b_beta]
            .iter()
            .any(|v| !v.is_finite() || *v <= 0.)
        {
            return Err(BerblError::InvalidConfigError(
                "Prior hyperparameters should be positive".to_string(),
            ));
        }
        if !(self.em_tol > 0.) || !(self.local_tol > 0.) {
            return Err(BerblError::InvalidConfigError(
                "Convergence tolerances should be positive".to_string(),
            ));
        }
        if self.max_em_iters == 0 || self.max_local_iters == 0 {
            return Err(BerblError::InvalidConfigError(
                "Iteration caps should be at least 1".to_string(),
            ));
        }
        if let Some(penalty) = self.degenerate_penalty {
            if !(penalty >= 0.) {
                return Err(BerblError::InvalidConfigError(format!(
                    "Degenerate penalty should be non negative, got {penalty}"
                )));
            }
        }
        Ok(())
    }
}

/// Rule-based learner checked parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BerblValidParams {
    /// Input space bounds `(nx, 2)`
    pub(crate) xlimits: Array2<f64>,
    /// Number of individuals
    pub(crate) population_size: usize,
    /// Generation budget
    pub(crate) n_generations: u64,
    /// Number of generations without improvement triggering termination
    pub(crate) stagnation: Option<u64>,
    /// Wall-clock budget
    pub(crate) max_time: Option<Duration>,
    /// Min number of rules of an individual
    pub(crate) k_min: usize,
    /// Max number of rules of an individual
    pub(crate) k_max: usize,
    /// Range of the number of rules of initial individuals
    pub(crate) init_rules: (usize, usize),
    /// Range of the half-width of initial rules relative to input ranges
    pub(crate) init_spread: (f64, f64),
    /// Tournament size
    pub(crate) tournament_size: usize,
    /// Probability of crossover between two parents
    pub(crate) crossover_prob: f64,
    /// Probability of mutating each bound of a mutated rule
    pub(crate) mutation_rate: f64,
    /// Standard deviation of bound mutation relative to input ranges
    pub(crate) mutation_scale: f64,
    /// Max number of retries when a mutation yields an empty rule
    pub(crate) max_mutation_retries: usize,
    /// Probability of adding a rule to an offspring
    pub(crate) add_prob: f64,
    /// Probability of removing a rule from an offspring
    pub(crate) remove_prob: f64,
    /// Selection penalty weight for redundant coverage patterns
    pub(crate) niche_strength: f64,
    /// Settings of individual fits
    pub(crate) fit: FitParams,
    /// Random generator seed
    pub(crate) seed: Option<u64>,
}

impl Default for BerblValidParams {
    fn default() -> BerblValidParams {
        BerblValidParams {
            xlimits: Array2::zeros((0, 2)),
            population_size: 20,
            n_generations: 100,
            stagnation: None,
            max_time: None,
            k_min: 1,
            k_max: 10,
            init_rules: (1, 4),
            init_spread: (0.25, 0.75),
            tournament_size: 5,
            crossover_prob: 0.4,
            mutation_rate: 0.25,
            mutation_scale: 0.1,
            max_mutation_retries: 10,
            add_prob: 0.1,
            remove_prob: 0.1,
            niche_strength: 1.,
            fit: FitParams::default(),
            seed: None,
        }
    }
}

impl BerblValidParams {
    /// Input space bounds
    pub fn xlimits(&self) -> &Array2<f64> {
        &self.xlimits
    }

    /// Population size
    pub fn population_size(&self) -> usize {
        self.population_size
    }

    /// Generation budget
    pub fn n_generations(&self) -> u64 {
        self.n_generations
    }

    /// Stagnation window
    pub fn stagnation(&self) -> Option<u64> {
        self.stagnation
    }

    /// Wall-clock budget
    pub fn max_time(&self) -> Option<Duration> {
        self.max_time
    }

    /// Rule count bounds of an individual
    pub fn rules_bounds(&self) -> (usize, usize) {
        (self.k_min, self.k_max)
    }

    /// Tournament size
    pub fn tournament_size(&self) -> usize {
        self.tournament_size
    }

    /// Crossover probability
    pub fn crossover_prob(&self) -> f64 {
        self.crossover_prob
    }

    /// Settings of the individual fits
    pub fn fit_params(&self) -> &FitParams {
        &self.fit
    }

    /// Random generator seed
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

/// Rule-based learner parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BerblParams(BerblValidParams);

impl BerblParams {
    /// Constructor given the `(nx, 2)` input space bounds
    pub fn new(xlimits: Array2<f64>) -> BerblParams {
        Self(BerblValidParams {
            xlimits,
            ..Default::default()
        })
    }

    /// Set the number of individuals of the population
    pub fn population_size(mut self, n: usize) -> Self {
        self.0.population_size = n;
        self
    }

    /// Set the generation budget
    pub fn n_generations(mut self, n: u64) -> Self {
        self.0.n_generations = n;
        self
    }

    /// Stop when the best fitness has not improved for `n` generations
    pub fn stagnation(mut self, n: u64) -> Self {
        self.0.stagnation = Some(n);
        self
    }

    /// Set a wall-clock budget, the best individual found so far being returned
    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.0.max_time = Some(max_time);
        self
    }

    /// Set the min and max number of rules of an individual
    pub fn rules_bounds(mut self, k_min: usize, k_max: usize) -> Self {
        self.0.k_min = k_min;
        self.0.k_max = k_max;
        self
    }

    /// Set the range of the number of rules of initial individuals
    pub fn init_rules(mut self, min: usize, max: usize) -> Self {
        self.0.init_rules = (min, max);
        self
    }

    /// Set the range of initial rules half-width relative to the input ranges
    pub fn init_spread(mut self, min: f64, max: f64) -> Self {
        self.0.init_spread = (min, max);
        self
    }

    /// Set the tournament size
    pub fn tournament_size(mut self, size: usize) -> Self {
        self.0.tournament_size = size;
        self
    }

    /// Set the crossover probability
    pub fn crossover_prob(mut self, prob: f64) -> Self {
        self.0.crossover_prob = prob;
        self
    }

    /// Set the probability of mutating each bound of a mutated rule
    pub fn mutation_rate(mut self, rate: f64) -> Self {
        self.0.mutation_rate = rate;
        self
    }

    /// Set the bound mutation standard deviation relative to the input ranges
    pub fn mutation_scale(mut self, scale: f64) -> Self {
        self.0.mutation_scale = scale;
        self
    }

    /// Set the max number of retries of a mutation giving an empty rule
    pub fn max_mutation_retries(mut self, n: usize) -> Self {
        self.0.max_mutation_retries = n;
        self
    }

    /// Set the probabilities to add or remove a rule to an offspring
    pub fn add_remove_probs(mut self, add: f64, remove: f64) -> Self {
        self.0.add_prob = add;
        self.0.remove_prob = remove;
        self
    }

    /// Set the niching strength (0. disables niching)
    pub fn niche_strength(mut self, strength: f64) -> Self {
        self.0.niche_strength = strength;
        self
    }

    /// Configure the fit of individuals
    ///
    /// ```
    /// # use berbl::Berbl;
    /// # use ndarray::array;
    /// let params = Berbl::params(array![[0., 1.]])
    ///     .configure_fit(|fit| fit.max_em_iters(100).default_rule(true));
    /// ```
    pub fn configure_fit<F: FnOnce(FitParams) -> FitParams>(mut self, init: F) -> Self {
        self.0.fit = init(self.0.fit);
        self
    }

    /// Set the random generator seed for reproducibility
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = Some(seed);
        self
    }
}

fn check_prob(name: &str, p: f64) -> Result<()> {
    if (0. ..=1.).contains(&p) {
        Ok(())
    } else {
        Err(BerblError::InvalidConfigError(format!(
            "{name} should be a probability, got {p}"
        )))
    }
}

impl ParamGuard for BerblParams {
    type Checked = BerblValidParams;
    type Error = BerblError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let p = &self.0;
        if p.xlimits.ncols() != 2 || p.xlimits.nrows() == 0 {
            return Err(BerblError::InvalidConfigError(format!(
                "xlimits should be a (nx, 2) matrix, got {:?}",
                p.xlimits.shape()
            )));
        }
        for row in p.xlimits.rows() {
            if !row[0].is_finite() || !row[1].is_finite() || row[0] >= row[1] {
                return Err(BerblError::InvalidConfigError(format!(
                    "Invalid bounds [{}, {}] in xlimits",
                    row[0], row[1]
                )));
            }
        }
        if p.population_size < 2 {
            return Err(BerblError::InvalidConfigError(format!(
                "Population size should be at least 2, got {}",
                p.population_size
            )));
        }
        if p.k_min == 0 || p.k_min > p.k_max {
            return Err(BerblError::InvalidConfigError(format!(
                "Invalid rule count bounds [{}, {}]",
                p.k_min, p.k_max
            )));
        }
        let (imin, imax) = p.init_rules;
        if imin > imax || imin < p.k_min || imax > p.k_max {
            return Err(BerblError::InvalidConfigError(format!(
                "Initial rule count range [{imin}, {imax}] should lie within [{}, {}]",
                p.k_min, p.k_max
            )));
        }
        let (smin, smax) = p.init_spread;
        if !(smin > 0.) || smin > smax {
            return Err(BerblError::InvalidConfigError(format!(
                "Invalid initial spread range [{smin}, {smax}]"
            )));
        }
        if p.tournament_size == 0 {
            return Err(BerblError::InvalidConfigError(
                "Tournament size should be at least 1".to_string(),
            ));
        }
        check_prob("Crossover probability", p.crossover_prob)?;
        check_prob("Mutation rate", p.mutation_rate)?;
        check_prob("Rule addition probability", p.add_prob)?;
        check_prob("Rule removal probability", p.remove_prob)?;
        if !(p.mutation_scale > 0.) || !p.mutation_scale.is_finite() {
            return Err(BerblError::InvalidConfigError(format!(
                "Mutation scale should be positive, got {}",
                p.mutation_scale
            )));
        }
        if p.max_mutation_retries == 0 {
            return Err(BerblError::InvalidConfigError(
                "Mutation retries should be at least 1".to_string(),
            ));
        }
        if !(p.niche_strength >= 0.) {
            return Err(BerblError::InvalidConfigError(format!(
                "Niche strength should be non negative, got {}",
                p.niche_strength
            )));
        }
        p.fit.check()?;
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
