use crate::condition::RuleCondition;
use crate::evidence::Evidence;
use crate::mixture::{fit_mixture, MixtureModel};
use crate::parameters::FitParams;
use crate::types::{FitWarning, TrainingData};

use log::debug;
use ndarray::Array2;
use ndarray_rand::rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Candidate set of rules, represented by their conditions.
/// Local models are always refitted from the conditions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    conditions: Vec<RuleCondition>,
}

impl Individual {
    /// Constructor from rule conditions
    pub fn new(conditions: Vec<RuleCondition>) -> Self {
        Individual { conditions }
    }

    /// Draws `n_rules` broad random conditions whose half-width relative to
    /// the input ranges is uniform in `spread`
    pub fn random<R: Rng>(
        n_rules: usize,
        xlimits: &Array2<f64>,
        spread: (f64, f64),
        rng: &mut R,
    ) -> Self {
        let conditions = (0..n_rules)
            .map(|_| {
                let s = spread.0 + rng.gen::<f64>() * (spread.1 - spread.0);
                RuleCondition::random(xlimits, s, rng)
            })
            .collect();
        Individual { conditions }
    }

    /// Rule conditions
    pub fn conditions(&self) -> &[RuleCondition] {
        &self.conditions
    }

    /// Number of rules
    pub fn n_rules(&self) -> usize {
        self.conditions.len()
    }

    /// Covering: widens the nearest rule to every point of `x` matched by no rule
    pub fn cover(&mut self, x: &Array2<f64>) {
        for row in x.rows() {
            if self.conditions.iter().any(|c| c.matches(&row)) {
                continue;
            }
            let nearest = self
                .conditions
                .iter()
                .enumerate()
                .map(|(k, c)| (k, c.distance(&row)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(k, _)| k);
            if let Some(k) = nearest {
                self.conditions[k].extend_to(&row);
            }
        }
    }

    pub(crate) fn into_conditions(self) -> Vec<RuleCondition> {
        self.conditions
    }
}

/// Fitness evaluation of an individual
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Evaluation {
    /// Fitness, `-inf` when the fit failed
    pub fitness: f64,
    /// Evidence details of a successful fit
    pub evidence: Option<Evidence>,
    /// Number of rules matching too few points to be fitted
    pub n_degenerate: usize,
    /// Warning raised by a successful fit
    pub warning: Option<FitWarning>,
    /// Reason of a failed fit
    pub failure: Option<String>,
    /// Hash of the coverage pattern of the individual rules over the training points
    pub signature: u64,
    /// Fitted mixture of a successful fit
    pub model: Option<MixtureModel>,
}

impl Evaluation {
    /// Whether the fit succeeded
    pub fn is_valid(&self) -> bool {
        self.model.is_some()
    }
}

/// Order-independent hash of the training points matched by each rule
fn coverage_signature(conditions: &[RuleCondition], data: &TrainingData) -> u64 {
    let mut patterns: Vec<u64> = conditions
        .iter()
        .map(|c| {
            let mut hasher = DefaultHasher::new();
            for row in data.x.rows() {
                c.matches(&row).hash(&mut hasher);
            }
            hasher.finish()
        })
        .collect();
    patterns.sort_unstable();
    let mut hasher = DefaultHasher::new();
    patterns.hash(&mut hasher);
    hasher.finish()
}

/// Fits the rules of an individual and scores them by their evidence.
/// A failed fit gives a `-inf` fitness with the failure reason recorded.
pub fn evaluate(individual: &Individual, data: &TrainingData, params: &FitParams) -> Evaluation {
    let signature = coverage_signature(individual.conditions(), data);
    match fit_mixture(individual.conditions(), data, params) {
        Ok(fit) => {
            let evidence = Evidence::new(
                fit.bound,
                fit.model.n_rules(),
                fit.n_degenerate,
                params.penalty_for(data.nx(), data.nsamples()),
            );
            if let Some(warning) = fit.warning.as_ref() {
                debug!("Individual with {} rules: {}", individual.n_rules(), warning);
            }
            Evaluation {
                fitness: evidence.fitness,
                evidence: Some(evidence),
                n_degenerate: fit.n_degenerate,
                warning: fit.warning,
                failure: None,
                signature,
                model: Some(fit.model),
            }
        }
        Err(err) => {
            debug!("Individual with {} rules: fit failed: {}", individual.n_rules(), err);
            Evaluation {
                fitness: f64::NEG_INFINITY,
                evidence: None,
                n_degenerate: 0,
                warning: None,
                failure: Some(err.to_string()),
                signature,
                model: None,
            }
        }
    }
}
