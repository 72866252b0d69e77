/// Implementation of `argmin::State` for the evolutionary search
use crate::individual::{Evaluation, Individual};
use crate::types::GenerationStats;

use argmin::core::{Problem, State, TerminationReason, TerminationStatus};
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maintains the population from generation to generation of the
/// [crate::EvolutionarySolver].
///
/// Costs are negated fitnesses as argmin minimizes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PopulationState {
    /// Best individual of the current population
    pub param: Option<Individual>,
    /// Best individual found so far
    pub best_param: Option<Individual>,
    /// Evaluation of the best individual found so far
    pub best_evaluation: Option<Evaluation>,

    /// Current cost (negated best fitness of the population)
    pub cost: f64,
    /// Previous cost
    pub prev_cost: f64,
    /// Best cost so far
    pub best_cost: f64,
    /// Target cost
    pub target_cost: f64,

    /// Current iteration
    pub iter: u64,
    /// Iteration number of last best cost
    pub last_best_iter: u64,
    /// Maximum number of iterations
    pub max_iters: u64,
    /// Evaluation counts
    pub counts: HashMap<String, u64>,
    /// Time required so far
    pub time: Option<web_time::Duration>,
    /// Optimization status
    pub termination_status: TerminationStatus,

    /// Per-generation statistics
    pub history: Vec<GenerationStats>,
    /// Number of consecutive generations without best fitness improvement
    pub(crate) stagnant: u64,

    /// Current individuals
    pub(crate) population: Option<Vec<Individual>>,
    /// Evaluations of the current individuals
    pub(crate) evaluations: Option<Vec<Evaluation>>,
    /// Random generator driving selection and variation
    pub(crate) rng: Option<Xoshiro256Plus>,
}

impl PopulationState {
    /// Set maximum number of iterations (i.e. generations)
    #[must_use]
    pub fn max_iters(mut self, iters: u64) -> Self {
        self.max_iters = iters;
        self
    }

    /// Set target cost, the search stops when the best fitness reaches `-target_cost`
    #[must_use]
    pub fn target_cost(mut self, target_cost: f64) -> Self {
        self.target_cost = target_cost;
        self
    }

    /// Set the current population with its evaluations and records the
    /// population best as current parameter
    #[must_use]
    pub fn population(mut self, population: Vec<Individual>, evaluations: Vec<Evaluation>) -> Self {
        let best = super::operators::elite(
            &evaluations.iter().map(|e| e.fitness).collect::<Vec<_>>(),
        );
        self.param = population.get(best).cloned();
        self.prev_cost = self.cost;
        self.cost = evaluations
            .get(best)
            .map(|e| -e.fitness)
            .unwrap_or(f64::INFINITY);
        self.population = Some(population);
        self.evaluations = Some(evaluations);
        self
    }

    /// Moves the current population and evaluations out and replaces them internally with `None`.
    pub fn take_population(&mut self) -> Option<(Vec<Individual>, Vec<Evaluation>)> {
        match (self.population.take(), self.evaluations.take()) {
            (Some(p), Some(e)) => Some((p, e)),
            _ => None,
        }
    }

    /// Set the random generator
    #[must_use]
    pub fn rng(mut self, rng: Xoshiro256Plus) -> Self {
        self.rng = Some(rng);
        self
    }

    /// Moves the random generator out and replaces it internally with `None`.
    pub fn take_rng(&mut self) -> Option<Xoshiro256Plus> {
        self.rng.take()
    }

    /// Evaluations of the current population
    pub fn get_evaluations(&self) -> Option<&Vec<Evaluation>> {
        self.evaluations.as_ref()
    }

    /// Evaluation of the best individual found so far
    pub fn get_best_evaluation(&self) -> Option<&Evaluation> {
        self.best_evaluation.as_ref()
    }

    /// Best fitness found so far
    pub fn get_best_fitness(&self) -> f64 {
        -self.best_cost
    }

    /// Per-generation statistics
    pub fn get_history(&self) -> &[GenerationStats] {
        &self.history
    }
}

impl State for PopulationState {
    /// Type of parameter
    type Param = Individual;
    /// Floating point precision
    type Float = f64;

    /// Create new `PopulationState` instance
    fn new() -> Self {
        PopulationState {
            param: None,
            best_param: None,
            best_evaluation: None,

            cost: f64::INFINITY,
            prev_cost: f64::INFINITY,
            best_cost: f64::INFINITY,
            target_cost: f64::NEG_INFINITY,

            iter: 0,
            last_best_iter: 0,
            max_iters: u64::MAX,
            counts: HashMap::new(),
            time: Some(web_time::Duration::new(0, 0)),
            termination_status: TerminationStatus::NotTerminated,

            history: vec![],
            stagnant: 0,

            population: None,
            evaluations: None,
            rng: None,
        }
    }

    /// Records the best individual of the current population as best so far
    /// when it improves the best fitness.
    fn update(&mut self) {
        if self.cost < self.best_cost || self.best_param.is_none() {
            let best = self.evaluations.as_ref().and_then(|evals| {
                let fitness: Vec<f64> = evals.iter().map(|e| e.fitness).collect();
                evals.get(super::operators::elite(&fitness)).cloned()
            });
            if let Some(best) = best {
                if self.cost < self.best_cost {
                    self.last_best_iter = self.iter + 1;
                }
                self.best_param = self.param.clone();
                self.best_evaluation = Some(best);
                self.best_cost = self.cost;
            }
        }
    }

    fn get_param(&self) -> Option<&Individual> {
        self.param.as_ref()
    }

    fn get_best_param(&self) -> Option<&Individual> {
        self.best_param.as_ref()
    }

    fn terminate_with(mut self, reason: TerminationReason) -> Self {
        self.termination_status = TerminationStatus::Terminated(reason);
        self
    }

    fn time(&mut self, time: Option<web_time::Duration>) -> &mut Self {
        self.time = time;
        self
    }

    fn get_cost(&self) -> f64 {
        self.cost
    }

    fn get_best_cost(&self) -> f64 {
        self.best_cost
    }

    fn get_target_cost(&self) -> f64 {
        self.target_cost
    }

    fn get_iter(&self) -> u64 {
        self.iter
    }

    fn get_last_best_iter(&self) -> u64 {
        self.last_best_iter
    }

    fn get_max_iters(&self) -> u64 {
        self.max_iters
    }

    fn get_termination_status(&self) -> &TerminationStatus {
        &self.termination_status
    }

    fn get_termination_reason(&self) -> Option<&TerminationReason> {
        match &self.termination_status {
            TerminationStatus::Terminated(reason) => Some(reason),
            TerminationStatus::NotTerminated => None,
        }
    }

    fn get_time(&self) -> Option<web_time::Duration> {
        self.time
    }

    fn increment_iter(&mut self) {
        self.iter += 1;
    }

    fn func_counts<O>(&mut self, problem: &Problem<O>) {
        for (k, &v) in problem.counts.iter() {
            let count = self.counts.entry(k.to_string()).or_insert(0);
            *count = v
        }
    }

    fn get_func_counts(&self) -> &HashMap<String, u64> {
        &self.counts
    }

    fn is_best(&self) -> bool {
        self.last_best_iter == self.iter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::RuleCondition;
    use ndarray::array;

    fn evaluation(fitness: f64) -> Evaluation {
        Evaluation {
            fitness,
            evidence: None,
            n_degenerate: 0,
            warning: None,
            failure: None,
            signature: 0,
            model: None,
        }
    }

    fn individual(high: f64) -> Individual {
        Individual::new(vec![RuleCondition::new(array![[0., high]]).unwrap()])
    }

    #[test]
    fn test_update_keeps_best_so_far() {
        let mut state = PopulationState::new().population(
            vec![individual(0.5), individual(1.)],
            vec![evaluation(-3.), evaluation(-1.)],
        );
        state.update();
        assert_eq!(state.get_best_param(), Some(&individual(1.)));
        assert_eq!(state.get_best_fitness(), -1.);

        state.increment_iter();
        let mut state = state.population(vec![individual(0.2)], vec![evaluation(-5.)]);
        state.update();
        assert_eq!(state.get_param(), Some(&individual(0.2)));
        assert_eq!(state.get_best_param(), Some(&individual(1.)));
        assert_eq!(state.get_best_cost(), 1.);
        assert_eq!(state.get_last_best_iter(), 1);
    }

    #[test]
    fn test_take_population() {
        let mut state = PopulationState::new()
            .population(vec![individual(1.)], vec![evaluation(0.)])
            .max_iters(3);
        assert_eq!(state.get_max_iters(), 3);
        let (pop, evals) = state.take_population().unwrap();
        assert_eq!(pop.len(), 1);
        assert_eq!(evals.len(), 1);
        assert!(state.take_population().is_none());
    }
}
