//! Evolutionary search of sets of rules implemented as an `argmin::Solver`.
//!
//! Each iteration of the solver is a generation: parents are selected by
//! tournaments on a niched fitness, offspring are produced by crossover and
//! mutation, new or changed offspring are fitted in parallel and the best
//! individual of the previous population is kept (elitism).
//!
//! ```no_run
//! use argmin::core::Executor;
//! use berbl::{BerblParams, EvidenceProblem, EvolutionarySolver, TrainingData};
//! use linfa::ParamGuard;
//! use ndarray::{array, Array1, Axis};
//! use std::sync::Arc;
//!
//! let x = Array1::<f64>::linspace(0., 1., 50).insert_axis(Axis(1));
//! let y = x.column(0).mapv(|v| (6. * v).sin());
//! let data = Arc::new(TrainingData::new(&x, &y));
//! let params = BerblParams::new(array![[0., 1.]]).seed(42).check().unwrap();
//!
//! let problem = EvidenceProblem::new(data.clone(), params.fit_params().clone());
//! let solver = EvolutionarySolver::new(params, data.inputs().clone());
//! let res = Executor::new(problem, solver)
//!     .configure(|state| state.max_iters(20))
//!     .run()
//!     .unwrap();
//! println!("Best fitness = {}", res.state.get_best_fitness());
//! ```
use crate::individual::{Evaluation, Individual};
use crate::parameters::BerblValidParams;
use crate::solver::operators::{crossover, elite, mutate, niched_fitness, tournament};
use crate::solver::population_state::PopulationState;
use crate::types::GenerationStats;

use argmin::argmin_error_closure;
use argmin::core::{
    CostFunction, Problem, Solver, State, TerminationReason, TerminationStatus, KV,
};
use log::{debug, info};
use ndarray::Array2;
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};

/// Evolutionary search over sets of rules
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvolutionarySolver {
    params: BerblValidParams,
    /// Training inputs used to cover the initial population
    xt: Array2<f64>,
}

impl EvolutionarySolver {
    /// Constructor given checked parameters and the training inputs
    pub fn new(params: BerblValidParams, xt: Array2<f64>) -> Self {
        EvolutionarySolver { params, xt }
    }

    /// Random initial population: broad random rules, the nearest rule being
    /// widened to any training point left unmatched.
    fn seed_population(&self, rng: &mut Xoshiro256Plus) -> Vec<Individual> {
        let (imin, imax) = self.params.init_rules;
        (0..self.params.population_size)
            .map(|_| {
                let k = rng.gen_range(imin..=imax);
                let mut individual =
                    Individual::random(k, &self.params.xlimits, self.params.init_spread, rng);
                individual.cover(&self.xt);
                individual
            })
            .collect()
    }

    /// Selection and variation: returns `population_size - 1` offspring with
    /// the evaluation of their parent when left unchanged
    fn breed(
        &self,
        population: &[Individual],
        evaluations: &[Evaluation],
        rng: &mut Xoshiro256Plus,
    ) -> Vec<(Individual, Option<Evaluation>)> {
        let params = &self.params;
        let n_offspring = params.population_size - 1;
        let selection = niched_fitness(evaluations, params.niche_strength);

        let mut offspring = Vec::with_capacity(n_offspring);
        while offspring.len() < n_offspring {
            let i1 = tournament(&selection, params.tournament_size, rng);
            let i2 = tournament(&selection, params.tournament_size, rng);
            let crossed = rng.gen::<f64>() < params.crossover_prob;
            let (c1, c2) = if crossed {
                crossover(
                    &population[i1],
                    &population[i2],
                    params.k_min,
                    params.k_max,
                    rng,
                )
            } else {
                (population[i1].clone(), population[i2].clone())
            };
            for (child, parent) in [(c1, i1), (c2, i2)] {
                if offspring.len() == n_offspring {
                    break;
                }
                let (child, mutated) = mutate(&child, params, rng);
                let inherited = if crossed || mutated {
                    None
                } else {
                    Some(evaluations[parent].clone())
                };
                offspring.push((child, inherited));
            }
        }
        offspring
    }
}

fn generation_stats(
    generation: u64,
    population: &[Individual],
    evaluations: &[Evaluation],
    n_evaluated: usize,
) -> GenerationStats {
    let fitness: Vec<f64> = evaluations.iter().map(|e| e.fitness).collect();
    let best = elite(&fitness);
    let finite: Vec<f64> = fitness.iter().cloned().filter(|f| f.is_finite()).collect();
    let mean_fitness = if finite.is_empty() {
        f64::NEG_INFINITY
    } else {
        finite.iter().sum::<f64>() / finite.len() as f64
    };
    GenerationStats {
        generation,
        best_fitness: fitness[best],
        mean_fitness,
        best_n_rules: evaluations[best]
            .model
            .as_ref()
            .map(|model| model.n_rules())
            .unwrap_or_else(|| population[best].n_rules()),
        n_evaluated,
        n_failed: evaluations.iter().filter(|e| !e.is_valid()).count(),
    }
}

impl<O> Solver<O, PopulationState> for EvolutionarySolver
where
    O: CostFunction<Param = Vec<Individual>, Output = Vec<Evaluation>>,
{
    const NAME: &'static str = "Berbl";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: PopulationState,
    ) -> std::result::Result<(PopulationState, Option<KV>), argmin::core::Error> {
        let mut rng = match self.params.seed {
            Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
            None => Xoshiro256Plus::from_entropy(),
        };
        let population = self.seed_population(&mut rng);
        let evaluations = problem.problem("fit_count", |p| p.cost(&population))?;

        let stats = generation_stats(0, &population, &evaluations, population.len());
        info!(
            "Initial population: best fitness = {} ({} rules), {} failed fits",
            stats.best_fitness, stats.best_n_rules, stats.n_failed
        );
        let mut initial_state = state.population(population, evaluations).rng(rng);
        initial_state.history.push(stats);
        initial_state.stagnant = 0;
        Ok((initial_state, None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        mut state: PopulationState,
    ) -> std::result::Result<(PopulationState, Option<KV>), argmin::core::Error> {
        debug!(
            "********* Start generation {}/{}",
            state.get_iter() + 1,
            state.get_max_iters()
        );
        let (population, evaluations) = state.take_population().ok_or_else(
            argmin_error_closure!(PotentialBug, "EvolutionarySolver: No population!"),
        )?;
        let mut rng = state.take_rng().ok_or_else(argmin_error_closure!(
            PotentialBug,
            "EvolutionarySolver: No random generator!"
        ))?;

        let offspring = self.breed(&population, &evaluations, &mut rng);
        let to_fit: Vec<Individual> = offspring
            .iter()
            .filter(|(_, inherited)| inherited.is_none())
            .map(|(child, _)| child.clone())
            .collect();
        let n_evaluated = to_fit.len();
        let mut fitted = problem
            .problem("fit_count", |p| p.cost(&to_fit))?
            .into_iter();

        // elitism
        let fitness: Vec<f64> = evaluations.iter().map(|e| e.fitness).collect();
        let best = elite(&fitness);
        let mut new_population = vec![population[best].clone()];
        let mut new_evaluations = vec![evaluations[best].clone()];
        for (child, inherited) in offspring {
            let evaluation = match inherited {
                Some(evaluation) => evaluation,
                None => fitted.next().ok_or_else(argmin_error_closure!(
                    PotentialBug,
                    "EvolutionarySolver: Missing offspring evaluation!"
                ))?,
            };
            new_population.push(child);
            new_evaluations.push(evaluation);
        }

        let stats = generation_stats(
            state.get_iter() + 1,
            &new_population,
            &new_evaluations,
            n_evaluated,
        );
        if stats.best_fitness > state.get_best_fitness() {
            state.stagnant = 0;
        } else {
            state.stagnant += 1;
        }
        debug!(
            "Generation {}: best fitness = {} ({} rules), mean = {}, {} fits, {} failed",
            stats.generation,
            stats.best_fitness,
            stats.best_n_rules,
            stats.mean_fitness,
            stats.n_evaluated,
            stats.n_failed
        );

        let mut new_state = state.population(new_population, new_evaluations).rng(rng);
        new_state.history.push(stats);
        Ok((new_state, None))
    }

    fn terminate(&mut self, state: &PopulationState) -> TerminationStatus {
        match self.params.stagnation {
            Some(window) if state.stagnant >= window => {
                info!("No improvement for {} generations", state.stagnant);
                TerminationStatus::Terminated(TerminationReason::SolverConverged)
            }
            _ => TerminationStatus::NotTerminated,
        }
    }
}
