use crate::solver::population_state::PopulationState;

use argmin::core::{observers::Observe, Error, State, KV};
use log::info;

/// Logs the statistics of each generation of the search
#[derive(Default)]
pub struct GenerationLogger;

impl Observe<PopulationState> for GenerationLogger {
    fn observe_init(
        &mut self,
        name: &str,
        state: &PopulationState,
        _kv: &KV,
    ) -> std::result::Result<(), Error> {
        info!(
            "{} search started, initial best fitness = {}",
            name,
            state.get_best_fitness()
        );
        Ok(())
    }

    fn observe_iter(
        &mut self,
        state: &PopulationState,
        _kv: &KV,
    ) -> std::result::Result<(), Error> {
        if let Some(stats) = state.get_history().last() {
            info!(
                "Generation {:>4}: best = {:.4} ({} rules), mean = {:.4}, {} fits, {} failed",
                stats.generation,
                stats.best_fitness,
                stats.best_n_rules,
                stats.mean_fitness,
                stats.n_evaluated,
                stats.n_failed
            );
        }
        Ok(())
    }

    fn observe_final(&mut self, state: &PopulationState) -> std::result::Result<(), Error> {
        info!(
            "Search ended after {} generations: best fitness = {}",
            state.get_iter(),
            state.get_best_fitness()
        );
        Ok(())
    }
}
