mod evidence_problem;
mod evolution_solver;
mod observers;
mod operators;
mod population_state;

pub use evidence_problem::*;
pub use evolution_solver::*;
pub use observers::*;
pub use population_state::*;
