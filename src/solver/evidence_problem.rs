use crate::individual::{evaluate, Evaluation, Individual};
use crate::parameters::FitParams;
use crate::types::TrainingData;

use argmin::core::CostFunction;
use rayon::prelude::*;
use std::sync::Arc;

/// Fitness of a batch of individuals as an `argmin::CostFunction`.
///
/// Individuals are fitted in parallel, each fit owning its rules and models
/// while the training data is shared read-only.
#[derive(Clone)]
pub struct EvidenceProblem {
    data: Arc<TrainingData>,
    params: FitParams,
}

impl EvidenceProblem {
    /// Constructor given the training data and the fit settings
    pub fn new(data: Arc<TrainingData>, params: FitParams) -> Self {
        EvidenceProblem { data, params }
    }

    /// Training data
    pub fn data(&self) -> &TrainingData {
        &self.data
    }
}

impl CostFunction for EvidenceProblem {
    /// Individuals to evaluate
    type Param = Vec<Individual>;
    /// Their evaluations, in the same order
    type Output = Vec<Evaluation>;

    fn cost(
        &self,
        individuals: &Self::Param,
    ) -> std::result::Result<Self::Output, argmin::core::Error> {
        Ok(individuals
            .par_iter()
            .map(|individual| evaluate(individual, &self.data, &self.params))
            .collect())
    }
}
