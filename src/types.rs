use crate::utils::add_bias;

use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Training data shared read-only by all the fits of a run
#[derive(Clone, Debug)]
pub struct TrainingData {
    /// Inputs `(n, nx)`
    pub(crate) x: Array2<f64>,
    /// Inputs prepended with a column of ones `(n, nx + 1)`
    pub(crate) x_bias: Array2<f64>,
    /// Targets `(n,)`
    pub(crate) y: Array1<f64>,
}

impl TrainingData {
    /// Constructor from inputs `(n, nx)` and targets `(n,)`
    pub fn new<D1: Data<Elem = f64>, D2: Data<Elem = f64>>(
        x: &ArrayBase<D1, Ix2>,
        y: &ArrayBase<D2, Ix1>,
    ) -> Self {
        TrainingData {
            x: x.to_owned(),
            x_bias: add_bias(x),
            y: y.to_owned(),
        }
    }

    /// Number of training points
    pub fn nsamples(&self) -> usize {
        self.x.nrows()
    }

    /// Input dimension
    pub fn nx(&self) -> usize {
        self.x.ncols()
    }

    /// Training inputs
    pub fn inputs(&self) -> &Array2<f64> {
        &self.x
    }

    /// Training targets
    pub fn targets(&self) -> &Array1<f64> {
        &self.y
    }
}

/// Warning attached to a fit which nonetheless produced a usable model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FitWarning {
    /// The EM loop hit its iteration cap before the bound gain fell under tolerance
    NonConvergence {
        /// Number of EM iterations run
        iterations: usize,
        /// Last bound gain
        delta: f64,
    },
}

impl fmt::Display for FitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitWarning::NonConvergence { iterations, delta } => write!(
                f,
                "EM not converged after {iterations} iterations (last bound gain {delta:e})"
            ),
        }
    }
}

/// Statistics of one generation of the evolutionary search
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    /// Generation number, 0 being the initial population
    pub generation: u64,
    /// Best fitness of the population
    pub best_fitness: f64,
    /// Mean of the finite fitnesses of the population
    pub mean_fitness: f64,
    /// Number of fitted rules of the best individual, degenerate rules excluded
    pub best_n_rules: usize,
    /// Number of fits run during the generation
    pub n_evaluated: usize,
    /// Number of individuals whose fit failed
    pub n_failed: usize,
}
