use crate::errors::{BerblError, Result};
use crate::individual::{Evaluation, Individual};
use crate::mixture::MixtureModel;
use crate::parameters::{BerblParams, BerblValidParams};
use crate::solver::{EvidenceProblem, EvolutionarySolver, GenerationLogger, PopulationState};
use crate::types::{GenerationStats, TrainingData};

use argmin::core::observers::ObserverMode;
use argmin::core::{Executor, State};
use linfa::{traits::Fit, DatasetBase};
use log::{info, trace};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2, Zip};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[cfg(feature = "persistent")]
use std::fs;
#[cfg(feature = "persistent")]
use std::io::Write;

impl<D: Data<Elem = f64>> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, BerblError>
    for BerblValidParams
{
    type Object = Berbl;

    /// Learn a set of rules from the dataset by evolutionary search
    ///
    /// # Errors
    ///
    /// * [BerblError::DataInsufficientError]: if there are fewer points than `nx + 1`,
    /// * [BerblError::InvalidConfigError]: if `xlimits` does not fit the inputs,
    /// * [BerblError::FitError]: if no individual could be fitted at all.
    ///
    fn fit(&self, dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>) -> Result<Berbl> {
        let x = dataset.records();
        let y = dataset.targets();
        self.train(x, y)
    }
}

impl BerblValidParams {
    /// Learn a set of rules from the training data (xt, yt)
    pub fn train(
        &self,
        xt: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        yt: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Result<Berbl> {
        trace!("Berbl training...");
        let (n, nx) = xt.dim();
        if n == 0 || n < nx + 1 {
            return Err(BerblError::DataInsufficientError {
                needed: nx + 1,
                got: n,
            });
        }
        if yt.len() != n {
            return Err(BerblError::InvalidConfigError(format!(
                "{} targets given for {} inputs",
                yt.len(),
                n
            )));
        }
        if self.xlimits.nrows() != nx {
            return Err(BerblError::InvalidConfigError(format!(
                "xlimits has {} rows, inputs have {} features",
                self.xlimits.nrows(),
                nx
            )));
        }
        for (i, row) in xt.rows().into_iter().enumerate() {
            let mut inside = true;
            Zip::from(&row)
                .and(self.xlimits.rows())
                .for_each(|&v, lim| inside &= lim[0] <= v && v <= lim[1]);
            if !inside {
                return Err(BerblError::InvalidConfigError(format!(
                    "Input #{i} lies outside xlimits"
                )));
            }
        }

        let data = Arc::new(TrainingData::new(xt, yt));
        let problem = EvidenceProblem::new(data.clone(), self.fit.clone());
        let solver = EvolutionarySolver::new(self.clone(), data.inputs().clone());
        let n_generations = self.n_generations;
        let exec = Executor::new(problem, solver)
            .configure(|state: PopulationState| state.max_iters(n_generations))
            .add_observer(GenerationLogger, ObserverMode::Always);
        let exec = match self.max_time {
            Some(max_time) => exec.timeout(max_time),
            None => exec,
        };
        let result = exec.run()?;

        let termination = result
            .state
            .get_termination_reason()
            .map(|reason| reason.text().to_string())
            .unwrap_or_else(|| "Not terminated".to_string());
        let state = result.state;
        let history = state.history.clone();
        let (individual, evaluation) = match (state.best_param, state.best_evaluation) {
            (Some(individual), Some(evaluation)) => (individual, evaluation),
            _ => return Err(BerblError::FitError("No individual evaluated".to_string())),
        };
        let model = evaluation.model.clone().ok_or_else(|| {
            BerblError::FitError(format!(
                "No valid individual found: {}",
                evaluation.failure.as_deref().unwrap_or("unknown failure")
            ))
        })?;
        info!(
            "Berbl trained: fitness = {}, {} rules ({})",
            evaluation.fitness,
            model.n_rules(),
            termination
        );

        Ok(Berbl {
            individual,
            model,
            evaluation,
            history,
            termination,
        })
    }
}

/// Set of rules learnt by the Bayesian evolutionary rule-based learner.
///
/// Each rule restricts a Bayesian linear model to the hyper-rectangle of
/// its condition, predictions of the matching rules being mixed by a
/// softmax gating.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Berbl {
    /// Best individual found by the search
    individual: Individual,
    /// Fitted mixture of the best individual
    model: MixtureModel,
    /// Evaluation of the best individual
    evaluation: Evaluation,
    /// Per-generation statistics
    history: Vec<GenerationStats>,
    /// Why the search stopped
    termination: String,
}

impl Berbl {
    /// Constructor of rule-based learner parameters given the input bounds `(nx, 2)`
    pub fn params(xlimits: Array2<f64>) -> BerblParams {
        BerblParams::new(xlimits)
    }

    /// Fitted mixture of rules
    pub fn model(&self) -> &MixtureModel {
        &self.model
    }

    /// Rule conditions of the best individual
    pub fn individual(&self) -> &Individual {
        &self.individual
    }

    /// Evaluation of the best individual
    pub fn evaluation(&self) -> &Evaluation {
        &self.evaluation
    }

    /// Fitness of the best individual
    pub fn fitness(&self) -> f64 {
        self.evaluation.fitness
    }

    /// Number of fitted rules
    pub fn n_rules(&self) -> usize {
        self.model.n_rules()
    }

    /// Per-generation statistics of the search
    pub fn history(&self) -> &[GenerationStats] {
        &self.history
    }

    /// Termination reason of the search
    pub fn termination(&self) -> &str {
        &self.termination
    }

    /// Predictive mean and variance at a single input `(nx,)`
    pub fn predict_point<D: Data<Elem = f64>>(&self, x: &ArrayBase<D, Ix1>) -> Result<(f64, f64)> {
        self.model.predict_point(x)
    }

    /// Predictive means at inputs `(n, nx)`
    ///
    /// Returns [BerblError::UnmatchedInputError] if an input is matched by no rule.
    pub fn predict<D: Data<Elem = f64>>(&self, x: &ArrayBase<D, Ix2>) -> Result<Array1<f64>> {
        self.model.predict(x)
    }

    /// Predictive means and variances at inputs `(n, nx)`
    pub fn predict_valvar<D: Data<Elem = f64>>(
        &self,
        x: &ArrayBase<D, Ix2>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        self.model.predict_valvar(x)
    }

    /// Predictive means and variances `(n, K)` of each rule, NaN where a rule does not match
    pub fn predict_rules<D: Data<Elem = f64>>(
        &self,
        x: &ArrayBase<D, Ix2>,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        self.model.predict_rules(x)
    }

    /// Save the learnt rules in the given file as JSON
    #[cfg(feature = "persistent")]
    pub fn save(&self, path: &str) -> Result<()> {
        let mut file = fs::File::create(path)?;
        let bytes = serde_json::to_vec(self)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Load learnt rules from the given JSON file
    #[cfg(feature = "persistent")]
    pub fn load(path: &str) -> Result<Berbl> {
        let data = fs::read(path)?;
        serde_json::from_slice(&data).map_err(|err| BerblError::LoadError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use linfa::{Dataset, ParamGuard};
    use ndarray::{array, Axis};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::{Normal, Uniform};
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;

    /// `n` points uniformly drawn in [0, 2) on two lines joined at x = 1
    fn piecewise(n: usize) -> (Array2<f64>, Array1<f64>) {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let x = Array1::random_using(n, Uniform::new(0., 2.), &mut rng);
        let e = Array1::random_using(n, Normal::new(0., 0.05).unwrap(), &mut rng);
        let y = x.mapv(|v| if v < 1. { 2. * v + 1. } else { -3. * v + 5. }) + e;
        (x.insert_axis(Axis(1)), y)
    }

    #[test]
    fn test_berbl_piecewise_linear() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (xt, yt) = piecewise(100);
        let berbl = Berbl::params(array![[0., 2.]])
            .population_size(20)
            .n_generations(50)
            .seed(42)
            .check()
            .unwrap()
            .fit(&Dataset::new(xt, yt))
            .expect("Berbl trained");

        assert_eq!(berbl.n_rules(), 2);
        assert_eq!(berbl.history().len(), 51);
        assert!(berbl.fitness().is_finite());

        // rules split the input range at the break, either side by side
        // or one nested in the other
        let conditions: Vec<_> = berbl.model().rules().iter().map(|r| r.condition()).collect();
        let max_low = conditions
            .iter()
            .map(|c| c.lows()[0])
            .fold(f64::NEG_INFINITY, f64::max);
        let min_high = conditions
            .iter()
            .map(|c| c.highs()[0])
            .fold(f64::INFINITY, f64::min);
        assert!(
            (max_low - 1.).abs() < 0.1 || (min_high - 1.).abs() < 0.1,
            "no split near 1: {:?}",
            conditions
        );

        let x = array![[0.5], [1.5]];
        let y = berbl.predict(&x).unwrap();
        assert_abs_diff_eq!(y[0], 2., epsilon = 0.2);
        assert_abs_diff_eq!(y[1], 0.5, epsilon = 0.2);

        let (_, vars) = berbl.predict_valvar(&x).unwrap();
        assert!(vars.iter().all(|v| *v > 0.));
    }

    #[test]
    fn test_too_few_points() {
        let xt = array![[0.5, 0.5], [0.2, 0.1]];
        let yt = array![1., 2.];
        let res = Berbl::params(array![[0., 1.], [0., 1.]])
            .check()
            .unwrap()
            .train(&xt, &yt);
        assert!(matches!(
            res,
            Err(BerblError::DataInsufficientError { needed: 3, got: 2 })
        ));
    }

    #[test]
    fn test_xlimits_mismatch() {
        let (xt, yt) = piecewise(20);
        let res = Berbl::params(array![[0., 2.], [0., 1.]])
            .check()
            .unwrap()
            .train(&xt, &yt);
        assert!(matches!(res, Err(BerblError::InvalidConfigError(_))));

        let res = Berbl::params(array![[0., 1.]])
            .check()
            .unwrap()
            .train(&xt, &yt);
        assert!(matches!(res, Err(BerblError::InvalidConfigError(_))));
    }

    #[test]
    fn test_unmatched_input() {
        let (xt, yt) = piecewise(40);
        let berbl = Berbl::params(array![[0., 2.]])
            .population_size(6)
            .n_generations(3)
            .seed(0)
            .check()
            .unwrap()
            .train(&xt, &yt)
            .expect("Berbl trained");
        // no default rule: inputs beyond every rule upper bound are unmatched
        let highest = berbl
            .model()
            .rules()
            .iter()
            .map(|r| r.condition().highs()[0])
            .fold(f64::NEG_INFINITY, f64::max);
        let x = array![[0.5], [highest + 1.]];
        assert!(matches!(
            berbl.predict(&x),
            Err(BerblError::UnmatchedInputError { index: 1 })
        ));
    }

    #[test]
    fn test_default_rule_matches_everywhere() {
        let (xt, yt) = piecewise(40);
        let berbl = Berbl::params(array![[0., 2.]])
            .population_size(6)
            .n_generations(3)
            .configure_fit(|fit| fit.default_rule(true))
            .seed(0)
            .check()
            .unwrap()
            .train(&xt, &yt)
            .expect("Berbl trained");
        assert!(berbl.predict(&array![[5.]]).is_ok());
    }

    #[cfg(feature = "persistent")]
    #[test]
    fn test_save_load() {
        let (xt, yt) = piecewise(40);
        let berbl = Berbl::params(array![[0., 2.]])
            .population_size(6)
            .n_generations(2)
            .seed(1)
            .check()
            .unwrap()
            .train(&xt, &yt)
            .expect("Berbl trained");
        let test_dir = "target/tests";
        std::fs::create_dir_all(test_dir).ok();
        let path = format!("{test_dir}/berbl.json");
        berbl.save(&path).expect("Berbl saved");
        let loaded = Berbl::load(&path).expect("Berbl loaded");
        assert_eq!(loaded.n_rules(), berbl.n_rules());
        let x = array![[0.7]];
        assert_abs_diff_eq!(
            loaded.predict(&x).unwrap(),
            berbl.predict(&x).unwrap(),
            epsilon = 1e-12
        );
    }
}
