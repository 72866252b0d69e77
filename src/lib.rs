//! This library implements a Bayesian evolutionary rule-based learner
//! for regression.
//!
//! The learnt model is a set of rules: each rule restricts a Bayesian linear
//! model (the local model) to the inputs lying within its condition, a
//! hyper-rectangle of the input space. Where several rules match an input,
//! their predictions are mixed by a softmax gating over the matching rules.
//!
//! The set of rules is searched by a genetic algorithm whose individuals are
//! whole sets of rules. Each individual is scored by the variational lower
//! bound of the evidence of its fitted mixture, so that the number of rules
//! and their placement are traded off against the fit quality without any
//! hand-tuned penalty.
//!
//! # Implementation
//!
//! * Local models are fitted by variational Bayes with gamma priors on
//!   the weights and noise precisions.
//! * The gating coefficients are fitted by iteratively reweighted least
//!   squares within an EM loop which stops when the bound no longer increases.
//! * The evolutionary search is implemented as an [argmin](https://www.argmin-rs.org/)
//!   solver, the individuals of a generation being fitted in parallel with
//!   [rayon](https://docs.rs/rayon).
//!
//! # Features
//!
//! ## persistent
//!
//! The `persistent` feature enables `save()`/`load()` methods for a learnt
//! set of rules to/from a json file using the [serde and serde_json crates](https://serde.rs/).
//!
//! # Example
//!
//! ```no_run
//! use berbl::Berbl;
//! use linfa::{traits::Fit, Dataset, ParamGuard};
//! use ndarray::{array, Array1, Axis};
//!
//! // Two lines joined at x = 1
//! let xt = Array1::linspace(0., 2., 100);
//! let yt = xt.mapv(|x| if x < 1. { 2. * x + 1. } else { -3. * x + 5. });
//! let ds = Dataset::new(xt.insert_axis(Axis(1)), yt);
//!
//! let berbl = Berbl::params(array![[0., 2.]])
//!     .population_size(20)
//!     .n_generations(50)
//!     .seed(42)
//!     .check()
//!     .expect("Valid parameters")
//!     .fit(&ds)
//!     .expect("Rules learnt");
//!
//! println!("{} rules learnt", berbl.n_rules());
//! let (means, vars) = berbl
//!     .predict_valvar(&array![[0.5], [1.5]])
//!     .expect("Inputs matched");
//! ```
//!
//! # Reference
//!
//! Drugowitsch, Jan. Design and Analysis of Learning Classifier Systems:
//! A Probabilistic Approach. Studies in Computational Intelligence 139,
//! Springer (2008).
//!
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod condition;
mod errors;
mod evidence;
mod individual;
mod local_model;
mod mixing;
mod mixture;
mod types;
mod utils;

mod algorithm;
mod parameters;
mod solver;

pub use condition::*;
pub use errors::*;
pub use evidence::*;
pub use individual::*;
pub use local_model::*;
pub use mixing::*;
pub use mixture::*;
pub use types::*;
pub use utils::{add_bias, data_ranges};

pub use algorithm::*;
pub use parameters::*;
pub use solver::*;
