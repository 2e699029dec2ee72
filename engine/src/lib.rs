//! epiq: latent episode quality from vote-weighted ratings.
//!
//! Episodes are pooled toward their season, seasons toward a global mean,
//! and the posterior is explored with a blocked Metropolis-within-Gibbs
//! sampler over several independent chains. Every fit carries its own
//! convergence verdict.

pub mod config;
pub mod dataload;
pub mod diagnostics;
pub mod distributions;
pub mod engine;
pub mod error;
pub mod model;
pub mod sampler;
pub mod simulate;
pub mod summary;
pub mod table;

pub use config::{EngineConfig, HyperScale, Hyperparameters, RatingBounds};
pub use diagnostics::{ConvergenceReport, Verdict};
pub use engine::{fit, fit_with_budget, EpisodeQuality, Fit};
pub use error::{EngineError, InputValidationError};
pub use sampler::RunBudget;
pub use summary::PosteriorReport;
pub use table::EpisodeTable;
