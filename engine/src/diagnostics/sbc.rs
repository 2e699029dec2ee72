//! Simulation-based calibration of the episode hierarchy
//!
//! One replication draws every latent value from the prior, simulates a
//! series from it, refits the series with the same configuration, and
//! records where each true value falls among the posterior draws. A
//! calibrated sampler yields ranks uniform on 0..=L.
//!
//! Reference: Talts et al. (2018), "Validating Bayesian Inference Algorithms
//! with Simulation-Based Calibration"

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::diagnostics::DiagnosticsError;
use crate::engine::fit;
use crate::simulate::{simulate_table, SyntheticDesign, TrueValues};

/// Smallest share of replications that must fit for a run to pass.
const MIN_SUCCESS_RATE: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SbcConfig {
    pub n_sims: usize,
    /// L: the true value is ranked among this many thinned draws
    pub n_draws_per_sim: usize,
    pub n_bins: usize,
    /// Family-wise significance level; each parameter is tested at
    /// `alpha / tracked parameters`
    pub alpha: f64,
    /// Trace names to rank; empty ranks every parameter
    pub params_to_track: Vec<String>,
    pub design: SyntheticDesign,
    pub seed: u64,
}

impl Default for SbcConfig {
    fn default() -> Self {
        Self {
            n_sims: 100,
            n_draws_per_sim: 99,
            n_bins: 10,
            alpha: 0.05,
            params_to_track: Vec::new(),
            design: SyntheticDesign {
                seasons: 2,
                episodes_per_season: 4,
                ..SyntheticDesign::default()
            },
            seed: 42,
        }
    }
}

/// Outcome of one simulate-then-fit round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SbcReplication {
    pub sim_id: usize,
    pub true_params: BTreeMap<String, f64>,
    pub ranks: BTreeMap<String, usize>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl SbcReplication {
    fn failed(sim_id: usize, error: impl ToString) -> Self {
        Self {
            sim_id,
            true_params: BTreeMap::new(),
            ranks: BTreeMap::new(),
            success: false,
            error_message: Some(error.to_string()),
        }
    }
}

/// Rank histogram of one parameter and its χ² test against uniformity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankCheck {
    pub histogram: Vec<usize>,
    pub chi_square: f64,
    pub p_value: f64,
    pub uniform: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SbcResult {
    pub config: SbcConfig,
    pub replications: Vec<SbcReplication>,
    pub n_success: usize,
    pub n_failed: usize,
    pub params: BTreeMap<String, RankCheck>,
    /// Bonferroni-corrected level each parameter's p-value is compared to
    pub per_param_alpha: f64,
    /// Every tracked parameter looks uniform and enough fits succeeded
    pub passed: bool,
    pub messages: Vec<String>,
}

/// Run `config.n_sims` replications against the model described by
/// `engine`. Failed fits are recorded in the result rather than returned.
pub fn run_sbc(config: SbcConfig, engine: &EngineConfig) -> Result<SbcResult, DiagnosticsError> {
    if config.n_sims == 0 || config.n_draws_per_sim == 0 || config.n_bins == 0 {
        return Err(DiagnosticsError::InsufficientData(
            "calibration needs at least one simulation, draw and bin".to_string(),
        ));
    }
    let pooled = engine.sampler.chains * engine.sampler.retained;
    if pooled < config.n_draws_per_sim {
        return Err(DiagnosticsError::InsufficientData(format!(
            "{} pooled posterior draws cannot be thinned to {} per simulation",
            pooled, config.n_draws_per_sim
        )));
    }

    let mut rng = ChaCha20Rng::seed_from_u64(config.seed);
    let mut replications = Vec::with_capacity(config.n_sims);
    for sim_id in 0..config.n_sims {
        let mut engine = engine.clone();
        engine.sampler.seed = rng.gen();
        engine.sampler.chain_seeds = None;

        let replication = replicate(sim_id, &config, &engine, &mut rng);
        match &replication.error_message {
            Some(error) => warn!(sim_id, %error, "calibration fit failed"),
            None => debug!(sim_id, "calibration replication done"),
        }
        replications.push(replication);
    }

    let result = analyze_sbc_results(replications, config)?;
    info!(
        n_success = result.n_success,
        n_failed = result.n_failed,
        passed = result.passed,
        "calibration finished"
    );
    Ok(result)
}

fn replicate(
    sim_id: usize,
    config: &SbcConfig,
    engine: &EngineConfig,
    rng: &mut ChaCha20Rng,
) -> SbcReplication {
    let bounds = engine.bounds;
    let truth = match TrueValues::from_prior(&config.design, &bounds, &engine.hyper, rng) {
        Ok(truth) => truth,
        Err(e) => return SbcReplication::failed(sim_id, e),
    };
    let table =
        match simulate_table(&truth, &config.design, &bounds, engine.hyper.obs_variance, rng) {
            Ok(table) => table,
            Err(e) => return SbcReplication::failed(sim_id, e),
        };
    let fitted = match fit(&table, engine) {
        Ok(fitted) => fitted,
        Err(e) => return SbcReplication::failed(sim_id, e),
    };
    let Some(state) = truth.to_state(fitted.model()) else {
        return SbcReplication::failed(sim_id, "simulated ids do not match the fitted model");
    };

    let layout = fitted.model().layout();
    let truth_row = layout.flatten(&state);
    let tracked = |name: &str| {
        config.params_to_track.is_empty() || config.params_to_track.iter().any(|p| p == name)
    };

    let mut true_params = BTreeMap::new();
    let mut ranks = BTreeMap::new();
    for (name, &value) in layout.names().iter().zip(&truth_row) {
        if !tracked(name.as_str()) {
            continue;
        }
        let Some(draws) = fitted.param_samples(name) else {
            continue;
        };
        // A run cut short by its budget cannot be ranked on the common scale
        if draws.len() < config.n_draws_per_sim {
            return SbcReplication::failed(
                sim_id,
                format!(
                    "{} has {} draws, fewer than {}",
                    name,
                    draws.len(),
                    config.n_draws_per_sim
                ),
            );
        }
        true_params.insert(name.clone(), value);
        ranks.insert(name.clone(), compute_rank(value, &thin(&draws, config.n_draws_per_sim)));
    }

    SbcReplication {
        sim_id,
        true_params,
        ranks,
        success: true,
        error_message: None,
    }
}

/// `n` draws evenly spaced through `draws`, or all of them if there are
/// no more than `n`.
fn thin(draws: &[f64], n: usize) -> Vec<f64> {
    if draws.len() <= n {
        return draws.to_vec();
    }
    (0..n).map(|i| draws[i * draws.len() / n]).collect()
}

/// Number of draws strictly below `true_value`, in 0..=draws.len().
pub fn compute_rank(true_value: f64, posterior_draws: &[f64]) -> usize {
    posterior_draws.iter().filter(|&&x| x < true_value).count()
}

/// Count ranks in 0..=max_rank into `n_bins` equal-width bins. Ranks above
/// `max_rank` are ignored.
pub fn build_rank_histogram(ranks: &[usize], max_rank: usize, n_bins: usize) -> Vec<usize> {
    let mut counts = vec![0; n_bins];
    let n_ranks = max_rank + 1;
    for &rank in ranks.iter().filter(|&&r| r <= max_rank) {
        counts[rank * n_bins / n_ranks] += 1;
    }
    counts
}

/// Pearson χ² test of equal bin counts. Returns (statistic, p-value,
/// uniform at level `alpha`). Empty or single-bin histograms pass trivially.
pub fn test_uniformity(histogram: &[usize], alpha: f64) -> (f64, f64, bool) {
    let total: usize = histogram.iter().sum();
    if total == 0 || histogram.len() < 2 {
        return (0.0, 1.0, true);
    }

    let expected = total as f64 / histogram.len() as f64;
    let statistic = histogram
        .iter()
        .map(|&count| (count as f64 - expected).powi(2) / expected)
        .sum::<f64>();
    let p_value = chi_square_upper_tail(statistic, (histogram.len() - 1) as f64);
    (statistic, p_value, p_value >= alpha)
}

/// P(X > x) for X ~ χ²(df). NaN when `df` is not a valid degree of freedom.
fn chi_square_upper_tail(x: f64, df: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    ChiSquared::new(df).map_or(f64::NAN, |dist| 1.0 - dist.cdf(x))
}

/// Histogram and test the ranks of every parameter seen in a successful
/// replication. The family-wise level `config.alpha` is split evenly
/// across the parameters tested.
pub fn analyze_sbc_results(
    replications: Vec<SbcReplication>,
    config: SbcConfig,
) -> Result<SbcResult, DiagnosticsError> {
    if replications.is_empty() {
        return Err(DiagnosticsError::InsufficientData(
            "no calibration replications to analyze".to_string(),
        ));
    }

    let mut ranks_by_param: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for rep in replications.iter().filter(|r| r.success) {
        for (name, &rank) in &rep.ranks {
            ranks_by_param.entry(name.as_str()).or_default().push(rank);
        }
    }

    let per_param_alpha = config.alpha / ranks_by_param.len().max(1) as f64;
    let mut messages = Vec::new();
    let mut params = BTreeMap::new();
    for (name, ranks) in ranks_by_param {
        let histogram = build_rank_histogram(&ranks, config.n_draws_per_sim, config.n_bins);
        let (chi_square, p_value, uniform) = test_uniformity(&histogram, per_param_alpha);
        if !uniform {
            messages.push(format!(
                "{}: ranks not uniform (χ² = {:.2}, p = {:.4} < {:.4})",
                name, chi_square, p_value, per_param_alpha
            ));
        }
        params.insert(
            name.to_string(),
            RankCheck {
                histogram,
                chi_square,
                p_value,
                uniform,
            },
        );
    }

    let n_success = replications.iter().filter(|r| r.success).count();
    let n_failed = replications.len() - n_success;
    let enough_fits = n_success as f64 / replications.len() as f64 >= MIN_SUCCESS_RATE;
    if !enough_fits {
        messages.push(format!(
            "only {} of {} replications fitted",
            n_success,
            replications.len()
        ));
    }
    if params.is_empty() {
        messages.push("no ranks recorded".to_string());
    }
    let passed = enough_fits && !params.is_empty() && params.values().all(|c| c.uniform);

    Ok(SbcResult {
        config,
        replications,
        n_success,
        n_failed,
        params,
        per_param_alpha,
        passed,
        messages,
    })
}
