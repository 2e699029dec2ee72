//! Convergence diagnostics across chains
//!
//! This module provides:
//! - Rank-normalized split R-hat
//! - Bulk ESS (Geyer's initial monotone sequence, pooled across chains)
//! - Tail ESS (5% and 95% quantile indicators)
//! - A pass/fail verdict against configured thresholds
//!
//! Reference: Vehtari et al. (2021) "Rank-normalization, folding, and
//! localization: An improved R-hat for assessing convergence of MCMC"

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::config::DiagnosticThresholds;

/// Convergence statistics for a single parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamConvergence {
    pub name: String,
    pub rhat: f64,
    pub ess_bulk: f64,
    pub ess_tail: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Converged,
    NotConverged,
}

/// Convergence assessment of a multi-chain run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub n_chains: usize,
    pub draws_per_chain: usize,
    pub thresholds: DiagnosticThresholds,
    pub params: Vec<ParamConvergence>,
    pub max_rhat: f64,
    pub min_ess_bulk: f64,
    pub min_ess_tail: f64,
    /// A chain reported a stuck block during retained sweeps
    pub stuck_during_retained: bool,
    pub verdict: Verdict,
    /// Names of parameters that failed a threshold
    pub failing: Vec<String>,
}

impl ConvergenceReport {
    pub fn is_converged(&self) -> bool {
        self.verdict == Verdict::Converged
    }

    pub fn param(&self, name: &str) -> Option<&ParamConvergence> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Errors during diagnostics computation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DiagnosticsError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
}

/// Assess convergence of every parameter.
///
/// # Arguments
/// * `names` - Parameter names, one per column
/// * `chains` - Retained draws per chain, each a list of rows with one value per column
/// * `thresholds` - R-hat and ESS limits a parameter must satisfy
/// * `stuck_during_retained` - Whether any chain raised a stuck warning after warm-up
///
/// # Returns
/// * `Ok(ConvergenceReport)` with per-parameter statistics and the verdict
/// * `Err(DiagnosticsError)` for fewer than 2 chains, fewer than 4 draws, or ragged input
pub fn assess_convergence(
    names: &[String],
    chains: &[&[Vec<f64>]],
    thresholds: DiagnosticThresholds,
    stuck_during_retained: bool,
) -> Result<ConvergenceReport, DiagnosticsError> {
    let n_chains = chains.len();
    if n_chains < 2 {
        return Err(DiagnosticsError::InsufficientData(format!(
            "at least 2 chains required, got {}",
            n_chains
        )));
    }
    let draws_per_chain = chains[0].len();
    if chains.iter().any(|c| c.len() != draws_per_chain) {
        return Err(DiagnosticsError::ShapeMismatch(
            "chains hold different numbers of draws".to_string(),
        ));
    }
    if draws_per_chain < 4 {
        return Err(DiagnosticsError::InsufficientData(format!(
            "at least 4 draws per chain required, got {}",
            draws_per_chain
        )));
    }
    if chains
        .iter()
        .flat_map(|c| c.iter())
        .any(|row| row.len() != names.len())
    {
        return Err(DiagnosticsError::ShapeMismatch(format!(
            "draw rows must hold {} values",
            names.len()
        )));
    }

    let mut params = Vec::with_capacity(names.len());
    let mut max_rhat: f64 = 0.0;
    let mut min_ess_bulk = f64::INFINITY;
    let mut min_ess_tail = f64::INFINITY;
    let mut failing = Vec::new();

    for (idx, name) in names.iter().enumerate() {
        let draws_per_chain: Vec<Vec<f64>> = chains
            .iter()
            .map(|chain| chain.iter().map(|row| row[idx]).collect())
            .collect();

        let rhat = rank_normalized_split_rhat(&draws_per_chain);
        let ess_bulk = compute_ess_bulk(&draws_per_chain);
        let ess_tail = compute_ess_tail(&draws_per_chain);
        let passed = rhat <= thresholds.max_rhat && ess_bulk >= thresholds.min_ess;

        // Track worst metrics; an undefined R-hat counts as unbounded
        max_rhat = max_rhat.max(if rhat.is_nan() { f64::INFINITY } else { rhat });
        min_ess_bulk = min_ess_bulk.min(ess_bulk);
        min_ess_tail = min_ess_tail.min(ess_tail);
        if !passed {
            failing.push(name.clone());
        }

        params.push(ParamConvergence {
            name: name.clone(),
            rhat,
            ess_bulk,
            ess_tail,
            passed,
        });
    }

    let verdict = if failing.is_empty() && !stuck_during_retained {
        Verdict::Converged
    } else {
        Verdict::NotConverged
    };

    Ok(ConvergenceReport {
        n_chains,
        draws_per_chain,
        thresholds,
        params,
        max_rhat,
        min_ess_bulk,
        min_ess_tail,
        stuck_during_retained,
        verdict,
        failing,
    })
}

// =============================================================================
// Chain transforms
// =============================================================================

/// Split each chain into its first and second half (the middle draw of an
/// odd-length chain is dropped).
fn split_chains(draws_per_chain: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut split = Vec::with_capacity(2 * draws_per_chain.len());
    for chain in draws_per_chain {
        let half = chain.len() / 2;
        split.push(chain[..half].to_vec());
        split.push(chain[chain.len() - half..].to_vec());
    }
    split
}

/// 1-based ranks of `values`, ties receiving their average rank.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Positions start..end share ranks start+1..=end
        let rank = 0.5 * ((start + 1) + end) as f64;
        for &i in &order[start..end] {
            ranks[i] = rank;
        }
        start = end;
    }
    ranks
}

/// Replace pooled draws by normal scores of their ranks:
/// z = Φ⁻¹((r − 3/8) / (S + 1/4)).
fn rank_normalize(draws_per_chain: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let pooled: Vec<f64> = draws_per_chain.iter().flatten().copied().collect();
    let total = pooled.len() as f64;
    let ranks = average_ranks(&pooled);
    let normal = Normal::standard();

    let mut out = Vec::with_capacity(draws_per_chain.len());
    let mut offset = 0;
    for chain in draws_per_chain {
        let z = ranks[offset..offset + chain.len()]
            .iter()
            .map(|&r| normal.inverse_cdf((r - 0.375) / (total + 0.25)))
            .collect();
        out.push(z);
        offset += chain.len();
    }
    out
}

// =============================================================================
// R-hat
// =============================================================================

fn chain_mean(chain: &[f64]) -> f64 {
    chain.iter().sum::<f64>() / chain.len() as f64
}

fn chain_variance(chain: &[f64], mean: f64) -> f64 {
    chain.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (chain.len() - 1) as f64
}

/// Compute R-hat (potential scale reduction factor) on the given chains
///
/// With zero within-chain variance, identical constant chains give 1 and
/// distinct constant chains give +∞.
fn compute_rhat(draws_per_chain: &[Vec<f64>]) -> f64 {
    let n_chains = draws_per_chain.len();
    let n_draws = draws_per_chain[0].len();
    if n_chains < 2 || n_draws < 2 {
        return f64::NAN;
    }

    let chain_means: Vec<f64> = draws_per_chain.iter().map(|c| chain_mean(c)).collect();

    // Within-chain variance
    let within_var = draws_per_chain
        .iter()
        .zip(&chain_means)
        .map(|(chain, &m)| chain_variance(chain, m))
        .sum::<f64>()
        / n_chains as f64;

    // Between-chain variance
    let grand_mean = chain_means.iter().sum::<f64>() / n_chains as f64;
    let between_var = chain_means
        .iter()
        .map(|m| (m - grand_mean).powi(2))
        .sum::<f64>()
        * n_draws as f64
        / (n_chains - 1) as f64;

    if within_var <= 0.0 {
        return if between_var <= 0.0 { 1.0 } else { f64::INFINITY };
    }

    // Pooled variance estimate
    let var_plus = ((n_draws - 1) as f64 * within_var + between_var) / n_draws as f64;

    (var_plus / within_var).sqrt()
}

/// Split R-hat of the rank-normalized draws
pub fn rank_normalized_split_rhat(draws_per_chain: &[Vec<f64>]) -> f64 {
    let split = split_chains(draws_per_chain);
    if is_constant(&split) {
        return compute_rhat(&split);
    }
    compute_rhat(&rank_normalize(&split))
}

fn is_constant(chains: &[Vec<f64>]) -> bool {
    chains.iter().all(|c| c.windows(2).all(|w| w[0] == w[1]))
}

// =============================================================================
// Effective sample size
// =============================================================================

/// Autocovariance of `chain` at `lag` (biased estimator, divisor n).
fn autocovariance(chain: &[f64], mean: f64, lag: usize) -> f64 {
    let n = chain.len();
    (0..n - lag)
        .map(|i| (chain[i] - mean) * (chain[i + lag] - mean))
        .sum::<f64>()
        / n as f64
}

/// Multi-chain ESS with Geyer's initial monotone sequence.
///
/// Autocorrelations are combined across chains through the pooled variance
/// estimate and only computed up to the first negative pair of lags.
fn compute_ess(draws_per_chain: &[Vec<f64>]) -> f64 {
    let n_chains = draws_per_chain.len();
    let n = draws_per_chain[0].len();
    let total = (n_chains * n) as f64;
    if n < 2 {
        return f64::NAN;
    }

    let means: Vec<f64> = draws_per_chain.iter().map(|c| chain_mean(c)).collect();
    let mean_acov = |lag: usize| -> f64 {
        draws_per_chain
            .iter()
            .zip(&means)
            .map(|(chain, &m)| autocovariance(chain, m, lag))
            .sum::<f64>()
            / n_chains as f64
    };

    let within = mean_acov(0) * n as f64 / (n - 1) as f64;
    let mut var_plus = within * (n - 1) as f64 / n as f64;
    if n_chains > 1 {
        let grand = means.iter().sum::<f64>() / n_chains as f64;
        var_plus += means.iter().map(|m| (m - grand).powi(2)).sum::<f64>() / (n_chains - 1) as f64;
    }
    if !(var_plus > 0.0) {
        // Every draw identical: nothing to correlate
        return total;
    }

    let rho = |lag: usize| 1.0 - (within - mean_acov(lag)) / var_plus;

    let mut rho_hat = vec![0.0; n + 1];
    rho_hat[0] = 1.0;
    let mut rho_even = 1.0;
    let mut rho_odd = rho(1);
    rho_hat[1] = rho_odd;

    let mut t = 0;
    while t + 5 < n && rho_even + rho_odd > 0.0 {
        t += 2;
        rho_even = rho(t);
        rho_odd = rho(t + 1);
        if rho_even + rho_odd >= 0.0 {
            rho_hat[t] = rho_even;
            rho_hat[t + 1] = rho_odd;
        }
    }
    let max_t = t;
    if rho_even > 0.0 {
        rho_hat[max_t] = rho_even;
    }

    // Initial monotone sequence over the pair sums
    let mut t = 0;
    while t + 4 <= max_t {
        t += 2;
        let prev = rho_hat[t - 2] + rho_hat[t - 1];
        if rho_hat[t] + rho_hat[t + 1] > prev {
            rho_hat[t] = prev / 2.0;
            rho_hat[t + 1] = rho_hat[t];
        }
    }

    let tau_hat = -1.0 + 2.0 * rho_hat[..max_t].iter().sum::<f64>() + rho_hat[max_t];
    let tau_hat = tau_hat.max(1.0 / total.log10());
    total / tau_hat
}

/// Bulk ESS: ESS of the split, rank-normalized draws
pub fn compute_ess_bulk(draws_per_chain: &[Vec<f64>]) -> f64 {
    let split = split_chains(draws_per_chain);
    if is_constant(&split) {
        return compute_ess(&split);
    }
    compute_ess(&rank_normalize(&split))
}

/// Tail ESS: the smaller ESS of the indicators I(x ≤ q05) and I(x ≤ q95)
pub fn compute_ess_tail(draws_per_chain: &[Vec<f64>]) -> f64 {
    let pooled: Vec<f64> = draws_per_chain.iter().flatten().copied().collect();
    let mut sorted = pooled;
    sorted.sort_by(f64::total_cmp);
    let split = split_chains(draws_per_chain);

    [0.05, 0.95]
        .iter()
        .map(|&p| {
            let q = linear_quantile(&sorted, p);
            let indicator: Vec<Vec<f64>> = split
                .iter()
                .map(|c| c.iter().map(|&x| if x <= q { 1.0 } else { 0.0 }).collect())
                .collect();
            compute_ess(&indicator)
        })
        .fold(f64::INFINITY, f64::min)
}

/// Quantile of sorted data with linear interpolation between order
/// statistics (h = (n − 1)p).
pub fn linear_quantile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}
