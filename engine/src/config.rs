//! Engine configuration and hyperparameter registry.
//!
//! Every numeric choice the engine makes is read from here: rating bounds,
//! hyperpriors, sampler budget and adaptation, diagnostic thresholds and the
//! summary interval. All structs deserialize from JSON with per-field
//! defaults, so a config file only needs to name what it overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::EngineError;

/// Upper limit on `max_wall_clock_secs`, a little under 32 years.
pub const MAX_WALL_CLOCK_SECS: f64 = 1.0e9;

// =============================================================================
// Top level
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bounds: RatingBounds,
    pub hyper: Hyperparameters,
    pub sampler: SamplerConfig,
    pub diagnostics: DiagnosticThresholds,
    pub summary: SummaryConfig,
}

impl EngineConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(content).context("Failed to parse engine configuration JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.bounds.validate()?;
        self.hyper.validate()?;
        self.sampler.validate()?;
        self.diagnostics.validate()?;
        self.summary.validate()?;
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidConfig(msg.into())
}

// =============================================================================
// Rating bounds
// =============================================================================

/// Closed interval [lower, upper] that holds every rating and every latent
/// location parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingBounds {
    pub lower: f64,
    pub upper: f64,
}

impl Default for RatingBounds {
    fn default() -> Self {
        Self {
            lower: 1.0,
            upper: 10.0,
        }
    }
}

impl RatingBounds {
    pub fn contains(&self, x: f64) -> bool {
        x >= self.lower && x <= self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.lower.is_finite() || !self.upper.is_finite() {
            return Err(invalid("rating bounds must be finite"));
        }
        if self.lower >= self.upper {
            return Err(invalid(format!(
                "rating bounds must satisfy lower < upper (got [{}, {}])",
                self.lower, self.upper
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Hyperparameters
// =============================================================================

/// Truncated-normal prior on the global mean: N(mean, variance) on the
/// rating bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalMeanPrior {
    pub mean: f64,
    pub variance: f64,
}

impl Default for GlobalMeanPrior {
    fn default() -> Self {
        Self {
            mean: 5.5,
            variance: 25.0,
        }
    }
}

/// A hierarchy scale (σ_μ or τ0): either a fixed value or promoted to a
/// random variable with a half-Cauchy hyperprior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HyperScale {
    Fixed { value: f64 },
    HalfCauchy { scale: f64 },
}

impl HyperScale {
    pub fn is_sampled(&self) -> bool {
        matches!(self, HyperScale::HalfCauchy { .. })
    }

    /// Fixed value, or the hyperprior scale used as the chain's reference
    /// starting point when sampled.
    pub fn reference_value(&self) -> f64 {
        match *self {
            HyperScale::Fixed { value } => value,
            HyperScale::HalfCauchy { scale } => scale,
        }
    }

    fn validate(&self, name: &str) -> Result<(), EngineError> {
        let v = self.reference_value();
        if !(v.is_finite() && v > 0.0) {
            return Err(invalid(format!("{} must be positive and finite (got {})", name, v)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    /// Prior (m, v) on the global mean μ0
    pub global_mean: GlobalMeanPrior,
    /// σ_μ: spread of season means around μ0
    pub season_mean_scale: HyperScale,
    /// τ0: half-Cauchy scale of the season spreads τ_s
    pub spread_scale: HyperScale,
    /// σ² in the per-episode observation variance σ²/n_i
    pub obs_variance: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            global_mean: GlobalMeanPrior::default(),
            season_mean_scale: HyperScale::Fixed { value: 1.5 },
            spread_scale: HyperScale::Fixed { value: 1.0 },
            obs_variance: 1.0,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.global_mean.mean.is_finite() {
            return Err(invalid("global mean prior mean must be finite"));
        }
        if !(self.global_mean.variance.is_finite() && self.global_mean.variance > 0.0) {
            return Err(invalid("global mean prior variance must be positive and finite"));
        }
        self.season_mean_scale.validate("season_mean_scale")?;
        self.spread_scale.validate("spread_scale")?;
        if !(self.obs_variance.is_finite() && self.obs_variance > 0.0) {
            return Err(invalid("obs_variance must be positive and finite"));
        }
        Ok(())
    }
}

// =============================================================================
// Sampler
// =============================================================================

/// Acceptance-rate band the step-size adapter steers toward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceBand {
    pub low: f64,
    pub high: f64,
}

impl Default for AcceptanceBand {
    fn default() -> Self {
        Self {
            low: 0.3,
            high: 0.6,
        }
    }
}

impl AcceptanceBand {
    pub fn midpoint(&self) -> f64 {
        0.5 * (self.low + self.high)
    }

    pub fn contains(&self, rate: f64) -> bool {
        rate >= self.low && rate <= self.high
    }
}

/// Proposal used for the location blocks (season means and global mean).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    /// Symmetric Gaussian random walk
    RandomWalk,
    /// Metropolis-adjusted Langevin step using the log-density gradient
    Langevin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Number of independent chains (≥ 2)
    pub chains: usize,
    /// Discarded sweeps per chain; step sizes adapt only here
    pub warmup: usize,
    /// Retained sweeps per chain
    pub retained: usize,
    pub acceptance_band: AcceptanceBand,
    /// Sweeps per adaptation window
    pub adapt_window: usize,
    /// Consecutive all-rejected sweeps of a block before a stuck warning
    pub stuck_window: usize,
    pub location_proposal: ProposalKind,
    /// Base seed; chain k uses ChaCha20 stream k + 1 of this seed
    pub seed: u64,
    /// Explicit per-chain seeds, overriding `seed` (must be distinct)
    pub chain_seeds: Option<Vec<u64>>,
    /// Wall-clock budget for the whole run, in seconds, at most
    /// [`MAX_WALL_CLOCK_SECS`]
    pub max_wall_clock_secs: Option<f64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            chains: 4,
            warmup: 1000,
            retained: 1000,
            acceptance_band: AcceptanceBand::default(),
            adapt_window: 25,
            stuck_window: 200,
            location_proposal: ProposalKind::RandomWalk,
            seed: 42,
            chain_seeds: None,
            max_wall_clock_secs: None,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.chains < 2 {
            return Err(invalid(format!(
                "at least 2 chains are required for convergence diagnostics (got {})",
                self.chains
            )));
        }
        if self.retained < 4 {
            return Err(invalid(format!(
                "retained sweeps must be at least 4 (got {})",
                self.retained
            )));
        }
        let band = self.acceptance_band;
        if !(band.low > 0.0 && band.low < band.high && band.high < 1.0) {
            return Err(invalid(format!(
                "acceptance band must satisfy 0 < low < high < 1 (got [{}, {}])",
                band.low, band.high
            )));
        }
        if self.adapt_window == 0 {
            return Err(invalid("adapt_window must be positive"));
        }
        if self.stuck_window == 0 {
            return Err(invalid("stuck_window must be positive"));
        }
        if let Some(seeds) = &self.chain_seeds {
            if seeds.len() != self.chains {
                return Err(invalid(format!(
                    "chain_seeds has {} entries for {} chains",
                    seeds.len(),
                    self.chains
                )));
            }
            let distinct: HashSet<u64> = seeds.iter().copied().collect();
            if distinct.len() != seeds.len() {
                return Err(invalid("chain_seeds must be pairwise distinct"));
            }
        }
        if let Some(secs) = self.max_wall_clock_secs {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(invalid("max_wall_clock_secs must be positive"));
            }
            if secs > MAX_WALL_CLOCK_SECS {
                return Err(invalid(format!(
                    "max_wall_clock_secs must not exceed {}",
                    MAX_WALL_CLOCK_SECS
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Diagnostics and summary
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticThresholds {
    /// A parameter passes when its R-hat is below this
    pub max_rhat: f64,
    /// ... and its bulk effective sample size is at least this
    pub min_ess: f64,
}

impl Default for DiagnosticThresholds {
    fn default() -> Self {
        Self {
            max_rhat: 1.01,
            min_ess: 100.0,
        }
    }
}

impl DiagnosticThresholds {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.max_rhat >= 1.0) {
            return Err(invalid("max_rhat must be at least 1.0"));
        }
        if !(self.min_ess >= 0.0) {
            return Err(invalid("min_ess must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointEstimate {
    Mean,
    Median,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Equal-tailed credible interval mass
    pub interval_level: f64,
    pub point_estimate: PointEstimate,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            interval_level: 0.9,
            point_estimate: PointEstimate::Mean,
        }
    }
}

impl SummaryConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.interval_level > 0.0 && self.interval_level < 1.0) {
            return Err(invalid(format!(
                "interval_level must lie in (0, 1) (got {})",
                self.interval_level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "sampler": { "chains": 2, "retained": 200 },
            "hyper": { "spread_scale": { "kind": "half_cauchy", "scale": 2.0 } }
        }"#;
        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.sampler.chains, 2);
        assert_eq!(config.sampler.retained, 200);
        assert_eq!(config.sampler.warmup, 1000);
        assert_eq!(config.bounds, RatingBounds::default());
        assert!(config.hyper.spread_scale.is_sampled());
        assert!(!config.hyper.season_mean_scale.is_sampled());
    }

    #[test]
    fn test_single_chain_rejected() {
        let mut config = EngineConfig::default();
        config.sampler.chains = 1;
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_shared_chain_seeds_rejected() {
        let mut config = EngineConfig::default();
        config.sampler.chains = 3;
        config.sampler.chain_seeds = Some(vec![7, 8, 7]);
        assert!(config.validate().is_err());

        config.sampler.chain_seeds = Some(vec![7, 8, 9]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_bounds_and_band() {
        let mut config = EngineConfig::default();
        config.bounds = RatingBounds {
            lower: 10.0,
            upper: 1.0,
        };
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.sampler.acceptance_band = AcceptanceBand {
            low: 0.7,
            high: 0.6,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_level_range() {
        let mut config = EngineConfig::default();
        config.summary.interval_level = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wall_clock_limit_range() {
        let mut config = EngineConfig::default();
        config.sampler.max_wall_clock_secs = Some(3600.0);
        assert!(config.validate().is_ok());

        config.sampler.max_wall_clock_secs = Some(1.0e20);
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        config.sampler.max_wall_clock_secs = Some(0.0);
        assert!(config.validate().is_err());
    }
}
