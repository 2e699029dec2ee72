//! Synthetic series generator.
//!
//! Draws a full set of latent values (from the prior, or with fixed season
//! parameters), then simulates vote-weighted ratings from them. Used by the
//! recovery tests, simulation-based calibration and the `simulate` command.

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::config::{HyperScale, Hyperparameters, RatingBounds};
use crate::distributions::{sample_half_cauchy, NumericalDegeneracy, TruncatedNormal};
use crate::model::{HierarchicalModel, ParameterState};
use crate::table::EpisodeTable;

/// Shape of a synthetic series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticDesign {
    pub seasons: usize,
    pub episodes_per_season: usize,
    /// Vote counts are drawn uniformly from [min_votes, max_votes]
    pub min_votes: u64,
    pub max_votes: u64,
    /// Trailing episodes of each season left without a rating
    pub unrated_per_season: usize,
}

impl Default for SyntheticDesign {
    fn default() -> Self {
        Self {
            seasons: 3,
            episodes_per_season: 8,
            min_votes: 50,
            max_votes: 2000,
            unrated_per_season: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonTruth {
    pub season_id: String,
    pub mean: f64,
    pub spread: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeTruth {
    pub episode_id: String,
    pub season_id: String,
    pub quality: f64,
    /// Whether a rating is simulated for this episode
    pub rated: bool,
}

/// True latent values used to generate a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrueValues {
    pub global_mean: f64,
    pub season_mean_scale: f64,
    pub spread_scale: f64,
    pub seasons: Vec<SeasonTruth>,
    pub episodes: Vec<EpisodeTruth>,
}

fn season_id(s: usize) -> String {
    format!("s{}", s + 1)
}

fn episode_id(s: usize, e: usize) -> String {
    format!("s{}e{:02}", s + 1, e + 1)
}

fn tn(
    center: f64,
    scale: f64,
    bounds: &RatingBounds,
) -> Result<TruncatedNormal, NumericalDegeneracy> {
    TruncatedNormal::new(center, scale, bounds.lower, bounds.upper)
}

fn draw_scale<R: Rng + ?Sized>(scale: &HyperScale, rng: &mut R) -> f64 {
    match *scale {
        HyperScale::Fixed { value } => value,
        HyperScale::HalfCauchy { scale } => sample_half_cauchy(scale, rng),
    }
}

impl TrueValues {
    /// Draw every latent value from the model's prior.
    pub fn from_prior<R: Rng + ?Sized>(
        design: &SyntheticDesign,
        bounds: &RatingBounds,
        hyper: &Hyperparameters,
        rng: &mut R,
    ) -> Result<Self, NumericalDegeneracy> {
        let prior = hyper.global_mean;
        let global_mean = tn(prior.mean, prior.variance.sqrt(), bounds)?.sample(rng)?;
        let season_mean_scale = draw_scale(&hyper.season_mean_scale, rng);
        let spread_scale = draw_scale(&hyper.spread_scale, rng);

        let mut means = Vec::with_capacity(design.seasons);
        let mut spreads = Vec::with_capacity(design.seasons);
        let season_prior = tn(global_mean, season_mean_scale, bounds)?;
        for _ in 0..design.seasons {
            means.push(season_prior.sample(rng)?);
            spreads.push(sample_half_cauchy(spread_scale, rng));
        }

        let mut truth = Self::from_seasons(design, &means, &spreads, bounds, rng)?;
        truth.global_mean = global_mean;
        truth.season_mean_scale = season_mean_scale;
        truth.spread_scale = spread_scale;
        Ok(truth)
    }

    /// Draw episode qualities around fixed season means and spreads. The
    /// global values are set to the average season mean and the spread of
    /// the season means.
    pub fn from_seasons<R: Rng + ?Sized>(
        design: &SyntheticDesign,
        means: &[f64],
        spreads: &[f64],
        bounds: &RatingBounds,
        rng: &mut R,
    ) -> Result<Self, NumericalDegeneracy> {
        let mut seasons = Vec::with_capacity(means.len());
        let mut episodes = Vec::with_capacity(means.len() * design.episodes_per_season);
        let rated_per_season = design
            .episodes_per_season
            .saturating_sub(design.unrated_per_season);

        for (s, (&mean, &spread)) in means.iter().zip(spreads).enumerate() {
            let prior = tn(mean, spread, bounds)?;
            for e in 0..design.episodes_per_season {
                episodes.push(EpisodeTruth {
                    episode_id: episode_id(s, e),
                    season_id: season_id(s),
                    quality: prior.sample(rng)?,
                    rated: e < rated_per_season,
                });
            }
            seasons.push(SeasonTruth {
                season_id: season_id(s),
                mean,
                spread,
            });
        }

        let n = means.len().max(1) as f64;
        let global_mean = means.iter().sum::<f64>() / n;
        let season_mean_scale = (means.iter().map(|m| (m - global_mean).powi(2)).sum::<f64>()
            / n)
            .sqrt();

        Ok(Self {
            global_mean,
            season_mean_scale,
            spread_scale: spreads.iter().sum::<f64>() / n,
            seasons,
            episodes,
        })
    }

    /// Arrange the true values in the parameter order of `model`. Returns
    /// `None` when the model was not built from this truth's ids.
    pub fn to_state(&self, model: &HierarchicalModel) -> Option<ParameterState> {
        if model.episodes().len() != self.episodes.len()
            || model.seasons().len() != self.seasons.len()
        {
            return None;
        }
        let mut theta = vec![0.0; self.episodes.len()];
        for ep in &self.episodes {
            theta[model.episode_position(&ep.episode_id)?] = ep.quality;
        }
        let mut mu = vec![0.0; self.seasons.len()];
        let mut tau = vec![0.0; self.seasons.len()];
        for season in &self.seasons {
            let s = model.season_position(&season.season_id)?;
            mu[s] = season.mean;
            tau[s] = season.spread;
        }
        Some(ParameterState {
            theta,
            mu,
            tau,
            mu0: self.global_mean,
            sigma_mu: self.season_mean_scale,
            tau0: self.spread_scale,
        })
    }
}

/// Simulate observed ratings: y ~ TN(θ, sqrt(σ²/n), [a, b]) with n drawn
/// uniformly from the design's vote range.
pub fn simulate_table<R: Rng + ?Sized>(
    truth: &TrueValues,
    design: &SyntheticDesign,
    bounds: &RatingBounds,
    obs_variance: f64,
    rng: &mut R,
) -> Result<EpisodeTable, NumericalDegeneracy> {
    let mut table = EpisodeTable::new();
    let min_votes = design.min_votes.max(1);
    let max_votes = design.max_votes.max(min_votes);
    for ep in &truth.episodes {
        if !ep.rated {
            table.push_unrated(ep.episode_id.clone(), ep.season_id.clone());
            continue;
        }
        let votes = rng.gen_range(min_votes..=max_votes);
        let noise = (obs_variance / votes as f64).sqrt();
        let rating = tn(ep.quality, noise, bounds)?.sample(rng)?;
        table.push_rated(ep.episode_id.clone(), ep.season_id.clone(), rating, votes);
    }
    Ok(table)
}

/// Generate a synthetic dataset from the prior with a seeded ChaCha20 rng.
pub fn generate_dataset(
    design: &SyntheticDesign,
    bounds: &RatingBounds,
    hyper: &Hyperparameters,
    seed: u64,
) -> Result<(EpisodeTable, TrueValues), NumericalDegeneracy> {
    use rand::SeedableRng;
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let truth = TrueValues::from_prior(design, bounds, hyper, &mut rng)?;
    let table = simulate_table(&truth, design, bounds, hyper.obs_variance, &mut rng)?;
    Ok((table, truth))
}
