//! Three-level hierarchy: episode → season → global.
//!
//! ```text
//! y_i  ~ TN(θ_i, sqrt(σ²/n_i), [a, b])     rated episodes only
//! θ_i  ~ TN(μ_s, τ_s, [a, b])
//! μ_s  ~ TN(μ0, σ_μ, [a, b])
//! τ_s  ~ HalfCauchy(τ0)
//! μ0   ~ TN(m, sqrt(v), [a, b])
//! σ_μ, τ0: fixed, or ~ HalfCauchy(scale)
//! ```
//!
//! Parameters live in flat arrays indexed by episode and season position;
//! each season keeps the indices of its member episodes. Besides the full
//! log joint, the model exposes the local conditional of every block: only
//! the terms that mention the parameter being updated.

use std::collections::HashMap;

use crate::config::{HyperScale, Hyperparameters, RatingBounds};
use crate::distributions::{half_cauchy_log_pdf, NumericalDegeneracy, TruncatedNormal};
use crate::error::EngineError;
use crate::table::EpisodeTable;

// =============================================================================
// Nodes
// =============================================================================

/// Observed rating bound to its likelihood noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub rating: f64,
    pub votes: u64,
    /// sqrt(σ²/n)
    pub noise_sd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeNode {
    pub id: String,
    /// Index into `HierarchicalModel::seasons`
    pub season: usize,
    /// `None` for unrated episodes
    pub observation: Option<Observation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeasonNode {
    pub id: String,
    /// Indices into `HierarchicalModel::episodes`
    pub members: Vec<usize>,
}

// =============================================================================
// Parameter state and layout
// =============================================================================

/// One point in parameter space. Fixed hyper-scales are carried at their
/// configured value and never updated.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterState {
    pub theta: Vec<f64>,
    pub mu: Vec<f64>,
    pub tau: Vec<f64>,
    pub mu0: f64,
    pub sigma_mu: f64,
    pub tau0: f64,
}

/// Which latent quantity a trace column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamRef {
    Theta(usize),
    SeasonMean(usize),
    SeasonSpread(usize),
    GlobalMean,
    SeasonMeanScale,
    SpreadScale,
}

/// Column order of a trace row:
/// `theta[0..E], mu[0..S], tau[0..S], mu0, [sigma_mu], [tau0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterLayout {
    n_episodes: usize,
    n_seasons: usize,
    sample_sigma_mu: bool,
    sample_tau0: bool,
    names: Vec<String>,
}

impl ParameterLayout {
    fn new(model: &HierarchicalModel) -> Self {
        let mut names = Vec::new();
        names.extend(model.episodes.iter().map(|e| format!("theta[{}]", e.id)));
        names.extend(model.seasons.iter().map(|s| format!("mu[{}]", s.id)));
        names.extend(model.seasons.iter().map(|s| format!("tau[{}]", s.id)));
        names.push("mu0".to_string());
        let sample_sigma_mu = model.hyper.season_mean_scale.is_sampled();
        let sample_tau0 = model.hyper.spread_scale.is_sampled();
        if sample_sigma_mu {
            names.push("sigma_mu".to_string());
        }
        if sample_tau0 {
            names.push("tau0".to_string());
        }
        Self {
            n_episodes: model.episodes.len(),
            n_seasons: model.seasons.len(),
            sample_sigma_mu,
            sample_tau0,
            names,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn theta(&self, episode: usize) -> usize {
        episode
    }

    pub fn season_mean(&self, season: usize) -> usize {
        self.n_episodes + season
    }

    pub fn season_spread(&self, season: usize) -> usize {
        self.n_episodes + self.n_seasons + season
    }

    pub fn global_mean(&self) -> usize {
        self.n_episodes + 2 * self.n_seasons
    }

    pub fn season_mean_scale(&self) -> Option<usize> {
        self.sample_sigma_mu.then(|| self.global_mean() + 1)
    }

    pub fn spread_scale(&self) -> Option<usize> {
        let offset = if self.sample_sigma_mu { 2 } else { 1 };
        self.sample_tau0.then(|| self.global_mean() + offset)
    }

    /// Column of a parameter, `None` for a hyper-scale that is fixed.
    pub fn column(&self, param: ParamRef) -> Option<usize> {
        match param {
            ParamRef::Theta(i) => (i < self.n_episodes).then(|| self.theta(i)),
            ParamRef::SeasonMean(s) => (s < self.n_seasons).then(|| self.season_mean(s)),
            ParamRef::SeasonSpread(s) => (s < self.n_seasons).then(|| self.season_spread(s)),
            ParamRef::GlobalMean => Some(self.global_mean()),
            ParamRef::SeasonMeanScale => self.season_mean_scale(),
            ParamRef::SpreadScale => self.spread_scale(),
        }
    }

    /// Parameter held in `column`.
    pub fn param(&self, column: usize) -> Option<ParamRef> {
        let (e, s) = (self.n_episodes, self.n_seasons);
        if column < e {
            Some(ParamRef::Theta(column))
        } else if column < e + s {
            Some(ParamRef::SeasonMean(column - e))
        } else if column < e + 2 * s {
            Some(ParamRef::SeasonSpread(column - e - s))
        } else if column == self.global_mean() {
            Some(ParamRef::GlobalMean)
        } else if Some(column) == self.season_mean_scale() {
            Some(ParamRef::SeasonMeanScale)
        } else if Some(column) == self.spread_scale() {
            Some(ParamRef::SpreadScale)
        } else {
            None
        }
    }

    /// Flatten a state into a trace row.
    pub fn flatten(&self, state: &ParameterState) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.len());
        row.extend_from_slice(&state.theta);
        row.extend_from_slice(&state.mu);
        row.extend_from_slice(&state.tau);
        row.push(state.mu0);
        if self.sample_sigma_mu {
            row.push(state.sigma_mu);
        }
        if self.sample_tau0 {
            row.push(state.tau0);
        }
        row
    }
}

// =============================================================================
// Model
// =============================================================================

#[derive(Debug, Clone)]
pub struct HierarchicalModel {
    bounds: RatingBounds,
    hyper: Hyperparameters,
    episodes: Vec<EpisodeNode>,
    seasons: Vec<SeasonNode>,
    episode_index: HashMap<String, usize>,
    season_index: HashMap<String, usize>,
}

impl HierarchicalModel {
    /// Bind a validated table to the hierarchy. Episodes are indexed rated
    /// first, then unrated; seasons in order of first appearance.
    pub fn new(
        table: &EpisodeTable,
        bounds: RatingBounds,
        hyper: Hyperparameters,
    ) -> Result<Self, EngineError> {
        bounds.validate()?;
        hyper.validate()?;
        table.validate(&bounds)?;

        let mut seasons: Vec<SeasonNode> = Vec::new();
        let mut season_index: HashMap<String, usize> = HashMap::new();
        for id in table.season_ids() {
            season_index.insert(id.to_string(), seasons.len());
            seasons.push(SeasonNode {
                id: id.to_string(),
                members: Vec::new(),
            });
        }

        let rated = table.rated.iter().map(|ep| {
            let observation = Observation {
                rating: ep.rating,
                votes: ep.votes,
                noise_sd: (hyper.obs_variance / ep.votes as f64).sqrt(),
            };
            (&ep.episode_id, &ep.season_id, Some(observation))
        });
        let unrated = table
            .unrated
            .iter()
            .map(|ep| (&ep.episode_id, &ep.season_id, None));

        let mut episodes = Vec::with_capacity(table.len());
        let mut episode_index = HashMap::with_capacity(table.len());
        for (id, season_id, observation) in rated.chain(unrated) {
            let season = season_index[season_id.as_str()];
            let index = episodes.len();
            seasons[season].members.push(index);
            episode_index.insert(id.clone(), index);
            episodes.push(EpisodeNode {
                id: id.clone(),
                season,
                observation,
            });
        }

        Ok(Self {
            bounds,
            hyper,
            episodes,
            seasons,
            episode_index,
            season_index,
        })
    }

    pub fn bounds(&self) -> RatingBounds {
        self.bounds
    }

    pub fn hyper(&self) -> &Hyperparameters {
        &self.hyper
    }

    pub fn episodes(&self) -> &[EpisodeNode] {
        &self.episodes
    }

    pub fn seasons(&self) -> &[SeasonNode] {
        &self.seasons
    }

    pub fn episode_position(&self, id: &str) -> Option<usize> {
        self.episode_index.get(id).copied()
    }

    pub fn season_position(&self, id: &str) -> Option<usize> {
        self.season_index.get(id).copied()
    }

    pub fn layout(&self) -> ParameterLayout {
        ParameterLayout::new(self)
    }

    /// Starting point at relative position `u ∈ (0, 1)`: every location at
    /// `a + (b − a)·u`, every scale at `reference·exp(2(u − ½))`.
    pub fn dispersed_state(&self, u: f64) -> ParameterState {
        let location = self.bounds.lower + self.bounds.width() * u;
        let stretch = (2.0 * (u - 0.5)).exp();
        let spread = self.hyper.spread_scale.reference_value();
        let sigma_mu = self.hyper.season_mean_scale.reference_value();
        ParameterState {
            theta: vec![location; self.episodes.len()],
            mu: vec![location; self.seasons.len()],
            tau: vec![spread * stretch; self.seasons.len()],
            mu0: location,
            sigma_mu: if self.hyper.season_mean_scale.is_sampled() {
                sigma_mu * stretch
            } else {
                sigma_mu
            },
            tau0: if self.hyper.spread_scale.is_sampled() {
                spread * stretch
            } else {
                spread
            },
        }
    }

    fn tn(&self, center: f64, scale: f64) -> Result<TruncatedNormal, NumericalDegeneracy> {
        TruncatedNormal::new(center, scale, self.bounds.lower, self.bounds.upper)
    }

    fn global_mean_prior(&self) -> Result<TruncatedNormal, NumericalDegeneracy> {
        let prior = self.hyper.global_mean;
        self.tn(prior.mean, prior.variance.sqrt())
    }

    /// ln p(y_i | θ_i); zero for unrated episodes.
    fn log_likelihood(&self, episode: usize, theta: f64) -> Result<f64, NumericalDegeneracy> {
        match self.episodes[episode].observation {
            Some(obs) => Ok(self.tn(theta, obs.noise_sd)?.log_pdf(obs.rating)),
            None => Ok(0.0),
        }
    }

    /// Sum of the θ priors of a season's members under (μ_s, τ_s).
    fn season_members_log_prior(
        &self,
        season: usize,
        mu: f64,
        tau: f64,
        state: &ParameterState,
    ) -> Result<f64, NumericalDegeneracy> {
        let prior = self.tn(mu, tau)?;
        Ok(prior.sum_log_pdf(self.seasons[season].members.iter().map(|&i| state.theta[i])))
    }

    /// Full unnormalized log posterior.
    pub fn log_joint(&self, state: &ParameterState) -> Result<f64, NumericalDegeneracy> {
        let mut total = 0.0;
        for (s, season) in self.seasons.iter().enumerate() {
            total += self.season_members_log_prior(s, state.mu[s], state.tau[s], state)?;
            for &i in &season.members {
                total += self.log_likelihood(i, state.theta[i])?;
            }
        }
        let season_mean_prior = self.tn(state.mu0, state.sigma_mu)?;
        total += season_mean_prior.sum_log_pdf(state.mu.iter().copied());
        total += state
            .tau
            .iter()
            .map(|&t| half_cauchy_log_pdf(t, state.tau0))
            .sum::<f64>();
        total += self.global_mean_prior()?.log_pdf(state.mu0);
        total += self.hyper_scale_log_prior(state);
        Ok(total)
    }

    fn hyper_scale_log_prior(&self, state: &ParameterState) -> f64 {
        let mut total = 0.0;
        if let HyperScale::HalfCauchy { scale } = self.hyper.season_mean_scale {
            total += half_cauchy_log_pdf(state.sigma_mu, scale);
        }
        if let HyperScale::HalfCauchy { scale } = self.hyper.spread_scale {
            total += half_cauchy_log_pdf(state.tau0, scale);
        }
        total
    }

    // -------------------------------------------------------------------------
    // Local conditionals
    // -------------------------------------------------------------------------

    /// Terms mentioning θ_i: its likelihood and its season prior.
    pub fn episode_log_conditional(
        &self,
        episode: usize,
        theta: f64,
        state: &ParameterState,
    ) -> Result<f64, NumericalDegeneracy> {
        let s = self.episodes[episode].season;
        let prior = self.tn(state.mu[s], state.tau[s])?.log_pdf(theta);
        if prior == f64::NEG_INFINITY {
            return Ok(prior);
        }
        Ok(prior + self.log_likelihood(episode, theta)?)
    }

    /// Independence proposal for θ_i: the Gaussian likelihood kernel times the
    /// season prior, truncated to the bounds. For unrated episodes this is the
    /// season prior itself.
    pub fn theta_proposal(
        &self,
        episode: usize,
        state: &ParameterState,
    ) -> Result<TruncatedNormal, NumericalDegeneracy> {
        let node = &self.episodes[episode];
        let (mu, tau) = (state.mu[node.season], state.tau[node.season]);
        match node.observation {
            Some(obs) => {
                let prior_precision = 1.0 / (tau * tau);
                let obs_precision = 1.0 / (obs.noise_sd * obs.noise_sd);
                let variance = 1.0 / (prior_precision + obs_precision);
                let center = variance * (obs.rating * obs_precision + mu * prior_precision);
                self.tn(center, variance.sqrt())
            }
            None => self.tn(mu, tau),
        }
    }

    /// Terms mentioning μ_s: the season's θ priors and μ_s's own prior.
    pub fn season_mean_log_conditional(
        &self,
        season: usize,
        mu: f64,
        state: &ParameterState,
    ) -> Result<f64, NumericalDegeneracy> {
        let hyper = self.tn(state.mu0, state.sigma_mu)?.log_pdf(mu);
        if hyper == f64::NEG_INFINITY {
            return Ok(hyper);
        }
        Ok(hyper + self.season_members_log_prior(season, mu, state.tau[season], state)?)
    }

    /// ∂/∂μ_s of `season_mean_log_conditional`.
    pub fn season_mean_gradient(
        &self,
        season: usize,
        mu: f64,
        state: &ParameterState,
    ) -> Result<f64, NumericalDegeneracy> {
        let prior = self.tn(mu, state.tau[season])?;
        let members: f64 = self.seasons[season]
            .members
            .iter()
            .map(|&i| prior.grad_log_pdf_center(state.theta[i]))
            .sum();
        let sigma = state.sigma_mu;
        Ok(members - (mu - state.mu0) / (sigma * sigma))
    }

    /// Terms mentioning τ_s: the season's θ priors and τ_s's half-Cauchy prior.
    pub fn season_spread_log_conditional(
        &self,
        season: usize,
        tau: f64,
        state: &ParameterState,
    ) -> Result<f64, NumericalDegeneracy> {
        let hyper = half_cauchy_log_pdf(tau, state.tau0);
        if hyper == f64::NEG_INFINITY {
            return Ok(hyper);
        }
        Ok(hyper + self.season_members_log_prior(season, state.mu[season], tau, state)?)
    }

    /// Terms mentioning μ0: every season-mean prior and μ0's own prior.
    pub fn global_mean_log_conditional(
        &self,
        mu0: f64,
        state: &ParameterState,
    ) -> Result<f64, NumericalDegeneracy> {
        let own = self.global_mean_prior()?.log_pdf(mu0);
        if own == f64::NEG_INFINITY {
            return Ok(own);
        }
        let seasons = self.tn(mu0, state.sigma_mu)?;
        Ok(own + seasons.sum_log_pdf(state.mu.iter().copied()))
    }

    /// ∂/∂μ0 of `global_mean_log_conditional`.
    pub fn global_mean_gradient(
        &self,
        mu0: f64,
        state: &ParameterState,
    ) -> Result<f64, NumericalDegeneracy> {
        let seasons = self.tn(mu0, state.sigma_mu)?;
        let from_seasons: f64 = state
            .mu
            .iter()
            .map(|&m| seasons.grad_log_pdf_center(m))
            .sum();
        let prior = self.hyper.global_mean;
        Ok(from_seasons - (mu0 - prior.mean) / prior.variance)
    }

    /// Terms mentioning σ_μ (only meaningful when it is sampled).
    pub fn season_mean_scale_log_conditional(
        &self,
        sigma_mu: f64,
        state: &ParameterState,
    ) -> Result<f64, NumericalDegeneracy> {
        let scale = self.hyper.season_mean_scale.reference_value();
        let own = half_cauchy_log_pdf(sigma_mu, scale);
        if own == f64::NEG_INFINITY {
            return Ok(own);
        }
        let seasons = self.tn(state.mu0, sigma_mu)?;
        Ok(own + seasons.sum_log_pdf(state.mu.iter().copied()))
    }

    /// Terms mentioning τ0 (only meaningful when it is sampled).
    pub fn spread_scale_log_conditional(
        &self,
        tau0: f64,
        state: &ParameterState,
    ) -> Result<f64, NumericalDegeneracy> {
        let scale = self.hyper.spread_scale.reference_value();
        let own = half_cauchy_log_pdf(tau0, scale);
        if own == f64::NEG_INFINITY {
            return Ok(own);
        }
        Ok(own
            + state
                .tau
                .iter()
                .map(|&t| half_cauchy_log_pdf(t, tau0))
                .sum::<f64>())
    }
}
