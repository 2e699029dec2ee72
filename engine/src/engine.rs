//! Fit orchestration: validate, bind, sample, diagnose, summarize.

use std::time::Duration;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::diagnostics::{assess_convergence, Verdict};
use crate::error::EngineError;
use crate::model::HierarchicalModel;
use crate::sampler::{run_chains, ChainOutput, RunBudget};
use crate::summary::{build_report, pooled_column, EpisodeSummary, PosteriorReport};
use crate::table::EpisodeTable;

/// Posterior of one episode: its summary row and every pooled draw.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeQuality {
    pub summary: EpisodeSummary,
    pub samples: Vec<f64>,
}

/// A completed fit: the bound model, the raw chains and the report.
#[derive(Debug, Clone)]
pub struct Fit {
    model: HierarchicalModel,
    chains: Vec<ChainOutput>,
    report: PosteriorReport,
}

impl Fit {
    pub fn report(&self) -> &PosteriorReport {
        &self.report
    }

    pub fn into_report(self) -> PosteriorReport {
        self.report
    }

    pub fn model(&self) -> &HierarchicalModel {
        &self.model
    }

    pub fn chains(&self) -> &[ChainOutput] {
        &self.chains
    }

    pub fn verdict(&self) -> Verdict {
        self.report.verdict
    }

    /// Pooled retained draws of a parameter by trace name, e.g. `mu[s1]`.
    pub fn param_samples(&self, name: &str) -> Option<Vec<f64>> {
        let layout = self.model.layout();
        let column = layout.names().iter().position(|n| n == name)?;
        Some(pooled_column(&self.chains, column))
    }

    /// Pooled retained draws of θ for one episode.
    pub fn episode_samples(&self, episode_id: &str) -> Option<Vec<f64>> {
        let index = self.model.episode_position(episode_id)?;
        let column = self.model.layout().theta(index);
        Some(pooled_column(&self.chains, column))
    }

    /// Samples and summary of one episode's latent quality.
    pub fn episode_quality(&self, episode_id: &str) -> Option<EpisodeQuality> {
        Some(EpisodeQuality {
            summary: self.report.episode(episode_id)?.clone(),
            samples: self.episode_samples(episode_id)?,
        })
    }
}

/// Fit the hierarchy to `table`, honoring the configured wall-clock limit.
pub fn fit(table: &EpisodeTable, config: &EngineConfig) -> Result<Fit, EngineError> {
    fit_with_budget(table, config, RunBudget::unlimited())
}

/// Fit with an external stop budget (e.g. a shared cancel flag). The
/// configured wall-clock limit, if any, still applies.
pub fn fit_with_budget(
    table: &EpisodeTable,
    config: &EngineConfig,
    budget: RunBudget,
) -> Result<Fit, EngineError> {
    config.validate()?;
    let model = HierarchicalModel::new(table, config.bounds, config.hyper)?;
    info!(
        episodes = model.episodes().len(),
        seasons = model.seasons().len(),
        "model bound"
    );

    let budget = match config
        .sampler
        .max_wall_clock_secs
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    {
        Some(limit) => budget.with_wall_clock(limit),
        None => budget,
    };

    let mut chains = run_chains(&model, &config.sampler, &budget);

    // Diagnostics need equally long chains
    let retained = chains.iter().map(|c| c.trace.len()).min().unwrap_or(0);
    if retained == 0 {
        let sweeps_completed = chains
            .iter()
            .map(|c| c.report.warmup_sweeps + c.report.retained_sweeps)
            .max()
            .unwrap_or(0);
        return Err(EngineError::NoRetainedDraws { sweeps_completed });
    }
    if chains.iter().any(|c| c.trace.len() != retained) {
        warn!(retained, "chains stopped unevenly; truncating to the shortest");
        for chain in &mut chains {
            chain.trace.truncate(retained);
        }
    }

    let stuck = chains.iter().any(|c| c.report.stuck_during_retained());
    let layout = model.layout();
    let draws: Vec<&[Vec<f64>]> = chains.iter().map(|c| c.trace.draws()).collect();
    let convergence = assess_convergence(layout.names(), &draws, config.diagnostics, stuck)?;

    match convergence.verdict {
        Verdict::Converged => info!(
            max_rhat = convergence.max_rhat,
            min_ess_bulk = convergence.min_ess_bulk,
            "chains converged"
        ),
        Verdict::NotConverged => warn!(
            max_rhat = convergence.max_rhat,
            min_ess_bulk = convergence.min_ess_bulk,
            failing = convergence.failing.len(),
            stuck,
            "chains have not converged"
        ),
    }

    let report = build_report(&model, &chains, convergence, &config.summary);
    Ok(Fit {
        model,
        chains,
        report,
    })
}
