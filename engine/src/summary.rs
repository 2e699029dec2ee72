//! Posterior summaries pooled over chains.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::config::{PointEstimate, SummaryConfig};
use crate::diagnostics::{linear_quantile, ConvergenceReport, ParamConvergence, Verdict};
use crate::model::{HierarchicalModel, ParamRef};
use crate::sampler::{ChainOutput, ChainReport};

/// Summary statistics of one scalar parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSummary {
    pub name: String,
    pub mean: f64,
    pub median: f64,
    pub sd: f64,
    /// Equal-tailed credible interval at the configured level
    pub lower: f64,
    pub upper: f64,
    /// Mean or median, as configured
    pub estimate: f64,
    pub rhat: f64,
    pub ess_bulk: f64,
    pub ess_tail: f64,
    pub passed: bool,
}

impl ParamSummary {
    pub fn from_draws(
        name: &str,
        draws: &[f64],
        config: &SummaryConfig,
        convergence: Option<&ParamConvergence>,
    ) -> Self {
        let n = draws.len();
        let mean = if n == 0 {
            f64::NAN
        } else {
            draws.iter().sum::<f64>() / n as f64
        };
        let sd = if n < 2 {
            f64::NAN
        } else {
            (draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        };

        let mut sorted = draws.to_vec();
        sorted.sort_by(f64::total_cmp);
        let tail = 0.5 * (1.0 - config.interval_level);
        let median = linear_quantile(&sorted, 0.5);

        let estimate = match config.point_estimate {
            PointEstimate::Mean => mean,
            PointEstimate::Median => median,
        };

        Self {
            name: name.to_string(),
            mean,
            median,
            sd,
            lower: linear_quantile(&sorted, tail),
            upper: linear_quantile(&sorted, 1.0 - tail),
            estimate,
            rhat: convergence.map_or(f64::NAN, |c| c.rhat),
            ess_bulk: convergence.map_or(f64::NAN, |c| c.ess_bulk),
            ess_tail: convergence.map_or(f64::NAN, |c| c.ess_tail),
            passed: convergence.is_some_and(|c| c.passed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode_id: String,
    pub season_id: String,
    /// `None` for unrated episodes
    pub observed_rating: Option<f64>,
    pub votes: Option<u64>,
    pub quality: ParamSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonSummary {
    pub season_id: String,
    pub n_episodes: usize,
    pub mean: ParamSummary,
    pub spread: ParamSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSummary {
    pub mean: ParamSummary,
    /// Present when σ_μ is sampled
    pub season_mean_scale: Option<ParamSummary>,
    /// Present when τ0 is sampled
    pub spread_scale: Option<ParamSummary>,
}

/// Output table of a fit, with its convergence verdict embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorReport {
    pub interval_level: f64,
    pub point_estimate: PointEstimate,
    pub verdict: Verdict,
    pub episodes: Vec<EpisodeSummary>,
    pub seasons: Vec<SeasonSummary>,
    pub global: GlobalSummary,
    pub convergence: ConvergenceReport,
    pub chains: Vec<ChainReport>,
}

impl PosteriorReport {
    pub fn episode(&self, episode_id: &str) -> Option<&EpisodeSummary> {
        self.episodes.iter().find(|e| e.episode_id == episode_id)
    }

    pub fn season(&self, season_id: &str) -> Option<&SeasonSummary> {
        self.seasons.iter().find(|s| s.season_id == season_id)
    }

    /// Every episode row of a season, in table order.
    pub fn season_episodes(&self, season_id: &str) -> Vec<&EpisodeSummary> {
        self.episodes
            .iter()
            .filter(|e| e.season_id == season_id)
            .collect()
    }

    pub fn is_converged(&self) -> bool {
        self.verdict == Verdict::Converged
    }

    /// Plain-text table of all rows.
    pub fn to_table_string(&self) -> String {
        let pct = (self.interval_level * 100.0).round();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<24} {:>8} {:>8} {:>8} {:>8} {:>8} {:>7} {:>8}  {}",
            "parameter",
            "observed",
            "estimate",
            "sd",
            format!("{}%-lo", pct),
            format!("{}%-hi", pct),
            "rhat",
            "ess",
            "ok"
        );
        let mut row = |label: &str, observed: Option<f64>, p: &ParamSummary| {
            let observed = observed.map_or_else(|| "-".to_string(), |y| format!("{:.2}", y));
            let _ = writeln!(
                out,
                "{:<24} {:>8} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>7.3} {:>8.0}  {}",
                label,
                observed,
                p.estimate,
                p.sd,
                p.lower,
                p.upper,
                p.rhat,
                p.ess_bulk,
                if p.passed { "✓" } else { "✗" }
            );
        };
        for e in &self.episodes {
            row(&e.quality.name, e.observed_rating, &e.quality);
        }
        for s in &self.seasons {
            row(&s.mean.name, None, &s.mean);
            row(&s.spread.name, None, &s.spread);
        }
        row(&self.global.mean.name, None, &self.global.mean);
        if let Some(p) = &self.global.season_mean_scale {
            row(&p.name, None, p);
        }
        if let Some(p) = &self.global.spread_scale {
            row(&p.name, None, p);
        }
        let _ = writeln!(
            out,
            "verdict: {:?} (max rhat {:.3}, min bulk ess {:.0})",
            self.verdict, self.convergence.max_rhat, self.convergence.min_ess_bulk
        );
        out
    }
}

/// Retained draws of one column pooled over all chains.
pub fn pooled_column(chains: &[ChainOutput], column: usize) -> Vec<f64> {
    chains
        .iter()
        .flat_map(|c| c.trace.draws().iter().map(move |row| row[column]))
        .collect()
}

/// Build the output table from the retained draws of every chain.
pub fn build_report(
    model: &HierarchicalModel,
    chains: &[ChainOutput],
    convergence: ConvergenceReport,
    config: &SummaryConfig,
) -> PosteriorReport {
    let layout = model.layout();
    let summarize = |param: ParamRef| -> Option<ParamSummary> {
        let column = layout.column(param)?;
        let name = &layout.names()[column];
        let draws = pooled_column(chains, column);
        Some(ParamSummary::from_draws(
            name,
            &draws,
            config,
            convergence.params.get(column),
        ))
    };
    let required = |param: ParamRef| -> ParamSummary {
        // Every episode, season and μ0 always owns a column
        summarize(param).unwrap_or_else(|| ParamSummary::from_draws("", &[], config, None))
    };

    let episodes = model
        .episodes()
        .iter()
        .enumerate()
        .map(|(i, node)| EpisodeSummary {
            episode_id: node.id.clone(),
            season_id: model.seasons()[node.season].id.clone(),
            observed_rating: node.observation.map(|o| o.rating),
            votes: node.observation.map(|o| o.votes),
            quality: required(ParamRef::Theta(i)),
        })
        .collect();

    let seasons = model
        .seasons()
        .iter()
        .enumerate()
        .map(|(s, node)| SeasonSummary {
            season_id: node.id.clone(),
            n_episodes: node.members.len(),
            mean: required(ParamRef::SeasonMean(s)),
            spread: required(ParamRef::SeasonSpread(s)),
        })
        .collect();

    let global = GlobalSummary {
        mean: required(ParamRef::GlobalMean),
        season_mean_scale: summarize(ParamRef::SeasonMeanScale),
        spread_scale: summarize(ParamRef::SpreadScale),
    };

    PosteriorReport {
        interval_level: config.interval_level,
        point_estimate: config.point_estimate,
        verdict: convergence.verdict,
        episodes,
        seasons,
        global,
        chains: chains.iter().map(|c| c.report.clone()).collect(),
        convergence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_statistics() {
        let draws: Vec<f64> = (1..=101).map(|i| i as f64).collect();
        let config = SummaryConfig::default();
        let s = ParamSummary::from_draws("x", &draws, &config, None);
        assert!((s.mean - 51.0).abs() < 1e-12);
        assert!((s.median - 51.0).abs() < 1e-12);
        // 5% and 95% of 1..=101 with linear interpolation
        assert!((s.lower - 6.0).abs() < 1e-12);
        assert!((s.upper - 96.0).abs() < 1e-12);
        assert!((s.sd - (858.5f64).sqrt()).abs() < 1e-9);
        assert_eq!(s.estimate, s.mean);
        assert!(!s.passed);
        assert!(s.rhat.is_nan());
    }

    #[test]
    fn test_median_point_estimate_and_interval_level() {
        let draws = vec![1.0, 2.0, 3.0, 10.0];
        let config = SummaryConfig {
            interval_level: 0.5,
            point_estimate: PointEstimate::Median,
        };
        let s = ParamSummary::from_draws("x", &draws, &config, None);
        assert_eq!(s.estimate, 2.5);
        assert!((s.lower - 1.75).abs() < 1e-12);
        assert!((s.upper - 4.75).abs() < 1e-12);
    }

    #[test]
    fn test_convergence_fields_copied() {
        let conv = ParamConvergence {
            name: "x".to_string(),
            rhat: 1.002,
            ess_bulk: 850.0,
            ess_tail: 700.0,
            passed: true,
        };
        let s = ParamSummary::from_draws("x", &[1.0, 2.0], &SummaryConfig::default(), Some(&conv));
        assert_eq!(s.rhat, 1.002);
        assert_eq!(s.ess_tail, 700.0);
        assert!(s.passed);
    }
}
