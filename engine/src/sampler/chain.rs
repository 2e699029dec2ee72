//! One Metropolis-within-Gibbs chain.
//!
//! A sweep visits the blocks in fixed order: every θ_i, every μ_s, every
//! τ_s, μ0, then σ_μ and τ0 when they are sampled. Each chain owns its rng,
//! state, step adapters and trace.

use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, trace, warn};

use super::adapt::StepAdapter;
use super::budget::RunBudget;
use super::proposal::{independence_step, location_step, log_scale_step, Outcome};
use super::trace::Trace;
use crate::config::SamplerConfig;
use crate::model::{HierarchicalModel, ParameterState};

// =============================================================================
// Reports
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Block {
    EpisodeQuality,
    SeasonMean,
    SeasonSpread,
    GlobalMean,
    SeasonMeanScale,
    SpreadScale,
}

impl Block {
    pub const ALL: [Block; 6] = [
        Block::EpisodeQuality,
        Block::SeasonMean,
        Block::SeasonSpread,
        Block::GlobalMean,
        Block::SeasonMeanScale,
        Block::SpreadScale,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Block::EpisodeQuality => "theta",
            Block::SeasonMean => "mu",
            Block::SeasonSpread => "tau",
            Block::GlobalMean => "mu0",
            Block::SeasonMeanScale => "sigma_mu",
            Block::SpreadScale => "tau0",
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Proposal counts of one block over the whole chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockStats {
    pub block: Block,
    pub proposed: u64,
    pub accepted: u64,
    /// Rejected before evaluation for leaving the support
    pub out_of_bounds: u64,
    /// Rejected because a density could not be evaluated
    pub degenerate: u64,
    /// Final mean step size of the block's scalars (θ uses no step size)
    pub mean_step: Option<f64>,
}

impl BlockStats {
    fn new(block: Block) -> Self {
        Self {
            block,
            proposed: 0,
            accepted: 0,
            out_of_bounds: 0,
            degenerate: 0,
            mean_step: None,
        }
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.proposed == 0 {
            return f64::NAN;
        }
        self.accepted as f64 / self.proposed as f64
    }
}

/// A block rejected every proposal for `stuck_window` consecutive sweeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StuckChainWarning {
    pub chain: usize,
    pub block: Block,
    /// First sweep of the all-rejected run
    pub first_stuck_sweep: usize,
    pub raised_at_sweep: usize,
    /// Last sweep of the run seen so far
    pub last_stuck_sweep: usize,
    /// The run reached the retained sweeps
    pub during_retained: bool,
}

/// Seed and ChaCha20 stream a chain was started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSeed {
    pub seed: u64,
    pub stream: u64,
}

impl ChainSeed {
    pub fn rng(&self) -> ChaCha20Rng {
        use rand::SeedableRng;
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        rng.set_stream(self.stream);
        rng
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainReport {
    pub chain: usize,
    pub seed: ChainSeed,
    /// Relative start position in (0, 1)
    pub start_position: f64,
    pub warmup_sweeps: usize,
    pub retained_sweeps: usize,
    pub stopped_early: bool,
    pub blocks: Vec<BlockStats>,
    pub stuck_warnings: Vec<StuckChainWarning>,
    /// Retained sweeps whose log joint was not representable; their trace
    /// rows carry NaN as log density
    pub log_density_failures: usize,
}

impl ChainReport {
    pub fn block(&self, block: Block) -> Option<&BlockStats> {
        self.blocks.iter().find(|b| b.block == block)
    }

    pub fn stuck_during_retained(&self) -> bool {
        self.stuck_warnings.iter().any(|w| w.during_retained)
    }
}

#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub report: ChainReport,
    pub trace: Trace,
}

// =============================================================================
// Stuck detection
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct StuckTracker {
    run: usize,
    run_start: usize,
    open_warning: Option<usize>,
}

// =============================================================================
// Runner
// =============================================================================

pub(crate) struct ChainRunner<'a> {
    model: &'a HierarchicalModel,
    config: &'a SamplerConfig,
    chain: usize,
    seed: ChainSeed,
    start_position: f64,
    rng: ChaCha20Rng,
    state: ParameterState,
    adapting: bool,
    season_mean_steps: Vec<StepAdapter>,
    season_spread_steps: Vec<StepAdapter>,
    global_mean_step: StepAdapter,
    season_mean_scale_step: StepAdapter,
    spread_scale_step: StepAdapter,
    stats: [BlockStats; 6],
    /// (proposed, accepted) within the current sweep
    sweep_counts: [(u32, u32); 6],
    stuck: [StuckTracker; 6],
    warnings: Vec<StuckChainWarning>,
    log_density_failures: usize,
}

impl<'a> ChainRunner<'a> {
    pub(crate) fn new(
        model: &'a HierarchicalModel,
        config: &'a SamplerConfig,
        chain: usize,
        seed: ChainSeed,
        start_position: f64,
    ) -> Self {
        let width = model.bounds().width();
        let n_seasons = model.seasons().len();
        Self {
            model,
            config,
            chain,
            seed,
            start_position,
            rng: seed.rng(),
            state: model.dispersed_state(start_position),
            adapting: true,
            season_mean_steps: vec![StepAdapter::for_location(width); n_seasons],
            season_spread_steps: vec![StepAdapter::for_log_scale(); n_seasons],
            global_mean_step: StepAdapter::for_location(width),
            season_mean_scale_step: StepAdapter::for_log_scale(),
            spread_scale_step: StepAdapter::for_log_scale(),
            stats: Block::ALL.map(BlockStats::new),
            sweep_counts: [(0, 0); 6],
            stuck: [StuckTracker::default(); 6],
            warnings: Vec::new(),
            log_density_failures: 0,
        }
    }

    /// Run warm-up then retained sweeps, polling `budget` before each sweep.
    pub(crate) fn run(mut self, budget: &RunBudget) -> ChainOutput {
        let span = tracing::info_span!("chain", chain = self.chain);
        let _enter = span.enter();

        let warmup = self.config.warmup;
        let total = warmup + self.config.retained;
        let layout = self.model.layout();
        let mut trace = Trace::with_capacity(layout.len(), self.config.retained);
        let mut stopped_early = false;
        let mut completed = 0;

        debug!(
            seed = self.seed.seed,
            stream = self.seed.stream,
            start = self.start_position,
            "starting chain"
        );

        for sweep in 0..total {
            if budget.should_stop() {
                stopped_early = true;
                warn!(sweep, "budget exhausted, stopping chain early");
                break;
            }
            self.adapting = sweep < warmup;
            self.sweep(sweep);
            completed += 1;

            if self.adapting {
                if (sweep + 1) % self.config.adapt_window == 0 {
                    self.end_adapt_window(sweep);
                }
                if sweep + 1 == warmup {
                    info!(
                        global_mean_step = self.global_mean_step.step(),
                        "warm-up complete, step sizes frozen"
                    );
                }
            } else {
                let log_density = self.retained_log_density(sweep);
                trace.push(layout.flatten(&self.state), log_density);
            }
        }

        let report = self.into_report(completed.min(warmup), trace.len(), stopped_early);
        debug!(
            retained = report.retained_sweeps,
            stuck_warnings = report.stuck_warnings.len(),
            log_density_failures = report.log_density_failures,
            "chain finished"
        );
        ChainOutput { report, trace }
    }

    /// Log joint of the current state, or NaN (counted) when degenerate.
    fn retained_log_density(&mut self, sweep: usize) -> f64 {
        match self.model.log_joint(&self.state) {
            Ok(log_density) => log_density,
            Err(error) => {
                self.log_density_failures += 1;
                warn!(sweep, %error, "log density not representable, recorded as NaN");
                f64::NAN
            }
        }
    }

    fn sweep(&mut self, sweep: usize) {
        self.sweep_counts = [(0, 0); 6];
        self.update_episodes();
        self.update_season_means();
        self.update_season_spreads();
        self.update_global_mean();
        if self.model.hyper().season_mean_scale.is_sampled() {
            self.update_season_mean_scale();
        }
        if self.model.hyper().spread_scale.is_sampled() {
            self.update_spread_scale();
        }
        self.track_stuck_blocks(sweep);
    }

    fn record(&mut self, block: Block, outcome: Outcome) {
        let stats = &mut self.stats[block.index()];
        let counts = &mut self.sweep_counts[block.index()];
        stats.proposed += 1;
        counts.0 += 1;
        match outcome {
            Outcome::Accepted(_) => {
                stats.accepted += 1;
                counts.1 += 1;
            }
            Outcome::Rejected => {}
            Outcome::OutOfBounds => stats.out_of_bounds += 1,
            Outcome::Degenerate => {
                stats.degenerate += 1;
                trace!(block = %block, "proposal rejected: numerical degeneracy");
            }
        }
    }

    fn update_episodes(&mut self) {
        let model = self.model;
        for i in 0..model.episodes().len() {
            let current = self.state.theta[i];
            let state = &self.state;
            let outcome = match model.theta_proposal(i, state) {
                Ok(proposal) => independence_step(current, &proposal, &mut self.rng, |x| {
                    model.episode_log_conditional(i, x, state)
                }),
                Err(_) => Outcome::Degenerate,
            };
            self.record(Block::EpisodeQuality, outcome);
            if let Outcome::Accepted(x) = outcome {
                self.state.theta[i] = x;
            }
        }
    }

    fn update_season_means(&mut self) {
        let model = self.model;
        let bounds = model.bounds();
        for s in 0..model.seasons().len() {
            let current = self.state.mu[s];
            let step = self.season_mean_steps[s].step();
            let state = &self.state;
            let outcome = location_step(
                current,
                step,
                self.config.location_proposal,
                &bounds,
                &mut self.rng,
                |x| model.season_mean_log_conditional(s, x, state),
                |x| model.season_mean_gradient(s, x, state),
            );
            self.record(Block::SeasonMean, outcome);
            if self.adapting {
                self.season_mean_steps[s].record(outcome.is_accepted());
            }
            if let Outcome::Accepted(x) = outcome {
                self.state.mu[s] = x;
            }
        }
    }

    fn update_season_spreads(&mut self) {
        let model = self.model;
        for s in 0..model.seasons().len() {
            let current = self.state.tau[s];
            let step = self.season_spread_steps[s].step();
            let state = &self.state;
            let outcome = log_scale_step(current, step, &mut self.rng, |t| {
                model.season_spread_log_conditional(s, t, state)
            });
            self.record(Block::SeasonSpread, outcome);
            if self.adapting {
                self.season_spread_steps[s].record(outcome.is_accepted());
            }
            if let Outcome::Accepted(t) = outcome {
                self.state.tau[s] = t;
            }
        }
    }

    fn update_global_mean(&mut self) {
        let model = self.model;
        let bounds = model.bounds();
        let state = &self.state;
        let outcome = location_step(
            state.mu0,
            self.global_mean_step.step(),
            self.config.location_proposal,
            &bounds,
            &mut self.rng,
            |x| model.global_mean_log_conditional(x, state),
            |x| model.global_mean_gradient(x, state),
        );
        self.record(Block::GlobalMean, outcome);
        if self.adapting {
            self.global_mean_step.record(outcome.is_accepted());
        }
        if let Outcome::Accepted(x) = outcome {
            self.state.mu0 = x;
        }
    }

    fn update_season_mean_scale(&mut self) {
        let model = self.model;
        let state = &self.state;
        let outcome = log_scale_step(
            state.sigma_mu,
            self.season_mean_scale_step.step(),
            &mut self.rng,
            |v| model.season_mean_scale_log_conditional(v, state),
        );
        self.record(Block::SeasonMeanScale, outcome);
        if self.adapting {
            self.season_mean_scale_step.record(outcome.is_accepted());
        }
        if let Outcome::Accepted(v) = outcome {
            self.state.sigma_mu = v;
        }
    }

    fn update_spread_scale(&mut self) {
        let model = self.model;
        let state = &self.state;
        let outcome = log_scale_step(
            state.tau0,
            self.spread_scale_step.step(),
            &mut self.rng,
            |v| model.spread_scale_log_conditional(v, state),
        );
        self.record(Block::SpreadScale, outcome);
        if self.adapting {
            self.spread_scale_step.record(outcome.is_accepted());
        }
        if let Outcome::Accepted(v) = outcome {
            self.state.tau0 = v;
        }
    }

    fn end_adapt_window(&mut self, sweep: usize) {
        let band = self.config.acceptance_band;
        let adapters = self
            .season_mean_steps
            .iter_mut()
            .chain(self.season_spread_steps.iter_mut())
            .chain([
                &mut self.global_mean_step,
                &mut self.season_mean_scale_step,
                &mut self.spread_scale_step,
            ]);
        let mut windows = 0;
        for adapter in adapters {
            if adapter.end_window(&band).is_some() {
                windows += 1;
            }
        }
        trace!(sweep, windows, "adaptation window closed");
    }

    fn track_stuck_blocks(&mut self, sweep: usize) {
        let warmup = self.config.warmup;
        for block in Block::ALL {
            let (proposed, accepted) = self.sweep_counts[block.index()];
            if proposed == 0 {
                continue;
            }
            let tracker = &mut self.stuck[block.index()];
            if accepted > 0 {
                *tracker = StuckTracker::default();
                continue;
            }

            if tracker.run == 0 {
                tracker.run_start = sweep;
            }
            tracker.run += 1;

            match tracker.open_warning {
                Some(idx) => {
                    let warning = &mut self.warnings[idx];
                    warning.last_stuck_sweep = sweep;
                    warning.during_retained |= sweep >= warmup;
                }
                None if tracker.run >= self.config.stuck_window => {
                    warn!(
                        block = %block,
                        since = tracker.run_start,
                        sweep,
                        "block rejected every proposal for {} sweeps",
                        tracker.run
                    );
                    tracker.open_warning = Some(self.warnings.len());
                    self.warnings.push(StuckChainWarning {
                        chain: self.chain,
                        block,
                        first_stuck_sweep: tracker.run_start,
                        raised_at_sweep: sweep,
                        last_stuck_sweep: sweep,
                        during_retained: sweep >= warmup,
                    });
                }
                None => {}
            }
        }
    }

    fn into_report(
        self,
        warmup_sweeps: usize,
        retained_sweeps: usize,
        stopped_early: bool,
    ) -> ChainReport {
        let mean = |adapters: &[StepAdapter]| -> Option<f64> {
            if adapters.is_empty() {
                return None;
            }
            Some(adapters.iter().map(StepAdapter::step).sum::<f64>() / adapters.len() as f64)
        };
        let hyper = self.model.hyper();

        let mut stats = self.stats;
        stats[Block::SeasonMean.index()].mean_step = mean(&self.season_mean_steps);
        stats[Block::SeasonSpread.index()].mean_step = mean(&self.season_spread_steps);
        stats[Block::GlobalMean.index()].mean_step = Some(self.global_mean_step.step());
        stats[Block::SeasonMeanScale.index()].mean_step = hyper
            .season_mean_scale
            .is_sampled()
            .then(|| self.season_mean_scale_step.step());
        stats[Block::SpreadScale.index()].mean_step = hyper
            .spread_scale
            .is_sampled()
            .then(|| self.spread_scale_step.step());

        let blocks = stats.into_iter().filter(|b| b.proposed > 0).collect();

        ChainReport {
            chain: self.chain,
            seed: self.seed,
            start_position: self.start_position,
            warmup_sweeps,
            retained_sweeps,
            stopped_early,
            blocks,
            stuck_warnings: self.warnings,
            log_density_failures: self.log_density_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Hyperparameters, RatingBounds};
    use crate::table::EpisodeTable;

    fn model() -> HierarchicalModel {
        let mut table = EpisodeTable::new();
        table
            .push_rated("a1", "A", 8.0, 200)
            .push_rated("a2", "A", 7.4, 90)
            .push_rated("b1", "B", 6.1, 40);
        HierarchicalModel::new(&table, RatingBounds::default(), Hyperparameters::default())
            .unwrap()
    }

    fn runner<'a>(model: &'a HierarchicalModel, config: &'a SamplerConfig) -> ChainRunner<'a> {
        ChainRunner::new(model, config, 0, ChainSeed { seed: 7, stream: 1 }, 0.5)
    }

    #[test]
    fn test_degenerate_log_density_is_counted() {
        let model = model();
        let config = SamplerConfig::default();
        let mut chain = runner(&model, &config);
        assert!(chain.retained_log_density(0).is_finite());

        chain.state.tau[0] = 0.0;
        assert!(chain.retained_log_density(1).is_nan());
        let report = chain.into_report(0, 2, false);
        assert_eq!(report.log_density_failures, 1);
    }

    #[test]
    fn test_degenerate_outcomes_reach_block_stats() {
        let model = model();
        let config = SamplerConfig::default();
        let mut chain = runner(&model, &config);
        chain.record(Block::GlobalMean, Outcome::Degenerate);
        chain.record(Block::GlobalMean, Outcome::Accepted(7.0));
        let report = chain.into_report(1, 0, false);
        let stats = report.block(Block::GlobalMean).unwrap();
        assert_eq!(stats.proposed, 2);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.degenerate, 1);
    }

    #[test]
    fn test_stuck_warning_raised_once_per_run() {
        let model = model();
        let config = SamplerConfig {
            warmup: 5,
            stuck_window: 3,
            ..SamplerConfig::default()
        };
        let mut chain = runner(&model, &config);
        fn rejected_sweep(chain: &mut ChainRunner<'_>, sweep: usize) {
            chain.sweep_counts = [(0, 0); 6];
            chain.sweep_counts[Block::GlobalMean.index()] = (1, 0);
            chain.track_stuck_blocks(sweep);
        }

        for sweep in 0..3 {
            rejected_sweep(&mut chain, sweep);
        }
        assert_eq!(chain.warnings.len(), 1);
        assert_eq!(chain.warnings[0].raised_at_sweep, 2);
        assert!(!chain.warnings[0].during_retained);

        for sweep in 3..6 {
            rejected_sweep(&mut chain, sweep);
        }
        assert_eq!(chain.warnings.len(), 1);
        assert_eq!(chain.warnings[0].first_stuck_sweep, 0);
        assert_eq!(chain.warnings[0].last_stuck_sweep, 5);
        assert!(chain.warnings[0].during_retained);

        chain.sweep_counts[Block::GlobalMean.index()] = (1, 1);
        chain.track_stuck_blocks(6);
        for sweep in 7..10 {
            rejected_sweep(&mut chain, sweep);
        }
        let report = chain.into_report(5, 5, false);
        assert_eq!(report.stuck_warnings.len(), 2);
        assert_eq!(report.stuck_warnings[1].first_stuck_sweep, 7);
        assert!(report.stuck_during_retained());
    }
}
