//! Integration tests for the convergence verdict attached to every fit

use epiq::config::{DiagnosticThresholds, EngineConfig, SamplerConfig};
use epiq::diagnostics::Verdict;
use epiq::engine::fit;
use epiq::table::EpisodeTable;

/// Three seasons of six episodes with a mild within-season trend.
fn series() -> EpisodeTable {
    let base = [7.8, 8.4, 6.9];
    let offsets = [-0.6, -0.3, -0.1, 0.15, 0.35, 0.5];
    let mut table = EpisodeTable::new();
    for (s, &b) in base.iter().enumerate() {
        for (e, &o) in offsets.iter().enumerate() {
            table.push_rated(
                format!("s{}e{}", s + 1, e + 1),
                format!("s{}", s + 1),
                b + o,
                300 + 100 * e as u64,
            );
        }
    }
    table
}

fn config(warmup: usize, retained: usize) -> EngineConfig {
    EngineConfig {
        sampler: SamplerConfig {
            chains: 4,
            warmup,
            retained,
            ..SamplerConfig::default()
        },
        diagnostics: DiagnosticThresholds {
            max_rhat: 1.05,
            min_ess: 100.0,
        },
        ..EngineConfig::default()
    }
}

#[test]
fn test_long_warmup_converges() {
    let fit = fit(&series(), &config(1000, 1500)).unwrap();
    let report = fit.report();

    assert_eq!(report.verdict, Verdict::Converged, "failing: {:?}", report.convergence.failing);
    assert!(report.convergence.max_rhat < 1.05);
    assert!(report.convergence.min_ess_bulk >= 100.0);
    assert!(!report.convergence.stuck_during_retained);
    assert_eq!(report.convergence.draws_per_chain, 1500);

    for chain in &report.chains {
        assert!(!chain.stopped_early);
        assert_eq!(chain.log_density_failures, 0);
        for stats in &chain.blocks {
            let rate = stats.acceptance_rate();
            assert!(rate > 0.05, "{} acceptance {}", stats.block, rate);
            assert_eq!(stats.degenerate, 0, "{} hit degenerate proposals", stats.block);
        }
    }
}

#[test]
fn test_short_stuck_window_forces_not_converged() {
    let mut config = config(0, 300);
    config.sampler.chains = 2;
    config.sampler.stuck_window = 3;
    let fit = fit(&series(), &config).unwrap();
    let report = fit.report();

    let warnings: Vec<_> = report.chains.iter().flat_map(|c| &c.stuck_warnings).collect();
    assert!(!warnings.is_empty());
    for w in &warnings {
        assert!(w.during_retained);
        assert_eq!(w.raised_at_sweep, w.first_stuck_sweep + 2);
        assert!(w.last_stuck_sweep >= w.raised_at_sweep);
    }
    assert!(report.convergence.stuck_during_retained);
    assert_eq!(report.verdict, Verdict::NotConverged);
}

#[test]
fn test_no_warmup_short_run_not_converged() {
    let fit = fit(&series(), &config(0, 200)).unwrap();
    let report = fit.report();

    assert_eq!(report.verdict, Verdict::NotConverged);
    assert!(report.convergence.max_rhat > 1.05);
    assert!(!report.convergence.failing.is_empty());
    // A verdict is still a full report
    assert_eq!(report.episodes.len(), 18);
    assert_eq!(report.seasons.len(), 3);
}

#[test]
fn test_longer_warmup_lowers_rhat() {
    let cold = fit(&series(), &config(0, 200)).unwrap();
    let warm = fit(&series(), &config(1000, 200)).unwrap();
    assert!(warm.report().convergence.max_rhat < cold.report().convergence.max_rhat);
}

#[test]
fn test_same_seed_same_report() {
    let a = fit(&series(), &config(100, 100)).unwrap();
    let b = fit(&series(), &config(100, 100)).unwrap();
    assert_eq!(a.verdict(), b.verdict());
    for (x, y) in a.chains().iter().zip(b.chains()) {
        assert_eq!(x.trace, y.trace);
    }

    let mut other = config(100, 100);
    other.sampler.seed = 7;
    let c = fit(&series(), &other).unwrap();
    assert_ne!(a.chains()[0].trace, c.chains()[0].trace);
}
