//! Integration tests for the posterior behaviour of the hierarchy
//!
//! Tests cover:
//! - Every sampled value respecting its support
//! - Large vote counts pinning quality to the observed rating
//! - Small vote counts pulling quality onto the season mean
//! - Partial pooling across two seasons of different evidence

use epiq::config::{EngineConfig, GlobalMeanPrior, HyperScale, SamplerConfig};
use epiq::engine::{fit, Fit};
use epiq::table::EpisodeTable;

fn sampler(chains: usize, warmup: usize, retained: usize) -> SamplerConfig {
    SamplerConfig {
        chains,
        warmup,
        retained,
        ..SamplerConfig::default()
    }
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn posterior_mean(fit: &Fit, name: &str) -> f64 {
    mean(&fit.param_samples(name).unwrap())
}

// =============================================================================
// SUPPORT
// =============================================================================

#[test]
fn test_every_draw_within_support() {
    let mut table = EpisodeTable::new();
    table
        .push_rated("a1", "a", 1.2, 3)
        .push_rated("a2", "a", 9.9, 2)
        .push_rated("b1", "b", 5.0, 1)
        .push_unrated("b2", "b")
        .push_unrated("c1", "c");

    let config = EngineConfig {
        hyper: epiq::config::Hyperparameters {
            season_mean_scale: HyperScale::HalfCauchy { scale: 1.0 },
            spread_scale: HyperScale::HalfCauchy { scale: 1.0 },
            ..Default::default()
        },
        sampler: sampler(3, 200, 300),
        ..EngineConfig::default()
    };
    let fit = fit(&table, &config).unwrap();
    let layout = fit.model().layout();
    let bounds = config.bounds;

    for chain in fit.chains() {
        assert_eq!(chain.trace.len(), 300);
        for row in chain.trace.draws() {
            for (name, &value) in layout.names().iter().zip(row) {
                assert!(value.is_finite(), "{} = {}", name, value);
                if name.starts_with("theta") || name.starts_with("mu") {
                    assert!(
                        value >= bounds.lower && value <= bounds.upper,
                        "{} = {} outside bounds",
                        name,
                        value
                    );
                } else {
                    assert!(value > 0.0, "{} = {} not positive", name, value);
                }
            }
        }
    }
}

// =============================================================================
// VOTE-COUNT LIMITS
// =============================================================================

#[test]
fn test_many_votes_pin_quality_to_rating() {
    let ratings = [2.0, 9.0, 5.0, 7.5];
    let mut table = EpisodeTable::new();
    for (i, &y) in ratings.iter().enumerate() {
        table.push_rated(format!("e{}", i + 1), "s1", y, 1_000_000);
    }
    let config = EngineConfig {
        sampler: sampler(2, 300, 400),
        ..EngineConfig::default()
    };
    let fit = fit(&table, &config).unwrap();

    for (i, &y) in ratings.iter().enumerate() {
        let theta = posterior_mean(&fit, &format!("theta[e{}]", i + 1));
        assert!(
            (theta - y).abs() < 0.01,
            "episode {}: posterior mean {} vs rating {}",
            i + 1,
            theta,
            y
        );
    }
}

#[test]
fn test_few_votes_collapse_quality_onto_season_mean() {
    let mut table = EpisodeTable::new();
    table
        .push_rated("e1", "s1", 9.5, 1)
        .push_rated("e2", "s1", 2.0, 1)
        .push_rated("e3", "s1", 8.0, 1);

    let mut config = EngineConfig {
        sampler: sampler(4, 1000, 1000),
        ..EngineConfig::default()
    };
    config.hyper.obs_variance = 1.0e4;
    config.hyper.global_mean = GlobalMeanPrior {
        mean: 5.5,
        variance: 1.0,
    };
    config.hyper.season_mean_scale = HyperScale::Fixed { value: 0.5 };
    config.hyper.spread_scale = HyperScale::Fixed { value: 0.5 };

    let fit = fit(&table, &config).unwrap();
    let mu = posterior_mean(&fit, "mu[s1]");
    for id in ["e1", "e2", "e3"] {
        let theta = posterior_mean(&fit, &format!("theta[{}]", id));
        assert!(
            (theta - mu).abs() < 0.25,
            "{}: quality {} far from season mean {}",
            id,
            theta,
            mu
        );
    }
    // The ratings carry almost no information, so the 9.5 stays near the prior
    assert!(posterior_mean(&fit, "theta[e1]") < 7.0);
}

// =============================================================================
// PARTIAL POOLING
// =============================================================================

#[test]
fn test_weak_season_shrinks_strong_season_holds() {
    let mut table = EpisodeTable::new();
    table
        .push_rated("a1", "A", 8.0, 500)
        .push_rated("a2", "A", 8.2, 500)
        .push_rated("a3", "A", 7.9, 500)
        .push_rated("b1", "B", 6.0, 5)
        .push_rated("b2", "B", 9.5, 5);

    let config = EngineConfig {
        sampler: sampler(4, 1000, 2000),
        ..EngineConfig::default()
    };
    let fit = fit(&table, &config).unwrap();

    for (id, y) in [("a1", 8.0), ("a2", 8.2), ("a3", 7.9)] {
        let theta = posterior_mean(&fit, &format!("theta[{}]", id));
        assert!(
            (theta - y).abs() < 0.03,
            "{}: well-rated episode moved from {} to {}",
            id,
            y,
            theta
        );
    }

    let mu_b = posterior_mean(&fit, "mu[B]");
    let high = posterior_mean(&fit, "theta[b2]");
    let low = posterior_mean(&fit, "theta[b1]");
    assert!(high < 9.47, "9.5 episode not shrunk: {}", high);
    assert!(low > 6.0, "6.0 episode not shrunk: {}", low);
    assert!((high - mu_b).abs() < (9.5 - mu_b).abs());
    assert!((low - mu_b).abs() < (6.0 - mu_b).abs());

    let report = fit.report();
    let b2 = report.episode("b2").unwrap();
    assert_eq!(b2.votes, Some(5));
    assert!(b2.quality.lower < b2.quality.upper);
    assert!(b2.quality.sd > report.episode("a2").unwrap().quality.sd);
}

#[test]
fn test_unrated_episode_follows_its_season() {
    let mut table = EpisodeTable::new();
    table
        .push_rated("a1", "A", 8.5, 800)
        .push_rated("a2", "A", 8.7, 800)
        .push_rated("a3", "A", 8.6, 800)
        .push_unrated("a4", "A")
        .push_rated("b1", "B", 4.0, 800)
        .push_rated("b2", "B", 4.2, 800);

    let config = EngineConfig {
        sampler: sampler(4, 800, 1000),
        ..EngineConfig::default()
    };
    let fit = fit(&table, &config).unwrap();

    let unrated = fit.episode_quality("a4").unwrap();
    assert!(unrated.summary.observed_rating.is_none());
    let estimate = mean(&unrated.samples);
    assert!(estimate > 6.5, "unrated episode estimate {}", estimate);
    // No rating: wider than any rated sibling
    let rated_sd = fit.report().episode("a1").unwrap().quality.sd;
    assert!(unrated.summary.quality.sd > rated_sd);
}
