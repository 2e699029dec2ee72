// epiq CLI
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use epiq::config::EngineConfig;
use epiq::dataload::{load_csv, to_csv_string};
use epiq::diagnostics::{run_sbc, SbcConfig};
use epiq::engine::fit;
use epiq::simulate::{generate_dataset, SyntheticDesign};

#[derive(Parser)]
#[command(name = "epiq")]
#[command(version = "0.1.0")]
#[command(about = "Hierarchical estimation of latent episode quality", long_about = None)]
struct Cli {
    /// Debug-level logging (overridden by EPIQ_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the hierarchy to a CSV of episode ratings
    Fit {
        /// Input CSV with episode_id,season_id,observed_rating,vote_count
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Engine configuration (JSON)
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Print the full report as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Only print the posterior of this episode
        #[arg(long, value_name = "EPISODE_ID")]
        episode: Option<String>,

        /// Override the sampler seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Write a synthetic series drawn from the prior as CSV to stdout
    Simulate {
        /// Number of seasons
        #[arg(long, default_value = "3")]
        seasons: usize,

        /// Episodes per season
        #[arg(long, default_value = "8")]
        episodes: usize,

        /// Trailing unrated episodes per season
        #[arg(long, default_value = "0")]
        unrated: usize,

        /// Smallest vote count
        #[arg(long, default_value = "50")]
        min_votes: u64,

        /// Largest vote count
        #[arg(long, default_value = "2000")]
        max_votes: u64,

        /// Engine configuration supplying bounds and hyperparameters (JSON)
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Also write the true latent values as JSON
        #[arg(long, value_name = "TRUTH")]
        truth: Option<PathBuf>,
    },

    /// Run simulation-based calibration and print the results as JSON
    Sbc {
        /// Number of replications
        #[arg(short = 'n', long, default_value = "100")]
        n_sims: usize,

        /// Posterior draws each true value is ranked among
        #[arg(long, default_value = "99")]
        n_draws: usize,

        /// Rank histogram bins
        #[arg(long, default_value = "10")]
        bins: usize,

        /// Engine configuration (JSON)
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Fit {
            input,
            config,
            json,
            episode,
            seed,
        } => fit_command(input, config, json, episode, seed),
        Commands::Simulate {
            seasons,
            episodes,
            unrated,
            min_votes,
            max_votes,
            config,
            seed,
            truth,
        } => {
            let design = SyntheticDesign {
                seasons,
                episodes_per_season: episodes,
                min_votes,
                max_votes,
                unrated_per_season: unrated,
            };
            simulate_command(design, config, seed, truth)
        }
        Commands::Sbc {
            n_sims,
            n_draws,
            bins,
            config,
            seed,
        } => sbc_command(n_sims, n_draws, bins, config, seed),
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("EPIQ_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_json_file(path),
        None => Ok(EngineConfig::default()),
    }
}

fn fit_command(
    input: PathBuf,
    config: Option<PathBuf>,
    json: bool,
    episode: Option<String>,
    seed: Option<u64>,
) -> Result<()> {
    let mut config = load_config(config.as_ref())?;
    if let Some(seed) = seed {
        config.sampler.seed = seed;
        config.sampler.chain_seeds = None;
    }

    let table = load_csv(&input)?;
    info!(
        rated = table.rated.len(),
        unrated = table.unrated.len(),
        input = %input.display(),
        "loaded episodes"
    );

    let fitted = fit(&table, &config)
        .with_context(|| format!("Failed to fit episodes from: {}", input.display()))?;

    if let Some(id) = episode {
        let Some(quality) = fitted.episode_quality(&id) else {
            bail!("Unknown episode: {}", id);
        };
        if json {
            let out = serde_json::to_string_pretty(&quality.summary)
                .context("Failed to serialize episode summary to JSON")?;
            println!("{}", out);
        } else {
            let q = &quality.summary.quality;
            println!(
                "{} (season {}): estimate {:.3}, sd {:.3}, {:.0}% interval [{:.3}, {:.3}], rhat {:.3}",
                quality.summary.episode_id,
                quality.summary.season_id,
                q.estimate,
                q.sd,
                fitted.report().interval_level * 100.0,
                q.lower,
                q.upper,
                q.rhat
            );
        }
        return Ok(());
    }

    if json {
        let out = serde_json::to_string_pretty(fitted.report())
            .context("Failed to serialize report to JSON")?;
        println!("{}", out);
    } else {
        print!("{}", fitted.report().to_table_string());
    }
    Ok(())
}

fn simulate_command(
    design: SyntheticDesign,
    config: Option<PathBuf>,
    seed: u64,
    truth: Option<PathBuf>,
) -> Result<()> {
    if design.seasons == 0 || design.episodes_per_season == 0 {
        bail!("Need at least one season and one episode per season");
    }
    let config = load_config(config.as_ref())?;
    config.validate()?;

    let (table, true_values) = generate_dataset(&design, &config.bounds, &config.hyper, seed)
        .context("Failed to simulate dataset")?;

    if let Some(path) = truth {
        let out = serde_json::to_string_pretty(&true_values)
            .context("Failed to serialize true values to JSON")?;
        std::fs::write(&path, out)
            .with_context(|| format!("Failed to write true values to: {}", path.display()))?;
        info!(path = %path.display(), "wrote true values");
    }

    print!("{}", to_csv_string(&table));
    Ok(())
}

fn sbc_command(
    n_sims: usize,
    n_draws: usize,
    bins: usize,
    config: Option<PathBuf>,
    seed: u64,
) -> Result<()> {
    let engine = load_config(config.as_ref())?;
    engine.validate()?;

    let config = SbcConfig {
        n_sims,
        n_draws_per_sim: n_draws,
        n_bins: bins,
        seed,
        ..SbcConfig::default()
    };
    let result = run_sbc(config, &engine).context("SBC failed")?;

    let out = serde_json::to_string_pretty(&result).context("Failed to serialize SBC results")?;
    println!("{}", out);
    Ok(())
}
