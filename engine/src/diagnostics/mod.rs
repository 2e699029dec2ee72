//! Diagnostics for sampler output
//!
//! This module provides tools for:
//! - Convergence assessment (rank-normalized split R-hat, bulk and tail ESS)
//! - Simulation-based calibration (SBC)

pub mod convergence;
pub mod sbc;

pub use convergence::{
    assess_convergence, compute_ess_bulk, compute_ess_tail, linear_quantile,
    rank_normalized_split_rhat, ConvergenceReport, DiagnosticsError, ParamConvergence, Verdict,
};
pub use sbc::{analyze_sbc_results, run_sbc, RankCheck, SbcConfig, SbcReplication, SbcResult};
