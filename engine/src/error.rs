//! Engine error taxonomy.
//!
//! Only input and configuration problems are fatal. Numerical degeneracy,
//! stuck chains and non-convergence are recovered or reported inside the
//! posterior report instead (see `sampler` and `diagnostics`).

use serde::{Deserialize, Serialize};

use crate::diagnostics::DiagnosticsError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    InputValidation(#[from] InputValidationError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "no retained draws: every chain stopped during warm-up ({sweeps_completed} sweeps completed)"
    )]
    NoRetainedDraws { sweeps_completed: usize },

    #[error(transparent)]
    Diagnostics(#[from] DiagnosticsError),
}

/// Why a single input row was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowIssueKind {
    #[error("vote count must be positive")]
    ZeroVotes,
    #[error("rating {rating} is not a finite number")]
    NonFiniteRating { rating: f64 },
    #[error("rating {rating} outside [{lower}, {upper}]")]
    RatingOutOfBounds { rating: f64, lower: f64, upper: f64 },
    #[error("episode id is empty")]
    EmptyEpisodeId,
    #[error("season id is empty")]
    EmptySeasonId,
    #[error("episode id appears more than once")]
    DuplicateEpisodeId,
    #[error("table contains no rated episodes")]
    NoRatedEpisodes,
}

/// One rejected row. `row` counts rated rows first, then unrated rows;
/// table-level issues carry no row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{}{kind}", row_label(.row, .episode_id))]
pub struct RowIssue {
    pub row: Option<usize>,
    pub episode_id: String,
    pub kind: RowIssueKind,
}

fn row_label(row: &Option<usize>, episode_id: &str) -> String {
    match row {
        Some(row) => format!("row {} (episode '{}'): ", row, episode_id),
        None => String::new(),
    }
}

/// Shown issues per message
const SHOWN_ISSUES: usize = 5;

/// Every problem found in an input table, reported before sampling starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("input validation failed: {}", summarize(.issues))]
pub struct InputValidationError {
    pub issues: Vec<RowIssue>,
}

fn summarize(issues: &[RowIssue]) -> String {
    let mut out = format!("{} issue(s)", issues.len());
    for issue in issues.iter().take(SHOWN_ISSUES) {
        out.push_str("; ");
        out.push_str(&issue.to_string());
    }
    if issues.len() > SHOWN_ISSUES {
        out.push_str("; ...");
    }
    out
}
