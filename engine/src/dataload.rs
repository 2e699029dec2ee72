//! Reading and writing episode tables as CSV.
//!
//! Expected header: `episode_id,season_id,observed_rating,vote_count`
//! (column order is free, extra columns are ignored). An empty, `NA` or
//! `.` rating marks an unrated episode; its vote count may be empty too.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::table::EpisodeTable;

const EPISODE_COL: &str = "episode_id";
const SEASON_COL: &str = "season_id";
const RATING_COL: &str = "observed_rating";
const VOTES_COL: &str = "vote_count";

/// Load an episode table from a CSV file.
pub fn load_csv(path: &Path) -> Result<EpisodeTable> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;
    parse_csv(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn is_missing(field: &str) -> bool {
    field.is_empty()
        || field == "."
        || field.eq_ignore_ascii_case("na")
        || field.eq_ignore_ascii_case("nan")
}

/// Parse CSV content into an episode table. Row-level value checks (bounds,
/// zero votes, duplicates) are left to `EpisodeTable::validate`.
pub fn parse_csv(content: &str) -> Result<EpisodeTable> {
    let mut lines = content.lines();

    let header = lines.next().context("Empty CSV file")?;
    let columns: Vec<&str> = header.split(',').map(|s| s.trim()).collect();
    let find = |name: &str| {
        columns
            .iter()
            .position(|&c| c == name)
            .with_context(|| format!("Missing {} column", name))
    };
    let episode_idx = find(EPISODE_COL)?;
    let season_idx = find(SEASON_COL)?;
    let rating_idx = find(RATING_COL)?;
    let votes_idx = find(VOTES_COL)?;

    let mut table = EpisodeTable::new();

    for (line_num, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = line_num + 2;
        let values: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
        if values.len() != columns.len() {
            bail!(
                "Line {} has {} columns, expected {}",
                line_no,
                values.len(),
                columns.len()
            );
        }

        let episode_id = values[episode_idx];
        let season_id = values[season_idx];
        let rating_field = values[rating_idx];

        if is_missing(rating_field) {
            table.push_unrated(episode_id, season_id);
            continue;
        }

        let rating: f64 = rating_field
            .parse()
            .with_context(|| format!("Invalid observed_rating at line {}", line_no))?;
        let votes: u64 = values[votes_idx]
            .parse()
            .with_context(|| format!("Invalid vote_count at line {}", line_no))?;
        table.push_rated(episode_id, season_id, rating, votes);
    }

    Ok(table)
}

/// Render a table in the format `parse_csv` reads. Unrated rows are written
/// after the rated ones with empty rating and vote fields.
pub fn to_csv_string(table: &EpisodeTable) -> String {
    let mut out = format!("{},{},{},{}\n", EPISODE_COL, SEASON_COL, RATING_COL, VOTES_COL);
    for ep in &table.rated {
        out.push_str(&format!(
            "{},{},{},{}\n",
            ep.episode_id, ep.season_id, ep.rating, ep.votes
        ));
    }
    for ep in &table.unrated {
        out.push_str(&format!("{},{},,\n", ep.episode_id, ep.season_id));
    }
    out
}
