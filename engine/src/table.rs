//! Input table of episodes.
//!
//! Rated episodes carry an observed rating and a vote count and contribute a
//! likelihood term. Unrated episodes (not yet aired, or with no votes
//! published) are only placed in their season and predicted from its prior.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::RatingBounds;
use crate::error::{InputValidationError, RowIssue, RowIssueKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedEpisode {
    pub episode_id: String,
    pub season_id: String,
    /// Vote-weighted average rating
    pub rating: f64,
    /// Number of votes behind `rating`
    pub votes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnratedEpisode {
    pub episode_id: String,
    pub season_id: String,
}

/// The fixed input table handed to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeTable {
    pub rated: Vec<RatedEpisode>,
    #[serde(default)]
    pub unrated: Vec<UnratedEpisode>,
}

impl EpisodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rated episode.
    pub fn push_rated(
        &mut self,
        episode_id: impl Into<String>,
        season_id: impl Into<String>,
        rating: f64,
        votes: u64,
    ) -> &mut Self {
        self.rated.push(RatedEpisode {
            episode_id: episode_id.into(),
            season_id: season_id.into(),
            rating,
            votes,
        });
        self
    }

    /// Append an episode without a rating.
    pub fn push_unrated(
        &mut self,
        episode_id: impl Into<String>,
        season_id: impl Into<String>,
    ) -> &mut Self {
        self.unrated.push(UnratedEpisode {
            episode_id: episode_id.into(),
            season_id: season_id.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.rated.len() + self.unrated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rated.is_empty() && self.unrated.is_empty()
    }

    /// Distinct season ids in order of first appearance.
    pub fn season_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let all = self
            .rated
            .iter()
            .map(|e| e.season_id.as_str())
            .chain(self.unrated.iter().map(|e| e.season_id.as_str()));
        for season in all {
            if seen.insert(season) {
                order.push(season);
            }
        }
        order
    }

    /// Check every row against `bounds`, collecting all issues instead of
    /// stopping at the first.
    pub fn validate(&self, bounds: &RatingBounds) -> Result<(), InputValidationError> {
        let mut issues = Vec::new();
        let mut seen_ids: HashSet<&str> = HashSet::new();

        let mut issue = |row: usize, id: &str, kind: RowIssueKind| {
            issues.push(RowIssue {
                row: Some(row),
                episode_id: id.to_string(),
                kind,
            });
        };

        for (row, ep) in self.rated.iter().enumerate() {
            check_ids(row, &ep.episode_id, &ep.season_id, &mut seen_ids, &mut issue);
            if ep.votes == 0 {
                issue(row, &ep.episode_id, RowIssueKind::ZeroVotes);
            }
            if !ep.rating.is_finite() {
                issue(
                    row,
                    &ep.episode_id,
                    RowIssueKind::NonFiniteRating { rating: ep.rating },
                );
            } else if !bounds.contains(ep.rating) {
                issue(
                    row,
                    &ep.episode_id,
                    RowIssueKind::RatingOutOfBounds {
                        rating: ep.rating,
                        lower: bounds.lower,
                        upper: bounds.upper,
                    },
                );
            }
        }

        let offset = self.rated.len();
        for (j, ep) in self.unrated.iter().enumerate() {
            check_ids(
                offset + j,
                &ep.episode_id,
                &ep.season_id,
                &mut seen_ids,
                &mut issue,
            );
        }

        if self.rated.is_empty() {
            issues.push(RowIssue {
                row: None,
                episode_id: String::new(),
                kind: RowIssueKind::NoRatedEpisodes,
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(InputValidationError { issues })
        }
    }
}

fn check_ids<'a, F>(
    row: usize,
    episode_id: &'a str,
    season_id: &str,
    seen: &mut HashSet<&'a str>,
    issue: &mut F,
) where
    F: FnMut(usize, &str, RowIssueKind),
{
    if episode_id.trim().is_empty() {
        issue(row, episode_id, RowIssueKind::EmptyEpisodeId);
    } else if !seen.insert(episode_id) {
        issue(row, episode_id, RowIssueKind::DuplicateEpisodeId);
    }
    if season_id.trim().is_empty() {
        issue(row, episode_id, RowIssueKind::EmptySeasonId);
    }
}
