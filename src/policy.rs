//! Maps a ranked similarity list to the action taken on the new item.

use crate::config::DetectorConfig;
use crate::item::{ItemKind, SimilarityResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    NoAction,
    FlagPossible {
        matches: Vec<SimilarityResult>,
    },
    FlagExact {
        matches: Vec<SimilarityResult>,
        best_match: u64,
    },
}

impl Action {
    pub fn matches(&self) -> &[SimilarityResult] {
        match self {
            Action::NoAction => &[],
            Action::FlagPossible { matches } | Action::FlagExact { matches, .. } => matches,
        }
    }

    /// The entries surfaced to users, capped at `max`.
    pub fn shown(&self, max: usize) -> &[SimilarityResult] {
        let matches = self.matches();
        &matches[..matches.len().min(max)]
    }

    /// Label to attach for this action, if any.
    pub fn label<'a>(&self, config: &'a DetectorConfig) -> Option<&'a str> {
        match self {
            Action::NoAction => None,
            Action::FlagPossible { .. } => Some(&config.label_possible_duplicate),
            Action::FlagExact { .. } => Some(&config.label_exact_duplicate),
        }
    }

    /// Item to close against, when this action closes the new item.
    ///
    /// Only exact matches on issues close, and only when enabled. Pull
    /// requests are never closed.
    pub fn close_target(&self, kind: ItemKind, config: &DetectorConfig) -> Option<u64> {
        match self {
            Action::FlagExact { best_match, .. }
                if kind == ItemKind::Issue && config.auto_close_exact_match =>
            {
                Some(*best_match)
            }
            _ => None,
        }
    }
}

/// Keep results at or above the base threshold, sorted by descending score
/// (stable on ties).
pub fn filter_ranked(mut results: Vec<SimilarityResult>, config: &DetectorConfig) -> Vec<SimilarityResult> {
    results.retain(|r| r.score >= config.similarity_threshold);
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results
}

/// Decide what to do given results ranked by descending score.
///
/// The base-threshold check repeats the one in [`filter_ranked`], so an
/// unfiltered list whose best score is below the threshold still yields
/// `NoAction`.
pub fn decide(ranked: &[SimilarityResult], config: &DetectorConfig) -> Action {
    let Some(best) = ranked.first() else {
        return Action::NoAction;
    };

    if best.score >= config.high_similarity_threshold {
        Action::FlagExact {
            matches: ranked.to_vec(),
            best_match: best.number,
        }
    } else if best.score >= config.similarity_threshold {
        Action::FlagPossible {
            matches: ranked.to_vec(),
        }
    } else {
        Action::NoAction
    }
}
