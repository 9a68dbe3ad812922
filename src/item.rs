//! Shared data model: items fetched from the remote store and the derived
//! per-run values built from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Whether an item is an issue or a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Issue,
    PullRequest,
}

impl ItemKind {
    /// Short name used on the command line and in `*_NUMBER` env vars.
    pub fn cli_name(&self) -> &'static str {
        match self {
            ItemKind::Issue => "issue",
            ItemKind::PullRequest => "pr",
        }
    }

    /// Human-facing name used in comments.
    pub fn display_name(&self) -> &'static str {
        match self {
            ItemKind::Issue => "issue",
            ItemKind::PullRequest => "pull request",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Open,
    Closed,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Open => "open",
            ItemState::Closed => "closed",
        }
    }
}

/// Which states to include when listing items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateFilter {
    Open,
    Closed,
    #[default]
    All,
}

impl StateFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateFilter::Open => "open",
            StateFilter::Closed => "closed",
            StateFilter::All => "all",
        }
    }

    pub fn matches(&self, state: ItemState) -> bool {
        match self {
            StateFilter::Open => state == ItemState::Open,
            StateFilter::Closed => state == ItemState::Closed,
            StateFilter::All => true,
        }
    }
}

/// An issue or pull request as seen by the detector.
///
/// Always fully populated: the gateway rejects records with missing fields
/// before they reach this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub labels: BTreeSet<String>,
    pub state: ItemState,
    pub kind: ItemKind,
}

impl Item {
    /// Title and body joined the way they are compared.
    pub fn text(&self) -> String {
        combined_text(&self.title, self.body.as_deref())
    }

    pub fn has_any_label(&self, labels: &BTreeSet<String>) -> bool {
        self.labels.iter().any(|l| labels.contains(l))
    }
}

pub fn combined_text(title: &str, body: Option<&str>) -> String {
    format!("{} {}", title, body.unwrap_or(""))
}

/// A candidate prepared for scoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateText {
    pub number: u64,
    pub title: String,
    pub normalized: String,
}

/// A candidate's similarity to the query item.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityResult {
    pub number: u64,
    pub title: String,
    pub score: f64,
}

impl SimilarityResult {
    /// Whole-number percentage, truncated. The epsilon keeps a self-match
    /// that lands a hair under 1.0 from showing as 99%.
    pub fn percent(&self) -> u32 {
        (self.score * 100.0 + 1e-9).floor() as u32
    }
}

/// A repository label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// What a label should look like if it has to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSpec {
    pub name: String,
    pub color: &'static str,
    pub description: &'static str,
}

pub const POSSIBLE_DUPLICATE_COLOR: &str = "FFA500";
pub const EXACT_DUPLICATE_COLOR: &str = "FF0000";

impl LabelSpec {
    pub fn possible_duplicate(name: &str) -> Self {
        Self {
            name: name.to_string(),
            color: POSSIBLE_DUPLICATE_COLOR,
            description: "Potential duplicate issue",
        }
    }

    pub fn exact_duplicate(name: &str) -> Self {
        Self {
            name: name.to_string(),
            color: EXACT_DUPLICATE_COLOR,
            description: "Exact duplicate issue",
        }
    }
}
