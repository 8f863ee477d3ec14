//! Pull-request and CI check rollup for an instance's current branch.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Open,
    Merged,
    Closed,
}

/// Mergeability as reported by the review API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mergeability {
    Mergeable,
    Conflicting,
    Unknown,
}

/// Rolled-up conclusion across all check runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckConclusion {
    Success,
    Failure,
    Pending,
}

/// One individual CI check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRun {
    pub name: String,
    /// Raw state string from the provider (e.g. `SUCCESS`, `FAILURE`).
    pub state: String,
    /// Which rollup bucket the run landed in: `pass`, `fail`, or `pending`.
    pub bucket: String,
}

/// CI check rollup: counts plus the derived conclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checks {
    pub passing: u32,
    pub failing: u32,
    pub pending: u32,
    pub total: u32,
    pub conclusion: CheckConclusion,
    #[serde(default)]
    pub runs: Vec<CheckRun>,
}

impl Checks {
    /// Build a rollup from counts, deriving the conclusion.
    ///
    /// Pending wins over everything, then failure. A PR with zero checks
    /// rolls up as `Success`, matching the review provider's treatment of
    /// repositories with no checks configured.
    pub fn from_counts(passing: u32, failing: u32, pending: u32, runs: Vec<CheckRun>) -> Self {
        let conclusion = if pending > 0 {
            CheckConclusion::Pending
        } else if failing > 0 {
            CheckConclusion::Failure
        } else {
            CheckConclusion::Success
        };
        Self {
            passing,
            failing,
            pending,
            total: passing + failing + pending,
            conclusion,
            runs,
        }
    }
}

/// Review metadata for an instance's current branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStatus {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub state: ReviewState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mergeable: Option<Mergeability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<Checks>,
}

impl ReviewStatus {
    /// Conclusion of this review's checks, if any were fetched.
    pub fn conclusion(&self) -> Option<CheckConclusion> {
        self.checks.as_ref().map(|c| c.conclusion)
    }

    /// True when at least one check run exists.
    pub fn has_checks(&self) -> bool {
        self.checks.as_ref().is_some_and(|c| c.total > 0)
    }
}
