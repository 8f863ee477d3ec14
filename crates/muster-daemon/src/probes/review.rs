//! Review-status probe using the `gh` CLI.
//!
//! Three calls: current PR for a branch, check rollup for that PR, and the
//! API rate limit. All are JSON invocations of an external command; serde
//! schema structs mirror the CLI's camelCase output.

use std::path::Path;
use std::process::Command;

use serde::Deserialize;

use muster_core::schema::{CheckRun, Checks, Mergeability, ReviewState, ReviewStatus};

use crate::error::ProbeError;

/// Remaining quota per sub-API. The governor adopts the more restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub core_remaining: u64,
    pub core_limit: u64,
    pub graphql_remaining: u64,
    pub graphql_limit: u64,
}

impl RateLimits {
    pub fn most_restrictive(&self) -> u64 {
        self.core_remaining.min(self.graphql_remaining)
    }
}

/// Execute `gh` and return stdout. `dir` sets the working directory so
/// repo-scoped commands resolve against the right remote.
async fn run_gh(dir: Option<&Path>, args: &[&str]) -> Result<GhOutput, ProbeError> {
    let args_owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let dir_owned = dir.map(|d| d.to_path_buf());
    tokio::task::spawn_blocking(move || {
        let mut cmd = Command::new("gh");
        if let Some(dir) = &dir_owned {
            cmd.current_dir(dir);
        }
        let output = cmd.args(&args_owned).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProbeError::command("gh CLI not found. Install from https://cli.github.com/")
            } else {
                ProbeError::command_with("failed to execute gh", e)
            }
        })?;

        Ok(GhOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    })
    .await
    .map_err(|e| ProbeError::command_with("gh task join error", e))?
}

struct GhOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Current PR plus check rollup for a branch. `Ok(None)` when no PR exists
/// for the branch; that is data, not a failure.
pub async fn review_for_branch(
    path: &Path,
    branch: &str,
) -> Result<Option<ReviewStatus>, ProbeError> {
    let out = run_gh(
        Some(path),
        &[
            "pr",
            "view",
            branch,
            "--json",
            "number,title,url,state,mergeable",
        ],
    )
    .await?;

    if !out.success {
        if out.stderr.to_lowercase().contains("no pull requests found") {
            return Ok(None);
        }
        return Err(ProbeError::command(format!(
            "gh pr view failed: {}",
            out.stderr.trim()
        )));
    }

    let pr: GhPr = serde_json::from_str(&out.stdout)
        .map_err(|e| ProbeError::parse_with("gh pr view JSON", e))?;

    let checks = pr_checks(path, branch).await?;
    Ok(Some(ReviewStatus {
        number: pr.number,
        title: pr.title,
        url: pr.url,
        state: parse_state(&pr.state),
        mergeable: pr.mergeable.as_deref().map(parse_mergeability),
        checks: Some(checks),
    }))
}

/// Check rollup for a branch's PR.
///
/// `gh pr checks` exits nonzero when checks are failing or still pending, so
/// the exit status is ignored whenever stdout holds a parseable JSON array.
async fn pr_checks(path: &Path, branch: &str) -> Result<Checks, ProbeError> {
    let out = run_gh(
        Some(path),
        &["pr", "checks", branch, "--json", "name,state,bucket"],
    )
    .await?;

    let trimmed = out.stdout.trim();
    if trimmed.is_empty() {
        if out.success || out.stderr.to_lowercase().contains("no checks") {
            return Ok(Checks::from_counts(0, 0, 0, Vec::new()));
        }
        return Err(ProbeError::command(format!(
            "gh pr checks failed: {}",
            out.stderr.trim()
        )));
    }

    let gh_checks: Vec<GhCheck> =
        serde_json::from_str(trimmed).map_err(|e| ProbeError::parse_with("gh pr checks JSON", e))?;
    Ok(rollup(&gh_checks))
}

/// Remaining quota across both sub-APIs.
pub async fn rate_limit() -> Result<RateLimits, ProbeError> {
    let out = run_gh(None, &["api", "rate_limit"]).await?;
    if !out.success {
        return Err(ProbeError::command(format!(
            "gh api rate_limit failed: {}",
            out.stderr.trim()
        )));
    }
    let parsed: GhRateLimit = serde_json::from_str(&out.stdout)
        .map_err(|e| ProbeError::parse_with("gh rate_limit JSON", e))?;
    Ok(RateLimits {
        core_remaining: parsed.resources.core.remaining,
        core_limit: parsed.resources.core.limit,
        graphql_remaining: parsed.resources.graphql.remaining,
        graphql_limit: parsed.resources.graphql.limit,
    })
}

fn parse_state(state: &str) -> ReviewState {
    match state.to_uppercase().as_str() {
        "MERGED" => ReviewState::Merged,
        "CLOSED" => ReviewState::Closed,
        _ => ReviewState::Open,
    }
}

fn parse_mergeability(value: &str) -> Mergeability {
    match value.to_uppercase().as_str() {
        "MERGEABLE" => Mergeability::Mergeable,
        "CONFLICTING" => Mergeability::Conflicting,
        _ => Mergeability::Unknown,
    }
}

fn rollup(checks: &[GhCheck]) -> Checks {
    let mut passing = 0;
    let mut failing = 0;
    let mut pending = 0;
    let mut runs = Vec::with_capacity(checks.len());
    for check in checks {
        match check.bucket.as_str() {
            "pass" | "skipping" => passing += 1,
            "fail" | "cancel" => failing += 1,
            _ => pending += 1,
        }
        runs.push(CheckRun {
            name: check.name.clone(),
            state: check.state.clone(),
            bucket: check.bucket.clone(),
        });
    }
    Checks::from_counts(passing, failing, pending, runs)
}

/// `gh pr view --json` schema.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPr {
    number: u64,
    title: String,
    url: String,
    state: String,
    mergeable: Option<String>,
}

/// `gh pr checks --json` schema.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhCheck {
    name: String,
    state: String,
    bucket: String,
}

/// `gh api rate_limit` schema.
#[derive(Debug, Deserialize)]
struct GhRateLimit {
    resources: GhRateResources,
}

#[derive(Debug, Deserialize)]
struct GhRateResources {
    core: GhRate,
    graphql: GhRate,
}

#[derive(Debug, Deserialize)]
struct GhRate {
    limit: u64,
    remaining: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::schema::CheckConclusion;

    #[test]
    fn rollup_buckets_map_to_counts() {
        let checks = vec![
            GhCheck {
                name: "build".into(),
                state: "SUCCESS".into(),
                bucket: "pass".into(),
            },
            GhCheck {
                name: "lint".into(),
                state: "SKIPPED".into(),
                bucket: "skipping".into(),
            },
            GhCheck {
                name: "test".into(),
                state: "FAILURE".into(),
                bucket: "fail".into(),
            },
            GhCheck {
                name: "deploy".into(),
                state: "IN_PROGRESS".into(),
                bucket: "pending".into(),
            },
        ];
        let rolled = rollup(&checks);
        assert_eq!(rolled.passing, 2);
        assert_eq!(rolled.failing, 1);
        assert_eq!(rolled.pending, 1);
        assert_eq!(rolled.total, 4);
        assert_eq!(rolled.conclusion, CheckConclusion::Pending);
        assert_eq!(rolled.runs.len(), 4);
    }

    #[test]
    fn state_parsing_defaults_to_open() {
        assert_eq!(parse_state("OPEN"), ReviewState::Open);
        assert_eq!(parse_state("merged"), ReviewState::Merged);
        assert_eq!(parse_state("CLOSED"), ReviewState::Closed);
        assert_eq!(parse_state("whatever"), ReviewState::Open);
    }

    #[test]
    fn mergeability_parsing() {
        assert_eq!(parse_mergeability("MERGEABLE"), Mergeability::Mergeable);
        assert_eq!(parse_mergeability("conflicting"), Mergeability::Conflicting);
        assert_eq!(parse_mergeability("UNKNOWN"), Mergeability::Unknown);
        assert_eq!(parse_mergeability(""), Mergeability::Unknown);
    }

    #[test]
    fn pr_schema_parses_gh_output() {
        let json = r#"{"number":512,"title":"Fix races","url":"https://example.com/pr/512","state":"OPEN","mergeable":"CONFLICTING"}"#;
        let pr: GhPr = serde_json::from_str(json).unwrap();
        assert_eq!(pr.number, 512);
        assert_eq!(pr.mergeable.as_deref(), Some("CONFLICTING"));
    }

    #[test]
    fn rate_limit_schema_parses_gh_output() {
        let json = r#"{"resources":{"core":{"limit":5000,"remaining":4321,"reset":1700000000},"graphql":{"limit":5000,"remaining":120,"reset":1700000000}}}"#;
        let parsed: GhRateLimit = serde_json::from_str(json).unwrap();
        let limits = RateLimits {
            core_remaining: parsed.resources.core.remaining,
            core_limit: parsed.resources.core.limit,
            graphql_remaining: parsed.resources.graphql.remaining,
            graphql_limit: parsed.resources.graphql.limit,
        };
        assert_eq!(limits.most_restrictive(), 120);
    }
}
