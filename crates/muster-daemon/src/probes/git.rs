//! Version-control status via the `git` CLI.
//!
//! One `git status --porcelain=v2 --branch` call per enrichment yields the
//! branch, upstream, ahead/behind counts, and the dirty-file breakdown.
//! Status is derived fresh each cycle; nothing is merged with stale data.

use std::path::Path;
use std::process::Command;

use muster_core::schema::GitInfo;

use crate::error::ProbeError;

/// Fetch git status for a workspace.
///
/// `Ok(None)` means the directory is not inside a git work tree. A vanished
/// directory is reported as `DirectoryVanished` so the registry can remove
/// the instance instead of treating it as a probe failure.
pub async fn status(path: &Path) -> Result<Option<GitInfo>, ProbeError> {
    if !path.is_dir() {
        return Err(ProbeError::DirectoryVanished {
            path: path.display().to_string(),
        });
    }

    let dir = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let output = Command::new("git")
            .arg("-C")
            .arg(&dir)
            .args(["status", "--porcelain=v2", "--branch"])
            .output()
            .map_err(|e| ProbeError::command_with("failed to execute git", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // "not a git repository" is data, not a failure.
            if stderr.contains("not a git repository") {
                return Ok(None);
            }
            return Err(ProbeError::command(format!(
                "git status failed: {}",
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(Some(parse_porcelain_v2(&stdout)))
    })
    .await
    .map_err(|e| ProbeError::command_with("git task join error", e))?
}

/// Parse `git status --porcelain=v2 --branch` output.
fn parse_porcelain_v2(output: &str) -> GitInfo {
    let mut branch = String::from("HEAD");
    let mut upstream = None;
    let mut ahead = 0;
    let mut behind = 0;
    let mut modified = 0;
    let mut staged = 0;
    let mut untracked = 0;

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("# branch.head ") {
            branch = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("# branch.upstream ") {
            upstream = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("# branch.ab ") {
            for part in rest.split_whitespace() {
                if let Some(n) = part.strip_prefix('+') {
                    ahead = n.parse().unwrap_or(0);
                } else if let Some(n) = part.strip_prefix('-') {
                    behind = n.parse().unwrap_or(0);
                }
            }
        } else if line.starts_with("1 ") || line.starts_with("2 ") {
            // Ordinary / rename entries carry an XY field: X is the staged
            // side, Y the unstaged side.
            if let Some(xy) = line.split_whitespace().nth(1) {
                let mut chars = xy.chars();
                let x = chars.next().unwrap_or('.');
                let y = chars.next().unwrap_or('.');
                if x != '.' {
                    staged += 1;
                }
                if y != '.' {
                    modified += 1;
                }
            }
        } else if line.starts_with("? ") {
            untracked += 1;
        }
    }

    let dirty = modified > 0 || staged > 0 || untracked > 0;
    GitInfo {
        branch,
        upstream,
        ahead,
        behind,
        modified,
        staged,
        untracked,
        dirty,
    }
}
