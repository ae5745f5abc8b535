//! Git helpers for the bridge.
//!
//! Everything here shells out to the `git` binary rather than linking a git
//! library: clone and worktree creation then ride on whatever credential
//! setup the user's own git already has (ssh agents, credential helpers),
//! which matters because the allowed clone URL schemes include ssh.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tokio::process::Command;

use cr_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Snapshot of a repo's git state, captured once at session creation.
#[derive(Debug, Clone, Default)]
pub struct GitInfo {
    pub branch: String,
    pub is_worktree: bool,
    pub worktrees: Vec<Worktree>,
}

/// One entry from `git worktree list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub path: String,
    pub branch: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Detect branch, worktree status and sibling worktrees for `dir`.
pub async fn detect_repo(dir: &Path) -> Result<GitInfo> {
    let branch = git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
    let git_dir = git(dir, &["rev-parse", "--git-dir"]).await?;
    // A linked worktree's git dir lives under `<main>/.git/worktrees/<name>`.
    let is_worktree = git_dir.contains("/worktrees/") || git_dir.contains("\\worktrees\\");
    let worktrees = list_worktrees(dir).await.unwrap_or_default();
    Ok(GitInfo {
        branch: branch.trim().to_string(),
        is_worktree,
        worktrees,
    })
}

/// List all worktrees of the repo containing `dir` (including the main
/// checkout, which git reports first).
pub async fn list_worktrees(dir: &Path) -> Result<Vec<Worktree>> {
    let out = git(dir, &["worktree", "list", "--porcelain"]).await?;
    Ok(parse_worktree_list(&out))
}

/// Parse `git worktree list --porcelain` output: one block per worktree,
/// blocks separated by blank lines.
fn parse_worktree_list(raw: &str) -> Vec<Worktree> {
    let mut result = Vec::new();
    let mut path: Option<String> = None;
    let mut branch = String::new();

    for line in raw.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if let Some(p) = path.take() {
                result.push(Worktree {
                    path: p,
                    branch: std::mem::take(&mut branch),
                });
            }
            continue;
        }
        if let Some(p) = line.strip_prefix("worktree ") {
            path = Some(p.to_string());
        } else if let Some(b) = line.strip_prefix("branch ") {
            branch = b.strip_prefix("refs/heads/").unwrap_or(b).to_string();
        } else if line == "detached" {
            branch = "detached".to_string();
        }
    }
    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mutations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Clone `url` into `dest`. The caller has already validated the URL
/// scheme and the destination name.
pub async fn clone_repo(url: &str, dest: &Path) -> Result<()> {
    if dest.exists() {
        return Err(Error::Git(format!(
            "destination {} already exists",
            dest.display()
        )));
    }
    let out = Command::new("git")
        .arg("clone")
        .arg(url)
        .arg(dest)
        .output()
        .await?;
    if !out.status.success() {
        return Err(Error::Git(String::from_utf8_lossy(&out.stderr).trim().to_string()));
    }
    tracing::info!(url, dest = %dest.display(), "cloned repo");
    Ok(())
}

/// Create a linked worktree of the repo at `parent_root`, checked out at
/// `branch`, in the new directory `new_dir`.
pub async fn add_worktree(parent_root: &Path, new_dir: &Path, branch: &str) -> Result<()> {
    let out = Command::new("git")
        .arg("-C")
        .arg(parent_root)
        .args(["worktree", "add"])
        .arg(new_dir)
        .arg(branch)
        .output()
        .await?;
    if !out.status.success() {
        return Err(Error::Git(String::from_utf8_lossy(&out.stderr).trim().to_string()));
    }
    tracing::info!(dir = %new_dir.display(), branch, "added worktree");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Allow-list of clone URL shapes. Anything else (file paths, `ext::`
/// transport helpers, arbitrary commands) is rejected before git sees it.
pub fn is_allowed_url(url: &str) -> bool {
    const SCHEMES: &[&str] = &["https://", "http://", "git://", "ssh://"];
    if SCHEMES.iter().any(|s| url.starts_with(s)) {
        return true;
    }
    // scp-style: git@host:path
    url.starts_with("git@") && url.contains(':')
}

/// Repo and worktree names become directory names and config keys.
pub fn is_safe_name(name: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[A-Za-z0-9_-]+$").unwrap())
        .is_match(name)
}

/// Branch names allow slashes and dots on top of the safe-name set, but
/// never a leading dash (git would read it as an option).
pub fn is_safe_branch(branch: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[A-Za-z0-9_][A-Za-z0-9._/-]*$").unwrap())
        .is_match(branch)
        && !branch.contains("..")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .await?;
    if !out.status.success() {
        return Err(Error::Git(String::from_utf8_lossy(&out.stderr).trim().to_string()));
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
