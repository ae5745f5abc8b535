//! Bridge command handlers.
//!
//! Every handler returns the reply for the originating channel. The reply
//! strings are part of the user-facing contract; tests assert on them.

use std::path::PathBuf;
use std::sync::Arc;

use cr_domain::config::RepoConfig;
use cr_domain::message::InboundMessage;
use cr_llm::LlmAgent;
use cr_providers::{ChatProvider, TerminalProvider};

use crate::state::RelayState;

const HELP: &str = "Available commands:
/status - show the LLM session for this repo
/cancel - send an interrupt to the LLM
/restart - stop the LLM; it restarts on the next message
/help - this message
/select <repo> - (terminal only) choose the repo terminal input drives
/worktrees - list linked worktrees of this repo
/list-repos - list configured repos
/remove-repo <name> - unregister a repo; files on disk are kept
/clone <url> <name> [channel-id] - clone a repo and register it
/add-worktree <name> <branch> [channel-id] - add a worktree as a child repo
Anything else is sent to the LLM. Prefix a line with :: to send it with a leading slash.";

pub async fn handle(
    state: &Arc<RelayState>,
    provider: &Arc<dyn ChatProvider>,
    msg: &InboundMessage,
    name: &str,
    args: &str,
) -> String {
    match name {
        "help" => HELP.to_string(),
        "status" => status(state, provider, msg).await,
        "cancel" => cancel(state, provider, msg).await,
        "restart" => restart(state, provider, msg).await,
        "select" => select(state, provider, args),
        "worktrees" => worktrees(state, provider, msg).await,
        "list-repos" => list_repos(state).await,
        "remove-repo" => remove_repo(state, args).await,
        "clone" => clone(state, provider, args).await,
        "add-worktree" => add_worktree(state, provider, msg, args).await,
        other => format!("Unknown command: {other}"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn status(
    state: &Arc<RelayState>,
    provider: &Arc<dyn ChatProvider>,
    msg: &InboundMessage,
) -> String {
    let Some((repo_name, _)) = state.resolve_repo(provider.name(), &msg.channel_id) else {
        return "No repo configured for this channel".to_string();
    };

    let Some(session) = state.registry.get(&repo_name).await else {
        return format!("LLM: not running (repo: {repo_name})");
    };
    if !session.llm.running() {
        return format!("LLM: not running (repo: {repo_name})");
    }

    let mut line = format!("LLM: {} running (repo: {repo_name}", session.llm.name());
    if let Some(git) = &session.git_info {
        if !git.branch.is_empty() {
            line.push_str(&format!(", branch: {}", git.branch));
        }
        if git.is_worktree {
            line.push_str(", worktree");
        }
    }
    let idle = session.llm.last_activity().elapsed().as_secs_f64().round() as u64;
    line.push_str(&format!(", idle: {idle}s)"));
    line
}

async fn cancel(
    state: &Arc<RelayState>,
    provider: &Arc<dyn ChatProvider>,
    msg: &InboundMessage,
) -> String {
    let Some((repo_name, _)) = state.resolve_repo(provider.name(), &msg.channel_id) else {
        return "No repo configured for this channel".to_string();
    };
    match state.registry.interrupt(&repo_name).await {
        Ok(true) => "Sent interrupt signal".to_string(),
        Ok(false) => "LLM not running".to_string(),
        Err(e) => format!("Error: {e}"),
    }
}

async fn restart(
    state: &Arc<RelayState>,
    provider: &Arc<dyn ChatProvider>,
    msg: &InboundMessage,
) -> String {
    let Some((repo_name, _)) = state.resolve_repo(provider.name(), &msg.channel_id) else {
        return "No repo configured for this channel".to_string();
    };
    state.registry.restart(&repo_name).await;
    "LLM stopped. Will restart on next message.".to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Terminal selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn select(state: &Arc<RelayState>, provider: &Arc<dyn ChatProvider>, args: &str) -> String {
    if provider.name() != TerminalProvider::NAME {
        return "The select command is only available from the terminal".to_string();
    }
    let target = args.trim();
    if target.is_empty() {
        let available = state.repo_names_sorted().join(", ");
        let current = state
            .terminal_repo_name()
            .unwrap_or_else(|| "none".to_string());
        return format!(
            "Usage: /select <repo>\nAvailable repos: {available}\nCurrent selection: {current}"
        );
    }
    if state.repo_by_name(target).is_none() {
        return format!("Unknown repo: {target}");
    }
    state.select_terminal_repo(target);
    format!("Selected repo: {target}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn worktrees(
    state: &Arc<RelayState>,
    provider: &Arc<dyn ChatProvider>,
    msg: &InboundMessage,
) -> String {
    let Some((_, repo)) = state.resolve_repo(provider.name(), &msg.channel_id) else {
        return "No repo configured for this channel".to_string();
    };
    let root = repo.git_root.clone().unwrap_or_else(|| repo.working_dir.clone());

    let worktrees = match cr_git::list_worktrees(&root).await {
        Ok(wts) => wts,
        Err(e) => return format!("Error listing worktrees: {e}"),
    };
    if worktrees.len() <= 1 {
        return "No linked worktrees".to_string();
    }

    let own_path = repo.working_dir.to_string_lossy().to_string();
    let repos = state.repos_snapshot();
    let mut lines = Vec::with_capacity(worktrees.len());
    for wt in &worktrees {
        let marker = if wt.path == own_path { "* " } else { "" };
        let configured = repos
            .iter()
            .find(|(_, r)| r.working_dir.to_string_lossy() == wt.path);
        let suffix = match configured {
            Some((name, _)) => {
                if state.registry.is_active(name).await {
                    format!("repo: {name} [active]")
                } else {
                    format!("repo: {name}")
                }
            }
            None => "not configured".to_string(),
        };
        lines.push(format!("{marker}{} ({}) -> {suffix}", wt.path, wt.branch));
    }
    lines.join("\n")
}

async fn list_repos(state: &Arc<RelayState>) -> String {
    let repos = state.repos_snapshot();
    if repos.is_empty() {
        return "No repos configured".to_string();
    }
    let mut lines = Vec::with_capacity(repos.len());
    for (name, repo) in repos {
        let active = if state.registry.is_active(&name).await {
            "active"
        } else {
            "inactive"
        };
        let dir = tail_chars(&repo.working_dir.to_string_lossy(), 30);
        let branch = repo
            .branch
            .as_ref()
            .map(|b| format!(", branch: {b}"))
            .unwrap_or_default();
        lines.push(format!(
            "- {name} (channel: {}, dir: {dir}, {active}{branch})",
            repo.channel_id
        ));
    }
    lines.join("\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime repo mutation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn remove_repo(state: &Arc<RelayState>, args: &str) -> String {
    let name = args.trim();
    if name.is_empty() {
        return "Usage: /remove-repo <name>".to_string();
    }
    if state.repo_by_name(name).is_none() {
        return format!("Repo not found: {name}");
    }

    // Stop any live session before forgetting the repo.
    state.registry.restart(name).await;

    if let Err(e) = state.runtime_remove_repo(name) {
        return format!("Error removing repo: {e}");
    }
    format!("Removed repo: {name}. Files on disk were not touched.")
}

async fn clone(
    state: &Arc<RelayState>,
    provider: &Arc<dyn ChatProvider>,
    args: &str,
) -> String {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() < 2 {
        return "Usage: /clone <url> <name> [channel-id]".to_string();
    }
    let (url, name, channel_arg) = (parts[0], parts[1], parts.get(2).copied());

    if !cr_git::is_allowed_url(url) {
        return format!("URL scheme not allowed: {url}");
    }
    if !cr_git::is_safe_name(name) {
        return format!("Invalid repo name: {name}");
    }
    if state.repo_by_name(name).is_some() {
        return format!("Repo already exists: {name}");
    }

    let channel_id = match channel_arg {
        Some(channel) => channel.to_string(),
        None if provider.name() == TerminalProvider::NAME => format!("terminal-{name}"),
        None => {
            return format!(
                "A channel id is required when cloning from {}",
                provider.name()
            )
        }
    };
    if let Some((other, _)) = state.repo_for_channel(&channel_id) {
        return format!("Channel {channel_id} is already bound to repo {other}");
    }

    let dest = state.base_dir().join(name);
    if let Err(e) = cr_git::clone_repo(url, &dest).await {
        return format!("Clone failed: {e}");
    }

    let repo = RepoConfig {
        provider: provider.name().to_string(),
        channel_id: channel_id.clone(),
        working_dir: dest.clone(),
        llm_backend: None,
        git_root: None,
        branch: None,
    };
    if let Err(e) = state.runtime_add_repo(name, repo) {
        return format!("Cloned, but saving config failed: {e}");
    }
    format!(
        "Cloned {url} into {} (repo: {name}, channel: {channel_id})",
        dest.display()
    )
}

async fn add_worktree(
    state: &Arc<RelayState>,
    provider: &Arc<dyn ChatProvider>,
    msg: &InboundMessage,
    args: &str,
) -> String {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() < 2 {
        return "Usage: /add-worktree <name> <branch> [channel-id]".to_string();
    }
    let (name, branch, channel_arg) = (parts[0], parts[1], parts.get(2).copied());

    let Some((parent_name, parent)) = state.resolve_repo(provider.name(), &msg.channel_id)
    else {
        return "No repo configured for this channel".to_string();
    };

    if !cr_git::is_safe_name(name) {
        return format!("Invalid worktree name: {name}");
    }
    if !cr_git::is_safe_branch(branch) {
        return format!("Invalid branch name: {branch}");
    }

    let child_name = format!("{parent_name}/{name}");
    if state.repo_by_name(&child_name).is_some() {
        return format!("Repo already exists: {child_name}");
    }

    let parent_root = parent
        .git_root
        .clone()
        .unwrap_or_else(|| parent.working_dir.clone());
    let wt_dir = PathBuf::from(format!("{}-{name}", parent_root.display()));

    let channel_id = match channel_arg {
        Some(channel) => channel.to_string(),
        None if provider.name() == TerminalProvider::NAME => {
            format!("terminal-{parent_name}-{name}")
        }
        None => {
            return format!(
                "A channel id is required when adding a worktree from {}",
                provider.name()
            )
        }
    };
    if let Some((other, _)) = state.repo_for_channel(&channel_id) {
        return format!("Channel {channel_id} is already bound to repo {other}");
    }

    if let Err(e) = cr_git::add_worktree(&parent_root, &wt_dir, branch).await {
        return format!("Worktree failed: {e}");
    }

    let repo = RepoConfig {
        provider: provider.name().to_string(),
        channel_id: channel_id.clone(),
        working_dir: wt_dir.clone(),
        llm_backend: parent.llm_backend.clone(),
        git_root: Some(parent_root),
        branch: Some(branch.to_string()),
    };
    if let Err(e) = state.runtime_add_repo(&child_name, repo) {
        return format!("Worktree created, but saving config failed: {e}");
    }
    format!(
        "Added worktree {} (repo: {child_name}, branch: {branch}, channel: {channel_id})",
        wt_dir.display()
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Last `n` characters of `s`, on char boundaries.
fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    if count <= n {
        s.to_string()
    } else {
        s.chars().skip(count - n).collect()
    }
}
