//! Bridge configuration.
//!
//! The on-disk format is YAML: a `defaults` block, a `providers` block, and
//! a `repos` map keyed by repo name. Every field has a serde default so the
//! rest of the system always sees concrete values. Runtime repo mutations
//! (`/clone`, `/add-worktree`, `/remove-repo`) go through [`persist_add`] /
//! [`persist_remove`], which rewrite the file atomically.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Repo name -> repo binding. Names are the session keys.
    #[serde(default)]
    pub repos: HashMap<String, RepoConfig>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// LLM backend used when a repo has no override.
    #[serde(default = "d_backend")]
    pub llm_backend: String,
    /// Path to (or name of) the coding-agent binary.
    #[serde(default = "d_backend")]
    pub llm_binary: String,
    /// Extra argv appended at spawn to resume a previous conversation.
    #[serde(default = "d_resume_flag")]
    pub resume_flag: String,
    /// Outputs longer than this many bytes are sent as file attachments.
    #[serde(default = "d_1500")]
    pub output_threshold_bytes: usize,
    /// Sessions idle for longer than this are reaped.
    #[serde(default = "d_30")]
    pub idle_timeout_minutes: u64,
    /// Destination directory for `/clone` (repo name is appended).
    #[serde(default = "d_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            llm_backend: d_backend(),
            llm_binary: d_backend(),
            resume_flag: d_resume_flag(),
            output_threshold_bytes: 1500,
            idle_timeout_minutes: 30,
            base_dir: d_base_dir(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Sustained per-user rate, in messages per minute.
    #[serde(default = "d_10f")]
    pub user_per_minute: f64,
    /// Per-user burst capacity.
    #[serde(default = "d_5f")]
    pub user_burst: f64,
    /// Sustained per-channel rate, in messages per minute.
    #[serde(default = "d_30f")]
    pub channel_per_minute: f64,
    /// Per-channel burst capacity.
    #[serde(default = "d_10f")]
    pub channel_burst: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_per_minute: 10.0,
            user_burst: 5.0,
            channel_per_minute: 30.0,
            channel_burst: 10.0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub discord: DiscordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Environment variable holding the bot token. The provider is only
    /// started when at least one repo is bound to discord.
    #[serde(default = "d_discord_token_env")]
    pub token_env: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token_env: d_discord_token_env(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Repos
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Provider this repo's channel belongs to.
    #[serde(default = "d_terminal")]
    pub provider: String,
    /// Channel the repo is bound to. Must be unique across repos when
    /// non-empty.
    #[serde(default)]
    pub channel_id: String,
    /// Directory the LLM subprocess runs in.
    pub working_dir: PathBuf,
    /// Per-repo LLM backend override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_backend: Option<String>,
    /// Main checkout for worktree repos. Defaults to `working_dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_root: Option<PathBuf>,
    /// Branch annotation shown in listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serde default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_backend() -> String {
    "claude".into()
}
fn d_resume_flag() -> String {
    "--continue".into()
}
fn d_terminal() -> String {
    "terminal".into()
}
fn d_discord_token_env() -> String {
    "DISCORD_BOT_TOKEN".into()
}
fn d_base_dir() -> PathBuf {
    PathBuf::from("repos")
}
fn d_1500() -> usize {
    1500
}
fn d_30() -> u64 {
    30
}
fn d_true() -> bool {
    true
}
fn d_10f() -> f64 {
    10.0
}
fn d_5f() -> f64 {
    5.0
}
fn d_30f() -> f64 {
    30.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

/// One problem found by [`Config::validate`].
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            ConfigSeverity::Warning => write!(f, "warning: {}", self.message),
            ConfigSeverity::Error => write!(f, "error: {}", self.message),
        }
    }
}

impl Config {
    /// Load the config from `path`. An absent file yields the defaults,
    /// matching first-run behaviour.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file absent, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    /// Check structural invariants. Errors make the config unusable;
    /// warnings are surfaced but tolerated.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut seen_channels: HashMap<&str, &str> = HashMap::new();

        for (name, repo) in &self.repos {
            if name.trim().is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    message: "repo with empty name".into(),
                });
            }
            if repo.working_dir.as_os_str().is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    message: format!("repo {name}: empty working_dir"),
                });
            }
            if !repo.channel_id.is_empty() {
                if let Some(other) = seen_channels.insert(&repo.channel_id, name) {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Error,
                        message: format!(
                            "channel {} is bound to both {other} and {name}",
                            repo.channel_id
                        ),
                    });
                }
            }
            if repo.provider != "terminal" && repo.provider != "discord" {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    message: format!("repo {name}: unknown provider {}", repo.provider),
                });
            }
        }

        issues
    }

    /// Resolve the repo bound to a channel, if any.
    pub fn repo_for_channel(&self, channel_id: &str) -> Option<(String, RepoConfig)> {
        if channel_id.is_empty() {
            return None;
        }
        self.repos
            .iter()
            .find(|(_, r)| r.channel_id == channel_id)
            .map(|(n, r)| (n.clone(), r.clone()))
    }

    /// Effective LLM backend for a repo (override, else default).
    pub fn backend_for(&self, repo: &RepoConfig) -> String {
        repo.llm_backend
            .clone()
            .unwrap_or_else(|| self.defaults.llm_backend.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Atomic persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Add `name` to the on-disk config. The file is parsed fresh, mutated,
/// and replaced via a temp file in the same directory, so readers see
/// either the old or the new content, never a torn write.
pub fn persist_add(path: &Path, name: &str, repo: &RepoConfig) -> Result<()> {
    rewrite(path, |config| {
        config.repos.insert(name.to_string(), repo.clone());
        Ok(())
    })
}

/// Remove `name` from the on-disk config. Removing an absent entry is a
/// no-op; the in-memory config is the authority for existence checks.
pub fn persist_remove(path: &Path, name: &str) -> Result<()> {
    rewrite(path, |config| {
        config.repos.remove(name);
        Ok(())
    })
}

fn rewrite(path: &Path, mutate: impl FnOnce(&mut Config) -> Result<()>) -> Result<()> {
    let mut config = Config::load(path)?;
    mutate(&mut config)?;

    let yaml = serde_yaml::to_string(&config)?;
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = dir {
        std::fs::create_dir_all(dir)?;
    }
    let mut tmp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new_in(".")?,
    };
    tmp.write_all(yaml.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| Error::Config(format!("replacing {}: {}", path.display(), e.error)))?;
    tracing::debug!(path = %path.display(), "config persisted");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
