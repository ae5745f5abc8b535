//! Shared orchestrator state.
//!
//! One instance owns the config (mutable at runtime through the repo
//! commands), the provider table, the session registry, the rate limiter
//! and the root cancellation scope. Everything is reachable through an
//! `Arc<RelayState>` handed to the background tasks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use cr_domain::config::{self, Config, RepoConfig};
use cr_domain::Result;
use cr_llm::SpawnSpec;
use cr_providers::{ChatProvider, TerminalProvider};

use crate::runtime::limiter::RateLimiter;
use crate::runtime::output::OutputPolicy;
use crate::runtime::sessions::{AgentFactory, SessionRegistry};

pub struct RelayState {
    pub config_path: PathBuf,
    config: RwLock<Config>,
    pub providers: HashMap<String, Arc<dyn ChatProvider>>,
    pub registry: SessionRegistry,
    pub limiter: RateLimiter,
    /// Which repo terminal input currently drives (`/select`).
    terminal_repo: Mutex<Option<String>>,
    pub root_cancel: CancellationToken,
    /// Signalled when the bridge should exit (terminal EOF).
    pub shutdown: Notify,
}

impl RelayState {
    pub fn new(
        config: Config,
        config_path: PathBuf,
        providers: HashMap<String, Arc<dyn ChatProvider>>,
        factory: AgentFactory,
    ) -> Arc<Self> {
        let root_cancel = CancellationToken::new();
        let policy = OutputPolicy::new(config.defaults.output_threshold_bytes);
        let limiter = RateLimiter::from_config(&config.defaults.rate_limit);
        let registry = SessionRegistry::new(factory, policy, root_cancel.clone());
        Arc::new(Self {
            config_path,
            config: RwLock::new(config),
            providers,
            registry,
            limiter,
            terminal_repo: Mutex::new(None),
            root_cancel,
            shutdown: Notify::new(),
        })
    }

    // ── Config access ────────────────────────────────────────────────

    pub fn repo_by_name(&self, name: &str) -> Option<RepoConfig> {
        self.config.read().repos.get(name).cloned()
    }

    pub fn repo_for_channel(&self, channel_id: &str) -> Option<(String, RepoConfig)> {
        self.config.read().repo_for_channel(channel_id)
    }

    pub fn repo_names_sorted(&self) -> Vec<String> {
        let mut names: Vec<String> = self.config.read().repos.keys().cloned().collect();
        names.sort();
        names
    }

    /// All repos, sorted by name.
    pub fn repos_snapshot(&self) -> Vec<(String, RepoConfig)> {
        let mut repos: Vec<(String, RepoConfig)> = self
            .config
            .read()
            .repos
            .iter()
            .map(|(n, r)| (n.clone(), r.clone()))
            .collect();
        repos.sort_by(|a, b| a.0.cmp(&b.0));
        repos
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.config.read().defaults.idle_timeout_minutes * 60)
    }

    pub fn base_dir(&self) -> PathBuf {
        self.config.read().defaults.base_dir.clone()
    }

    /// Everything needed to spawn the LLM for `repo`.
    pub fn spawn_spec(&self, repo: &RepoConfig) -> SpawnSpec {
        let config = self.config.read();
        SpawnSpec {
            backend: config.backend_for(repo),
            working_dir: repo.working_dir.clone(),
            binary: config.defaults.llm_binary.clone(),
            resume_flag: config.defaults.resume_flag.clone(),
        }
    }

    // ── Repo resolution ──────────────────────────────────────────────

    /// Resolve the repo an inbound message targets. Terminal input goes
    /// to the selected repo; everything else is looked up by channel.
    pub fn resolve_repo(
        &self,
        provider_name: &str,
        channel_id: &str,
    ) -> Option<(String, RepoConfig)> {
        if provider_name == TerminalProvider::NAME {
            let name = self.terminal_repo_name()?;
            let repo = self.repo_by_name(&name)?;
            Some((name, repo))
        } else {
            self.repo_for_channel(channel_id)
        }
    }

    /// Current terminal selection, auto-initialised to the first
    /// configured repo (alphabetically, for determinism).
    pub fn terminal_repo_name(&self) -> Option<String> {
        let mut selected = self.terminal_repo.lock();
        // A removed repo invalidates the selection.
        if let Some(name) = selected.as_ref() {
            if self.config.read().repos.contains_key(name) {
                return Some(name.clone());
            }
            *selected = None;
        }
        let first = self.repo_names_sorted().into_iter().next()?;
        *selected = Some(first.clone());
        Some(first)
    }

    /// Point terminal input at `name`. The caller has verified the repo
    /// exists.
    pub fn select_terminal_repo(&self, name: &str) {
        *self.terminal_repo.lock() = Some(name.to_string());
    }

    // ── Runtime config mutation ──────────────────────────────────────

    /// Register a repo at runtime. Disk is updated first; memory only
    /// changes when persistence succeeded, so the two cannot diverge.
    pub fn runtime_add_repo(&self, name: &str, repo: RepoConfig) -> Result<()> {
        config::persist_add(&self.config_path, name, &repo)?;
        self.config.write().repos.insert(name.to_string(), repo);
        Ok(())
    }

    /// Unregister a repo at runtime. Same ordering as
    /// [`Self::runtime_add_repo`]; files on disk are never touched.
    pub fn runtime_remove_repo(&self, name: &str) -> Result<()> {
        config::persist_remove(&self.config_path, name)?;
        self.config.write().repos.remove(name);
        let mut selected = self.terminal_repo.lock();
        if selected.as_deref() == Some(name) {
            *selected = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sessions::AgentFactory;
    use cr_llm::testing::MockAgent;
    use cr_providers::testing::MockProvider;

    fn mock_factory() -> AgentFactory {
        Arc::new(|spec: &SpawnSpec| {
            let (agent, _writer) = MockAgent::new(spec.backend.clone());
            Ok(agent as Arc<dyn cr_llm::LlmAgent>)
        })
    }

    fn repo(channel: &str) -> RepoConfig {
        RepoConfig {
            provider: "discord".into(),
            channel_id: channel.into(),
            working_dir: PathBuf::from("/src/x"),
            llm_backend: None,
            git_root: None,
            branch: None,
        }
    }

    fn state_with(repos: &[(&str, &str)]) -> (Arc<RelayState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        for (name, channel) in repos {
            config.repos.insert(name.to_string(), repo(channel));
        }
        let mut providers: HashMap<String, Arc<dyn ChatProvider>> = HashMap::new();
        providers.insert("discord".into(), MockProvider::new("discord"));
        let state = RelayState::new(
            config,
            dir.path().join("relay.yaml"),
            providers,
            mock_factory(),
        );
        (state, dir)
    }

    #[test]
    fn terminal_selection_auto_initialises_alphabetically() {
        let (state, _dir) = state_with(&[("zeta", "1"), ("alpha", "2")]);
        assert_eq!(state.terminal_repo_name().unwrap(), "alpha");
        state.select_terminal_repo("zeta");
        assert_eq!(state.terminal_repo_name().unwrap(), "zeta");
    }

    #[test]
    fn terminal_selection_survives_nothing_configured() {
        let (state, _dir) = state_with(&[]);
        assert!(state.terminal_repo_name().is_none());
    }

    #[test]
    fn removed_repo_clears_the_terminal_selection() {
        let (state, _dir) = state_with(&[("alpha", "1"), ("beta", "2")]);
        state.select_terminal_repo("beta");
        state.runtime_remove_repo("beta").unwrap();
        assert_eq!(state.terminal_repo_name().unwrap(), "alpha");
    }

    #[test]
    fn add_repo_persists_before_memory() {
        let (state, _dir) = state_with(&[]);
        state.runtime_add_repo("fresh", repo("9")).unwrap();

        // Memory updated.
        assert!(state.repo_by_name("fresh").is_some());
        // Disk updated too.
        let on_disk = Config::load(&state.config_path).unwrap();
        assert_eq!(on_disk.repos["fresh"].channel_id, "9");
    }

    #[test]
    fn failed_persistence_leaves_memory_unchanged() {
        let (state, dir) = state_with(&[]);
        // Make the config path unwritable by turning it into a directory.
        std::fs::create_dir_all(&state.config_path).unwrap();
        let err = state.runtime_add_repo("fresh", repo("9"));
        assert!(err.is_err());
        assert!(state.repo_by_name("fresh").is_none());
        drop(dir);
    }

    #[test]
    fn resolve_repo_by_channel_and_by_terminal_selection() {
        let (state, _dir) = state_with(&[("alpha", "1"), ("beta", "2")]);
        let (name, _) = state.resolve_repo("discord", "2").unwrap();
        assert_eq!(name, "beta");
        assert!(state.resolve_repo("discord", "99").is_none());

        let (name, _) = state.resolve_repo("terminal", "ignored").unwrap();
        assert_eq!(name, "alpha");
    }
}
