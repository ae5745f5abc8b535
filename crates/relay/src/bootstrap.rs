//! State construction and background-task spawning.
//!
//! `build_state` validates the config and wires providers, registry and
//! limiter together; `start` brings the providers and background loops
//! up. The split keeps `main` small and lets tests boot a full state
//! without touching real transports.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use cr_domain::config::{Config, ConfigSeverity};
use cr_llm::SpawnSpec;
use cr_providers::{ChatProvider, DiscordProvider, TerminalProvider};

use crate::runtime;
use crate::runtime::reaper;
use crate::runtime::sessions::AgentFactory;
use crate::state::RelayState;

/// Validate the config and build a fully wired [`RelayState`].
///
/// The terminal provider is always available; the discord provider is
/// only constructed when some repo is bound to it, and then its token
/// must be present in the configured environment variable.
pub fn build_state(config: Config, config_path: PathBuf) -> anyhow::Result<Arc<RelayState>> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let mut providers: HashMap<String, Arc<dyn ChatProvider>> = HashMap::new();
    providers.insert(
        TerminalProvider::NAME.to_string(),
        Arc::new(TerminalProvider::new()),
    );

    let needs_discord = config
        .repos
        .values()
        .any(|r| r.provider == DiscordProvider::NAME);
    if needs_discord {
        let token_env = &config.providers.discord.token_env;
        let token = std::env::var(token_env)
            .with_context(|| format!("reading {token_env} for the discord provider"))?;
        providers.insert(
            DiscordProvider::NAME.to_string(),
            Arc::new(DiscordProvider::new(token)),
        );
    }

    let factory: AgentFactory = Arc::new(|spec: &SpawnSpec| cr_llm::create_agent(spec));
    Ok(RelayState::new(config, config_path, providers, factory))
}

/// Start the providers, the per-provider dispatch loops and the idle
/// reaper.
pub async fn start(state: &Arc<RelayState>) -> anyhow::Result<()> {
    for provider in state.providers.values() {
        provider
            .start()
            .await
            .map_err(anyhow::Error::new)
            .with_context(|| format!("starting provider {}", provider.name()))?;
        tracing::info!(provider = provider.name(), "provider started");
    }

    runtime::spawn_dispatch_loops(state);
    reaper::spawn_idle_reaper(Arc::clone(state));
    tracing::info!(
        repos = state.repo_names_sorted().len(),
        "bridge running"
    );
    Ok(())
}

/// Tear everything down: cancel the root scope (dispatch loops and pumps
/// exit), stop every session's subprocess, then stop the providers.
/// Safe to call more than once.
pub async fn shutdown(state: &Arc<RelayState>) {
    state.root_cancel.cancel();
    state.registry.stop_all().await;
    for provider in state.providers.values() {
        provider.stop().await;
    }
    tracing::info!("bridge stopped");
}
