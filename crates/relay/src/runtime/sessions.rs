//! The per-repo session registry.
//!
//! One registry guards the repo-name -> live session map behind an async
//! mutex. Creation (factory call, subprocess start, insert, pump spawn)
//! happens entirely under the lock, which makes at-most-one-session-per-
//! repo structural; slow operations against providers (broadcasts,
//! notifications) never run under it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use cr_domain::message::LlmInput;
use cr_domain::Result;
use cr_git::GitInfo;
use cr_llm::{LlmAgent, SpawnSpec};
use cr_providers::ChatProvider;

use super::merger::SourceMerger;
use super::output::OutputPolicy;
use super::pump;

/// Factory for LLM agents; swapped for a mock in tests.
pub type AgentFactory = Arc<dyn Fn(&SpawnSpec) -> Result<Arc<dyn LlmAgent>> + Send + Sync>;

/// One broadcast destination of a session.
#[derive(Clone)]
pub struct ChannelBinding {
    pub provider: Arc<dyn ChatProvider>,
    pub channel_id: String,
}

/// One live LLM subprocess plus its bookkeeping for one repo.
pub struct Session {
    pub name: String,
    pub llm: Arc<dyn LlmAgent>,
    channels: Mutex<Vec<ChannelBinding>>,
    pub merger: SourceMerger,
    /// Cancelling releases the output pump; derived from the root scope.
    pub cancel: CancellationToken,
    pub git_info: Option<GitInfo>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("cancel", &self.cancel)
            .field("git_info", &self.git_info)
            .finish()
    }
}

impl Session {
    /// Add a broadcast destination unless the `(provider, channel)` pair
    /// is already bound.
    pub fn add_channel(&self, provider: Arc<dyn ChatProvider>, channel_id: &str) {
        let mut channels = self.channels.lock();
        let exists = channels
            .iter()
            .any(|b| b.provider.name() == provider.name() && b.channel_id == channel_id);
        if !exists {
            channels.push(ChannelBinding {
                provider,
                channel_id: channel_id.to_string(),
            });
        }
    }

    /// Snapshot of the broadcast list. Callers iterate the copy so no
    /// provider send ever happens under the lock.
    pub fn channels(&self) -> Vec<ChannelBinding> {
        self.channels.lock().clone()
    }

    /// Tag and forward one line of input to the LLM.
    pub async fn send_input(&self, source: &str, raw: &str) -> Result<()> {
        let formatted = self.merger.format_message(source, raw);
        self.llm
            .send(LlmInput {
                source: source.to_string(),
                content: formatted,
            })
            .await
    }
}

pub struct SessionRegistry {
    sessions: tokio::sync::Mutex<HashMap<String, Arc<Session>>>,
    factory: AgentFactory,
    policy: OutputPolicy,
    root_cancel: CancellationToken,
}

impl SessionRegistry {
    pub fn new(factory: AgentFactory, policy: OutputPolicy, root_cancel: CancellationToken) -> Self {
        Self {
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            factory,
            policy,
            root_cancel,
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(name).cloned()
    }

    /// Whether a running session exists for `name`.
    pub async fn is_active(&self, name: &str) -> bool {
        match self.get(name).await {
            Some(s) => s.llm.running(),
            None => false,
        }
    }

    /// Resolve the live session for `name`, creating it when absent or
    /// dead. The caller's channel is bound either way.
    pub async fn get_or_create(
        &self,
        name: &str,
        spec: &SpawnSpec,
        provider: Arc<dyn ChatProvider>,
        channel_id: &str,
    ) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions.get(name) {
            if existing.llm.running() {
                existing.add_channel(provider, channel_id);
                return Ok(Arc::clone(existing));
            }
            // Dead subprocess: release the stale pump and rebuild.
            existing.cancel.cancel();
            sessions.remove(name);
        }

        let llm = (self.factory)(spec)?;
        let cancel = self.root_cancel.child_token();
        if let Err(e) = llm.start().await {
            cancel.cancel();
            return Err(e);
        }

        // Best effort: a missing git repo is not fatal.
        let git_info = cr_git::detect_repo(&spec.working_dir).await.ok();

        let session = Arc::new(Session {
            name: name.to_string(),
            llm,
            channels: Mutex::new(vec![ChannelBinding {
                provider,
                channel_id: channel_id.to_string(),
            }]),
            merger: SourceMerger::default(),
            cancel,
            git_info,
        });

        pump::spawn_output_pump(Arc::clone(&session), self.policy.clone());
        sessions.insert(name.to_string(), Arc::clone(&session));
        tracing::info!(repo = name, backend = session.llm.name(), "session started");
        Ok(session)
    }

    /// Stop and forget the session for `name`. The next inbound message
    /// re-creates it. Returns whether a session was present.
    pub async fn restart(&self, name: &str) -> bool {
        let removed = self.sessions.lock().await.remove(name);
        match removed {
            Some(session) => {
                session.llm.stop().await;
                session.cancel.cancel();
                tracing::info!(repo = name, "session stopped for restart");
                true
            }
            None => false,
        }
    }

    /// Interrupt the session's subprocess without ending the session.
    /// `Ok(true)` when an interrupt was delivered, `Ok(false)` when no
    /// running session exists.
    pub async fn interrupt(&self, name: &str) -> Result<bool> {
        match self.get(name).await {
            Some(session) if session.llm.running() => {
                session.llm.cancel()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Remove every running session idle for longer than `timeout` and
    /// return them. Teardown (stop, cancel, notify) is the caller's job,
    /// outside the lock.
    pub async fn remove_idle(&self, timeout: Duration) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.lock().await;
        let victims: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.llm.running() && s.llm.last_activity().elapsed() > timeout)
            .map(|(name, _)| name.clone())
            .collect();
        victims
            .iter()
            .filter_map(|name| sessions.remove(name))
            .collect()
    }

    /// Drain the registry, stopping every session. Safe to call twice.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, Arc<Session>)> =
            self.sessions.lock().await.drain().collect();
        for (name, session) in drained {
            session.llm.stop().await;
            session.cancel.cancel();
            tracing::info!(repo = name, "session stopped");
        }
    }
}
