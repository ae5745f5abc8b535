//! Orchestration runtime: routing, tagging, limiting, sessions, output
//! fan-out, and the per-provider inbound dispatch loops.

pub mod limiter;
pub mod merger;
pub mod output;
pub mod pump;
pub mod reaper;
pub mod router;
pub mod sessions;

use std::sync::Arc;

use tokio::sync::mpsc;

use cr_domain::message::InboundMessage;
use cr_providers::{ChatProvider, TerminalProvider};

use crate::commands;
use crate::state::RelayState;

/// Spawn one dispatch loop per provider. Each loop drains the provider's
/// inbound stream until it closes or the root scope is cancelled; a
/// single loop per provider keeps same-channel handling in arrival order.
pub fn spawn_dispatch_loops(state: &Arc<RelayState>) {
    for provider in state.providers.values() {
        let Some(rx) = provider.take_messages() else {
            tracing::warn!(provider = provider.name(), "message stream already taken");
            continue;
        };
        tokio::spawn(dispatch_loop(
            Arc::clone(state),
            Arc::clone(provider),
            rx,
        ));
    }
}

async fn dispatch_loop(
    state: Arc<RelayState>,
    provider: Arc<dyn ChatProvider>,
    mut rx: mpsc::Receiver<InboundMessage>,
) {
    loop {
        tokio::select! {
            _ = state.root_cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => handle_inbound(&state, &provider, msg).await,
                None => break,
            },
        }
    }
    tracing::debug!(provider = provider.name(), "dispatch loop stopped");

    // The local terminal closing (Ctrl+D) ends the whole bridge; a chat
    // backend dropping its stream only ends its own loop.
    if provider.name() == TerminalProvider::NAME {
        state.shutdown.notify_one();
    }
}

/// Handle one inbound message: bridge commands first (never rate
/// limited), then the LLM path.
pub async fn handle_inbound(
    state: &Arc<RelayState>,
    provider: &Arc<dyn ChatProvider>,
    msg: InboundMessage,
) {
    let route = router::parse(&msg.content);

    match route.kind {
        router::RouteKind::Command { ref name, ref args } => {
            let reply = commands::handle(state, provider, &msg, name, args).await;
            reply_to(provider, &msg.channel_id, &reply).await;
        }
        router::RouteKind::Llm => {
            if let Some(rejection) = state.limiter.check(&msg) {
                reply_to(provider, &msg.channel_id, &rejection).await;
                return;
            }

            let Some((repo_name, repo)) = state.resolve_repo(provider.name(), &msg.channel_id)
            else {
                reply_to(provider, &msg.channel_id, "No repo configured for this channel").await;
                return;
            };

            let spec = state.spawn_spec(&repo);
            let session = match state
                .registry
                .get_or_create(&repo_name, &spec, Arc::clone(provider), &repo.channel_id)
                .await
            {
                Ok(session) => session,
                Err(e) => {
                    reply_to(
                        provider,
                        &msg.channel_id,
                        &format!("Error starting LLM: {e}"),
                    )
                    .await;
                    return;
                }
            };

            if let Err(e) = session.send_input(provider.name(), &route.raw).await {
                reply_to(provider, &msg.channel_id, &format!("Error: {e}")).await;
            }
        }
    }
}

/// Best-effort reply on the originating channel. Failures are logged,
/// never propagated (reporting them would need another send).
async fn reply_to(provider: &Arc<dyn ChatProvider>, channel_id: &str, content: &str) {
    if content.is_empty() {
        return;
    }
    if let Err(e) = provider.send(channel_id, content).await {
        tracing::warn!(
            provider = provider.name(),
            channel = channel_id,
            error = %e,
            "reply failed"
        );
    }
}
