//! Idle session reaper.
//!
//! A minute-ticker sweep. Victims are collected and removed from the
//! registry under its lock; stopping the subprocess and notifying the
//! bound channels happen strictly after removal, so a message arriving
//! mid-teardown creates a fresh session instead of racing the dying one,
//! and the reaper can never deadlock against an in-flight broadcast.

use std::sync::Arc;
use std::time::Duration;

use cr_llm::LlmAgent;
use cr_providers::ChatProvider;

use crate::state::RelayState;

use super::sessions::SessionRegistry;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub fn spawn_idle_reaper(state: Arc<RelayState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = state.root_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let timeout = state.idle_timeout();
                    sweep(&state.registry, timeout).await;
                }
            }
        }
    })
}

/// One reaper pass. Returns how many sessions were reaped.
pub async fn sweep(registry: &SessionRegistry, timeout: Duration) -> usize {
    let victims = registry.remove_idle(timeout).await;
    let count = victims.len();

    for session in victims {
        session.llm.stop().await;
        session.cancel.cancel();

        let note = format!("LLM stopped due to idle timeout ({})", fmt_duration(timeout));
        for binding in session.channels() {
            if let Err(e) = binding.provider.send(&binding.channel_id, &note).await {
                tracing::warn!(
                    repo = %session.name,
                    channel = %binding.channel_id,
                    error = %e,
                    "idle notification failed"
                );
            }
        }
        tracing::info!(repo = %session.name, "session reaped after idle timeout");
    }
    count
}

fn fmt_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
