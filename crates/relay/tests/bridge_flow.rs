//! End-to-end dispatch tests: inbound message -> router -> rate limiter
//! -> session registry -> merger -> LLM, with mock providers and a mock
//! LLM factory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use cr_domain::config::{Config, RateLimitConfig, RepoConfig};
use cr_llm::testing::MockAgent;
use cr_llm::{LlmAgent, SpawnSpec};
use cr_providers::testing::MockProvider;
use cr_providers::ChatProvider;
use cr_relay::runtime::handle_inbound;
use cr_relay::runtime::sessions::AgentFactory;
use cr_relay::state::RelayState;

struct Harness {
    state: Arc<RelayState>,
    discord: Arc<MockProvider>,
    terminal: Arc<MockProvider>,
    agents: Arc<Mutex<Vec<Arc<MockAgent>>>>,
    fail_start: Arc<std::sync::atomic::AtomicBool>,
    _dir: tempfile::TempDir,
}

fn repo(channel: &str) -> RepoConfig {
    RepoConfig {
        provider: "discord".into(),
        channel_id: channel.into(),
        working_dir: PathBuf::from("/src/repo"),
        llm_backend: None,
        git_root: None,
        branch: None,
    }
}

fn harness(repos: &[(&str, &str)], rate_limit: Option<RateLimitConfig>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    for (name, channel) in repos {
        config.repos.insert(name.to_string(), repo(channel));
    }
    if let Some(rl) = rate_limit {
        config.defaults.rate_limit = rl;
    }

    let discord = MockProvider::new("discord");
    let terminal = MockProvider::new("terminal");
    let mut providers: HashMap<String, Arc<dyn ChatProvider>> = HashMap::new();
    providers.insert("discord".into(), discord.clone());
    providers.insert("terminal".into(), terminal.clone());

    let agents: Arc<Mutex<Vec<Arc<MockAgent>>>> = Arc::new(Mutex::new(Vec::new()));
    let fail_start = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let factory: AgentFactory = {
        let agents = Arc::clone(&agents);
        let fail_start = Arc::clone(&fail_start);
        Arc::new(move |spec: &SpawnSpec| {
            let (agent, _writer) = MockAgent::new(spec.backend.clone());
            if fail_start.load(std::sync::atomic::Ordering::Acquire) {
                agent.fail_next_start();
            }
            agents.lock().push(Arc::clone(&agent));
            Ok(agent as Arc<dyn cr_llm::LlmAgent>)
        })
    };

    let state = RelayState::new(config, dir.path().join("relay.yaml"), providers, factory);
    Harness {
        state,
        discord,
        terminal,
        agents,
        fail_start,
        _dir: dir,
    }
}

fn strict_user_limit() -> RateLimitConfig {
    RateLimitConfig {
        enabled: true,
        user_per_minute: 0.001,
        user_burst: 1.0,
        channel_per_minute: 10_000.0,
        channel_burst: 1_000.0,
    }
}

async fn send_discord(h: &Harness, channel: &str, content: &str, author: &str, author_id: &str) {
    let provider: Arc<dyn ChatProvider> = h.discord.clone();
    let msg = h.discord.inbound(channel, content, author, author_id);
    handle_inbound(&h.state, &provider, msg).await;
}

async fn send_terminal(h: &Harness, content: &str) {
    let provider: Arc<dyn ChatProvider> = h.terminal.clone();
    let msg = h.terminal.inbound("terminal", content, "terminal", "");
    handle_inbound(&h.state, &provider, msg).await;
}

fn llm_inputs(h: &Harness) -> Vec<String> {
    h.agents
        .lock()
        .iter()
        .flat_map(|a| a.sent())
        .map(|i| i.content)
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1: bridge command on a bound channel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn help_command_replies_once_with_the_command_list() {
    let h = harness(&[("r1", "c1")], None);
    send_discord(&h, "c1", "/help", "alice", "u1").await;

    let sent = h.discord.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "c1");
    for needle in ["/status", "/cancel", "/restart", "/help"] {
        assert!(sent[0].1.contains(needle));
    }
    // No session was created for a bridge command.
    assert!(h.agents.lock().is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2: rate limiting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn second_message_in_the_window_is_rejected() {
    let h = harness(&[("r1", "c1")], Some(strict_user_limit()));
    send_discord(&h, "c1", "hello", "alice", "u1").await;
    send_discord(&h, "c1", "world", "alice", "u1").await;

    assert_eq!(llm_inputs(&h), vec!["hello"]);

    let sent = h.discord.sent();
    let rejections: Vec<&String> = sent
        .iter()
        .filter(|(_, c)| c.contains("Rate limited"))
        .map(|(_, c)| c)
        .collect();
    assert_eq!(rejections.len(), 1);
    assert!(rejections[0].contains("alice"));
}

#[tokio::test]
async fn different_author_on_the_same_channel_is_not_limited() {
    let h = harness(&[("r1", "c1")], Some(strict_user_limit()));
    send_discord(&h, "c1", "hello", "alice", "u1").await;
    send_discord(&h, "c1", "hi there", "bob", "u2").await;

    assert_eq!(llm_inputs(&h).len(), 2);
    assert!(h.discord.sent().iter().all(|(_, c)| !c.contains("Rate limited")));
}

#[tokio::test]
async fn terminal_messages_are_never_user_limited() {
    let h = harness(&[("r1", "c1")], Some(strict_user_limit()));
    for _ in 0..5 {
        send_terminal(&h, "keep going").await;
    }
    assert_eq!(llm_inputs(&h).len(), 5);
    assert!(h.terminal.sent().is_empty());
}

#[tokio::test]
async fn disabled_limiter_never_rejects() {
    let mut rl = strict_user_limit();
    rl.enabled = false;
    let h = harness(&[("r1", "c1")], Some(rl));
    for _ in 0..10 {
        send_discord(&h, "c1", "spam", "alice", "u1").await;
    }
    assert_eq!(llm_inputs(&h).len(), 10);
    assert!(h.discord.sent().iter().all(|(_, c)| !c.contains("Rate limited")));
}

#[tokio::test]
async fn bridge_commands_are_never_rate_limited() {
    let h = harness(&[("r1", "c1")], Some(strict_user_limit()));
    for _ in 0..5 {
        send_discord(&h, "c1", "/status", "alice", "u1").await;
    }
    let sent = h.discord.sent();
    assert_eq!(sent.len(), 5);
    assert!(sent.iter().all(|(_, c)| c.starts_with("LLM:")));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3: conflict tagging across two providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn concurrent_sources_are_tagged_from_the_second_message_on() {
    let h = harness(&[("r1", "c1")], None);

    send_discord(&h, "c1", "A", "alice", "u1").await;
    send_terminal(&h, "B").await;
    send_discord(&h, "c1", "C", "alice", "u1").await;

    assert_eq!(llm_inputs(&h), vec!["A", "[terminal] B", "[discord] C"]);

    // Both inbound paths landed on the same session.
    assert_eq!(h.agents.lock().len(), 1);
    let session = h.state.registry.get("r1").await.unwrap();
    assert_eq!(session.channels().len(), 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn unbound_channel_gets_a_config_error() {
    let h = harness(&[("r1", "c1")], None);
    send_discord(&h, "c99", "hello", "alice", "u1").await;

    assert_eq!(
        h.discord.sent(),
        vec![("c99".to_string(), "No repo configured for this channel".to_string())]
    );
    assert!(h.agents.lock().is_empty());
}

#[tokio::test]
async fn spawn_failure_is_reported_and_leaves_no_session() {
    let h = harness(&[("r1", "c1")], None);
    h.fail_start.store(true, std::sync::atomic::Ordering::Release);
    send_discord(&h, "c1", "hello", "alice", "u1").await;

    let sent = h.discord.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.starts_with("Error starting LLM:"));
    assert!(h.state.registry.get("r1").await.is_none());

    // Recovery on the next message.
    h.fail_start.store(false, std::sync::atomic::Ordering::Release);
    send_discord(&h, "c1", "hello again", "alice", "u1").await;
    assert!(h.state.registry.get("r1").await.is_some());
    assert_eq!(llm_inputs(&h), vec!["hello again"]);
}

#[tokio::test]
async fn send_failure_is_reported_but_the_session_survives() {
    let h = harness(&[("r1", "c1")], None);
    send_discord(&h, "c1", "first", "alice", "u1").await;
    h.agents.lock()[0].fail_sends(true);

    send_discord(&h, "c1", "second", "alice", "u1").await;

    let sent = h.discord.sent();
    assert!(sent.iter().any(|(_, c)| c.starts_with("Error:")));
    // The session was not torn down; /restart is the user's call.
    assert!(h.state.registry.get("r1").await.is_some());
    assert_eq!(h.agents.lock().len(), 1);
}

#[tokio::test]
async fn one_session_per_repo_across_many_messages() {
    let h = harness(&[("r1", "c1"), ("r2", "c2")], None);
    for i in 0..5 {
        send_discord(&h, "c1", &format!("msg {i}"), "alice", "u1").await;
        send_discord(&h, "c2", &format!("msg {i}"), "bob", "u2").await;
    }
    assert_eq!(h.agents.lock().len(), 2);
    assert!(h.state.registry.get("r1").await.is_some());
    assert!(h.state.registry.get("r2").await.is_some());
}

#[tokio::test]
async fn restart_then_message_creates_a_fresh_session() {
    let h = harness(&[("r1", "c1")], None);
    send_discord(&h, "c1", "first", "alice", "u1").await;
    send_discord(&h, "c1", "/restart", "alice", "u1").await;

    assert!(h.state.registry.get("r1").await.is_none());
    assert_eq!(h.agents.lock()[0].stop_count(), 1);

    send_discord(&h, "c1", "again", "alice", "u1").await;
    assert_eq!(h.agents.lock().len(), 2);
    let session = h.state.registry.get("r1").await.unwrap();
    assert!(session.llm.running());
}

#[tokio::test]
async fn unknown_slash_words_reach_the_llm_not_the_command_table() {
    let h = harness(&[("r1", "c1")], None);
    send_discord(&h, "c1", "/compact", "alice", "u1").await;
    send_discord(&h, "c1", "::status", "alice", "u1").await;

    assert_eq!(llm_inputs(&h), vec!["/compact", "/status"]);
    assert!(h.discord.sent().is_empty());
}
