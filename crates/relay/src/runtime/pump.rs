//! Per-session output pump.
//!
//! Drains the LLM's byte stream and fans chunks out to every bound
//! channel. An inner task owns the reads and feeds a bounded channel, so
//! a slow broadcast can only ever block the subprocess pipe, never the
//! flush ticker. Chunks are produced either by the 500 ms ticker (low
//! latency during slow output) or by the byte threshold (bounded message
//! size during bursts), and always delivered in production order.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use cr_llm::LlmAgent;
use cr_providers::ChatProvider;

use super::output::OutputPolicy;
use super::sessions::Session;

const FLUSH_INTERVAL: Duration = Duration::from_millis(500);
const READ_QUEUE_CAPACITY: usize = 100;

/// Spawn the pump pair (reader + broadcaster) for a freshly created
/// session. Does nothing if the session's output stream was already
/// taken.
pub fn spawn_output_pump(session: Arc<Session>, policy: OutputPolicy) {
    let Some(output) = session.llm.take_output() else {
        tracing::warn!(repo = %session.name, "LLM output stream unavailable, pump not started");
        return;
    };

    let (tx, rx) = mpsc::channel::<(String, Option<std::io::Error>)>(READ_QUEUE_CAPACITY);

    tokio::spawn(read_lines(output, tx));
    tokio::spawn(pump_loop(session, policy, rx));
}

/// Inner reader: one line per queue entry. Blocking on a full queue is
/// intended; it pushes backpressure into the subprocess pipe.
async fn read_lines(
    output: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
    tx: mpsc::Sender<(String, Option<std::io::Error>)>,
) {
    let mut reader = BufReader::new(output);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send((line, None)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                let _ = tx.send((line, Some(e))).await;
                break;
            }
        }
    }
}

async fn pump_loop(
    session: Arc<Session>,
    policy: OutputPolicy,
    mut rx: mpsc::Receiver<(String, Option<std::io::Error>)>,
) {
    let mut buffer = String::new();
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => break,

            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    broadcast(&session, &policy, &buffer).await;
                    buffer.clear();
                }
            }

            item = rx.recv() => match item {
                Some((line, None)) => {
                    buffer.push_str(&line);
                    session.llm.update_activity();
                    if buffer.len() > policy.threshold() {
                        broadcast(&session, &policy, &buffer).await;
                        buffer.clear();
                    }
                }
                Some((partial, Some(e))) => {
                    buffer.push_str(&partial);
                    if !buffer.is_empty() {
                        broadcast(&session, &policy, &buffer).await;
                        buffer.clear();
                    }
                    tracing::warn!(repo = %session.name, error = %e, "LLM output read failed");
                    break;
                }
                None => {
                    if !buffer.is_empty() {
                        broadcast(&session, &policy, &buffer).await;
                    }
                    break;
                }
            },
        }
    }
    tracing::debug!(repo = %session.name, "output pump stopped");
}

/// Deliver one chunk to every bound channel, sequentially, as inline text
/// or a named attachment per the policy. Send failures are logged and do
/// not abort the fan-out.
pub async fn broadcast(session: &Session, policy: &OutputPolicy, content: &str) {
    if content.is_empty() {
        return;
    }
    for binding in session.channels() {
        let result = if policy.should_attach(content) {
            let filename = policy.attachment_name();
            binding
                .provider
                .send_file(&binding.channel_id, &filename, content.as_bytes())
                .await
        } else {
            binding.provider.send(&binding.channel_id, content).await
        };
        if let Err(e) = result {
            tracing::warn!(
                repo = %session.name,
                provider = binding.provider.name(),
                channel = %binding.channel_id,
                error = %e,
                "broadcast send failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::sessions::{AgentFactory, SessionRegistry};
    use super::*;
    use cr_llm::testing::MockAgent;
    use cr_llm::SpawnSpec;
    use cr_providers::testing::MockProvider;
    use parking_lot::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        registry: SessionRegistry,
        agents: Arc<Mutex<Vec<Arc<MockAgent>>>>,
        writers: Arc<Mutex<Vec<tokio::io::DuplexStream>>>,
    }

    fn harness(threshold: usize) -> Harness {
        let agents: Arc<Mutex<Vec<Arc<MockAgent>>>> = Arc::new(Mutex::new(Vec::new()));
        let writers: Arc<Mutex<Vec<tokio::io::DuplexStream>>> = Arc::new(Mutex::new(Vec::new()));
        let factory: AgentFactory = {
            let agents = Arc::clone(&agents);
            let writers = Arc::clone(&writers);
            Arc::new(move |spec: &SpawnSpec| {
                let (agent, writer) = MockAgent::new(spec.backend.clone());
                agents.lock().push(Arc::clone(&agent));
                writers.lock().push(writer);
                Ok(agent as Arc<dyn cr_llm::LlmAgent>)
            })
        };
        Harness {
            registry: SessionRegistry::new(
                factory,
                OutputPolicy::new(threshold),
                CancellationToken::new(),
            ),
            agents,
            writers,
        }
    }

    fn spec() -> SpawnSpec {
        SpawnSpec {
            backend: "mock".into(),
            working_dir: std::env::temp_dir(),
            binary: "mock".into(),
            resume_flag: String::new(),
        }
    }

    // The lock is not held across the await: the writer is taken out,
    // written to, and put back.
    async fn write(h: &Harness, bytes: &[u8]) {
        let mut writer = h.writers.lock().remove(0);
        writer.write_all(bytes).await.unwrap();
        h.writers.lock().insert(0, writer);
    }

    #[tokio::test]
    async fn short_output_is_flushed_by_the_ticker_inline() {
        let h = harness(10);
        let prov = MockProvider::new("discord");
        h.registry
            .get_or_create("r1", &spec(), prov.clone(), "c1")
            .await
            .unwrap();

        write(&h, b"short\n").await;
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(prov.sent(), vec![("c1".to_string(), "short\n".to_string())]);
        assert!(prov.files().is_empty());
    }

    #[tokio::test]
    async fn oversized_output_is_flushed_immediately_as_a_file() {
        let h = harness(10);
        let prov = MockProvider::new("discord");
        h.registry
            .get_or_create("r1", &spec(), prov.clone(), "c1")
            .await
            .unwrap();

        let long = "this is a longer message that exceeds threshold\n";
        write(&h, long.as_bytes()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let files = prov.files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "c1");
        assert!(files[0].1.starts_with("response-"));
        assert_eq!(files[0].2, long.as_bytes());
        assert!(prov.sent().is_empty());
    }

    #[tokio::test]
    async fn chunks_arrive_in_production_order_on_every_channel() {
        let h = harness(1000);
        let discord = MockProvider::new("discord");
        let terminal = MockProvider::new("terminal");
        let session = h
            .registry
            .get_or_create("r1", &spec(), discord.clone(), "c1")
            .await
            .unwrap();
        session.add_channel(terminal.clone(), "t1");

        // Spaced past the flush interval so each line is its own chunk.
        write(&h, b"one\n").await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        write(&h, b"two\n").await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        write(&h, b"three\n").await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        for prov in [&discord, &terminal] {
            let contents: Vec<String> = prov.sent().into_iter().map(|(_, c)| c).collect();
            assert_eq!(contents, vec!["one\n", "two\n", "three\n"]);
        }
    }

    #[tokio::test]
    async fn output_advances_the_activity_clock() {
        let h = harness(100);
        let prov = MockProvider::new("discord");
        h.registry
            .get_or_create("r1", &spec(), prov, "c1")
            .await
            .unwrap();
        let agent = h.agents.lock()[0].clone();
        let before = agent.last_activity();

        tokio::time::sleep(Duration::from_millis(20)).await;
        write(&h, b"tick\n").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(agent.last_activity() > before);
    }

    #[tokio::test]
    async fn eof_flushes_the_remaining_buffer() {
        let h = harness(100);
        let prov = MockProvider::new("discord");
        h.registry
            .get_or_create("r1", &spec(), prov.clone(), "c1")
            .await
            .unwrap();

        write(&h, b"tail without newline").await;
        h.writers.lock().clear(); // drop the writer: EOF
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            prov.sent(),
            vec![("c1".to_string(), "tail without newline".to_string())]
        );
    }

    #[tokio::test]
    async fn cancellation_stops_the_pump() {
        let h = harness(100);
        let prov = MockProvider::new("discord");
        let session = h
            .registry
            .get_or_create("r1", &spec(), prov.clone(), "c1")
            .await
            .unwrap();

        session.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Output written after cancellation is never broadcast.
        write(&h, b"late\n").await;
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(prov.sent().is_empty());
    }

    #[tokio::test]
    async fn send_failures_do_not_abort_the_fanout() {
        let h = harness(100);
        let flaky = MockProvider::new("discord");
        let healthy = MockProvider::new("terminal");
        let session = h
            .registry
            .get_or_create("r1", &spec(), flaky.clone(), "c1")
            .await
            .unwrap();
        session.add_channel(healthy.clone(), "t1");
        flaky.fail_sends(true);

        write(&h, b"still delivered\n").await;
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert!(flaky.sent().is_empty());
        assert_eq!(healthy.sent().len(), 1);
    }
}
