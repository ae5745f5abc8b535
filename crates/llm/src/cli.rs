//! CLI subprocess backend.
//!
//! Spawns the coding-agent binary with piped stdio in the repo's working
//! directory. The child is owned by a supervisor task; the handle keeps a
//! stdin sender, a kill sender and the child's pid, so every method works
//! through `&self`. Stderr is drained into the log so a chatty agent can
//! never fill the pipe and stall.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tokio::sync::mpsc;

use cr_domain::message::LlmInput;
use cr_domain::{Error, Result};

use crate::traits::{LlmAgent, SpawnSpec};

pub struct CliAgent {
    spec: SpawnSpec,
    /// Shared with the supervisor task, which clears it on child exit.
    running: Arc<AtomicBool>,
    pid: Mutex<Option<i32>>,
    last_activity: Mutex<Instant>,
    stdin_tx: Mutex<Option<mpsc::Sender<String>>>,
    kill_tx: Mutex<Option<mpsc::Sender<()>>>,
    stdout: Mutex<Option<ChildStdout>>,
}

impl CliAgent {
    pub fn new(spec: &SpawnSpec) -> Self {
        Self {
            spec: spec.clone(),
            running: Arc::new(AtomicBool::new(false)),
            pid: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            stdin_tx: Mutex::new(None),
            kill_tx: Mutex::new(None),
            stdout: Mutex::new(None),
        }
    }

    fn argv(&self) -> Vec<String> {
        self.spec
            .resume_flag
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

#[async_trait::async_trait]
impl LlmAgent for CliAgent {
    fn name(&self) -> &str {
        &self.spec.backend
    }

    async fn start(&self) -> Result<()> {
        let mut cmd = Command::new(&self.spec.binary);
        cmd.args(self.argv())
            .current_dir(&self.spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::Spawn(format!(
                "{} in {}: {e}",
                self.spec.binary,
                self.spec.working_dir.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("child stdout unavailable".into()))?;
        let stderr = child.stderr.take();

        *self.pid.lock() = child.id().map(|p| p as i32);
        *self.stdout.lock() = Some(stdout);
        *self.last_activity.lock() = Instant::now();

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);
        *self.stdin_tx.lock() = Some(stdin_tx);

        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
        *self.kill_tx.lock() = Some(kill_tx);

        // Stdin writer: serializes all sends onto the pipe.
        let backend = self.spec.backend.clone();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = stdin_rx.recv().await {
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    tracing::warn!(backend = %backend, error = %e, "LLM stdin write failed");
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    tracing::warn!(backend = %backend, error = %e, "LLM stdin flush failed");
                    break;
                }
            }
        });

        // Stderr drain: agent diagnostics go to our log, not a full pipe.
        if let Some(stderr) = stderr {
            let backend = self.spec.backend.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(backend = %backend, "llm stderr: {line}");
                }
            });
        }

        // Supervisor: owns the child, observes exit, performs kills.
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let backend = self.spec.backend.clone();
        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx.recv() => None,
            };
            match exited {
                Some(Ok(status)) => {
                    running.store(false, Ordering::Release);
                    tracing::info!(backend = %backend, status = %status, "LLM subprocess exited");
                }
                Some(Err(e)) => {
                    running.store(false, Ordering::Release);
                    tracing::warn!(backend = %backend, error = %e, "waiting on LLM subprocess");
                }
                // Kill requested; the select dropped the wait future, so
                // the child is free to be killed and reaped here.
                None => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    running.store(false, Ordering::Release);
                    tracing::info!(backend = %backend, "LLM subprocess stopped");
                }
            }
        });

        tracing::info!(
            backend = %self.spec.backend,
            binary = %self.spec.binary,
            dir = %self.spec.working_dir.display(),
            "LLM subprocess started"
        );
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let kill_tx = self.kill_tx.lock().clone();
        if let Some(tx) = kill_tx {
            let _ = tx.try_send(());
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn cancel(&self) -> Result<()> {
        if !self.running() {
            return Err(Error::Llm("not running".into()));
        }
        let pid = (*self.pid.lock()).ok_or_else(|| Error::Llm("no child pid".into()))?;
        kill(Pid::from_raw(pid), Signal::SIGINT)
            .map_err(|e| Error::Llm(format!("sending SIGINT: {e}")))
    }

    fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    fn update_activity(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    async fn send(&self, input: LlmInput) -> Result<()> {
        if !self.running() {
            return Err(Error::Llm("not running".into()));
        }
        let tx = self
            .stdin_tx
            .lock()
            .clone()
            .ok_or_else(|| Error::Llm("not started".into()))?;
        let mut line = input.content;
        if !line.ends_with('\n') {
            line.push('\n');
        }
        tx.send(line)
            .await
            .map_err(|_| Error::Llm("stdin closed".into()))?;
        self.update_activity();
        Ok(())
    }

    fn take_output(&self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.stdout
            .lock()
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn cat_spec() -> SpawnSpec {
        SpawnSpec {
            backend: "cat".into(),
            working_dir: std::env::temp_dir(),
            binary: "cat".into(),
            resume_flag: String::new(),
        }
    }

    #[tokio::test]
    async fn echoes_input_through_the_subprocess() {
        let agent = CliAgent::new(&cat_spec());
        agent.start().await.unwrap();
        assert!(agent.running());

        let mut output = agent.take_output().unwrap();
        assert!(agent.take_output().is_none(), "output is single-consumer");

        agent
            .send(LlmInput {
                source: "test".into(),
                content: "hello".into(),
            })
            .await
            .unwrap();

        let mut buf = [0u8; 6];
        output.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello\n");

        agent.stop().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!agent.running());
    }

    #[tokio::test]
    async fn send_fails_when_not_running() {
        let agent = CliAgent::new(&cat_spec());
        let err = agent
            .send(LlmInput {
                source: "test".into(),
                content: "x".into(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not running"));
    }

    #[tokio::test]
    async fn start_fails_for_missing_binary() {
        let spec = SpawnSpec {
            backend: "ghost".into(),
            working_dir: std::env::temp_dir(),
            binary: "definitely-not-a-real-binary-xyz".into(),
            resume_flag: String::new(),
        };
        let agent = CliAgent::new(&spec);
        assert!(agent.start().await.is_err());
        assert!(!agent.running());
    }

    #[tokio::test]
    async fn cancel_requires_running() {
        let agent = CliAgent::new(&cat_spec());
        assert!(agent.cancel().is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let agent = CliAgent::new(&cat_spec());
        agent.start().await.unwrap();
        agent.stop().await;
        agent.stop().await;
        assert!(!agent.running());
    }

    #[test]
    fn resume_flag_splits_into_argv() {
        let mut spec = cat_spec();
        spec.resume_flag = "--continue --verbose".into();
        let agent = CliAgent::new(&spec);
        assert_eq!(agent.argv(), vec!["--continue", "--verbose"]);
        spec.resume_flag = String::new();
        assert!(CliAgent::new(&spec).argv().is_empty());
    }
}
