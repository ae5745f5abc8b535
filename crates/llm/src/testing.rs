//! Scripted LLM double for tests.
//!
//! The mock records every `send`, exposes a writable end of its output
//! stream so tests can emit "subprocess output", and lets tests flip the
//! running flag and rewind the activity clock.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, DuplexStream};

use cr_domain::message::LlmInput;
use cr_domain::{Error, Result};

use crate::traits::LlmAgent;

pub struct MockAgent {
    name: String,
    running: AtomicBool,
    last_activity: Mutex<Instant>,
    sent: Mutex<Vec<LlmInput>>,
    output: Mutex<Option<DuplexStream>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    cancels: AtomicUsize,
    fail_start: AtomicBool,
    fail_send: AtomicBool,
}

impl MockAgent {
    /// Build a mock plus the write half of its output stream. Dropping
    /// the writer produces EOF on the pump side.
    pub fn new(name: impl Into<String>) -> (Arc<Self>, DuplexStream) {
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        let agent = Arc::new(Self {
            name: name.into(),
            running: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            sent: Mutex::new(Vec::new()),
            output: Mutex::new(Some(reader)),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            fail_start: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
        });
        (agent, writer)
    }

    pub fn sent(&self) -> Vec<LlmInput> {
        self.sent.lock().clone()
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn set_last_activity(&self, at: Instant) {
        *self.last_activity.lock() = at;
    }

    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::Release);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::Release);
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::Acquire)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::Acquire)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl LlmAgent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::AcqRel);
        if self.fail_start.swap(false, Ordering::AcqRel) {
            return Err(Error::Spawn("mock start failure".into()));
        }
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::AcqRel);
        self.running.store(false, Ordering::Release);
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn cancel(&self) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    fn update_activity(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    async fn send(&self, input: LlmInput) -> Result<()> {
        if self.fail_send.load(Ordering::Acquire) {
            return Err(Error::Llm("mock send failure".into()));
        }
        if !self.running() {
            return Err(Error::Llm("not running".into()));
        }
        self.sent.lock().push(input);
        self.update_activity();
        Ok(())
    }

    fn take_output(&self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.output
            .lock()
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>)
    }
}
