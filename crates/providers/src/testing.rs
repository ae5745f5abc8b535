//! Scripted provider double for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use cr_domain::message::InboundMessage;
use cr_domain::{Error, Result};

use crate::traits::ChatProvider;

/// Records every outbound send and lets tests inject inbound messages.
pub struct MockProvider {
    name: String,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    sent: Mutex<Vec<(String, String)>>,
    files: Mutex<Vec<(String, String, Vec<u8>)>>,
    fail_sends: AtomicBool,
    stopped: AtomicBool,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        Arc::new(Self {
            name: name.into(),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            sent: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Sender handle for injecting inbound messages.
    pub fn injector(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Build an inbound message as this provider would stamp it.
    pub fn inbound(&self, channel_id: &str, content: &str, author: &str, author_id: &str) -> InboundMessage {
        InboundMessage {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
            author: author.to_string(),
            author_id: author_id.to_string(),
            source: self.name.clone(),
        }
    }

    /// `(channel_id, content)` pairs, in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    /// `(channel_id, filename, bytes)` triples, in send order.
    pub fn files(&self) -> Vec<(String, String, Vec<u8>)> {
        self.files.lock().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
        self.files.lock().clear();
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    async fn send(&self, channel_id: &str, content: &str) -> Result<()> {
        if self.fail_sends.load(Ordering::Acquire) {
            return Err(Error::Transport("mock send failure".into()));
        }
        self.sent
            .lock()
            .push((channel_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn send_file(&self, channel_id: &str, filename: &str, bytes: &[u8]) -> Result<()> {
        if self.fail_sends.load(Ordering::Acquire) {
            return Err(Error::Transport("mock send failure".into()));
        }
        self.files
            .lock()
            .push((channel_id.to_string(), filename.to_string(), bytes.to_vec()));
        Ok(())
    }

    fn take_messages(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().take()
    }
}
