//! Local terminal provider.
//!
//! A readline loop on a blocking task feeds the inbound stream; outbound
//! sends print to stdout. The terminal has no per-user identity, so
//! `author_id` stays empty and the user-level rate limiter never applies.
//! Which repo terminal lines target is the orchestrator's business (the
//! `/select` command), not this provider's.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use cr_domain::message::InboundMessage;
use cr_domain::Result;

use crate::traits::ChatProvider;

pub struct TerminalProvider {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    stopped: Arc<AtomicBool>,
}

impl TerminalProvider {
    pub const NAME: &'static str = "terminal";

    /// Channel id stamped on every line read from stdin.
    pub const CHANNEL: &'static str = "terminal";

    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for TerminalProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ChatProvider for TerminalProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let tx = self.inbound_tx.clone();
        let stopped = Arc::clone(&self.stopped);

        // Readline blocks, so the loop lives on a blocking thread. Closing
        // the sender (by returning) ends the inbound stream, which the
        // orchestrator treats as shutdown.
        tokio::task::spawn_blocking(move || {
            let mut rl = match rustyline::DefaultEditor::new() {
                Ok(rl) => rl,
                Err(e) => {
                    eprintln!("terminal unavailable: {e}");
                    return;
                }
            };
            eprintln!("CodeRelay terminal. /help for commands, Ctrl+D to exit.");

            loop {
                if stopped.load(Ordering::Acquire) {
                    break;
                }
                match rl.readline("> ") {
                    Ok(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        rl.add_history_entry(&line).ok();
                        let msg = InboundMessage {
                            channel_id: TerminalProvider::CHANNEL.to_string(),
                            content: line,
                            author: "terminal".to_string(),
                            author_id: String::new(),
                            source: TerminalProvider::NAME.to_string(),
                        };
                        if tx.blocking_send(msg).is_err() {
                            break;
                        }
                    }
                    Err(rustyline::error::ReadlineError::Interrupted) => {
                        eprintln!("(Ctrl+D to exit)");
                    }
                    Err(rustyline::error::ReadlineError::Eof) => break,
                    Err(e) => {
                        eprintln!("readline error: {e}");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    async fn send(&self, _channel_id: &str, content: &str) -> Result<()> {
        println!("{content}");
        Ok(())
    }

    async fn send_file(&self, _channel_id: &str, filename: &str, bytes: &[u8]) -> Result<()> {
        let path = std::env::temp_dir().join(filename);
        tokio::fs::write(&path, bytes).await?;
        println!("[long response saved to {}]", path.display());
        Ok(())
    }

    fn take_messages(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().take()
    }
}
