use std::path::PathBuf;
use std::time::Instant;

use tokio::io::AsyncRead;

use cr_domain::message::LlmInput;
use cr_domain::Result;

/// Everything needed to start one LLM subprocess.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Backend name, shown in `/status`.
    pub backend: String,
    /// Directory the subprocess runs in.
    pub working_dir: PathBuf,
    /// Binary to execute.
    pub binary: String,
    /// Extra argv appended at spawn (e.g. a resume flag). Whitespace
    /// separated; empty means none.
    pub resume_flag: String,
}

/// A live (or startable) LLM session.
///
/// Implementations own the subprocess and its bookkeeping; the registry
/// owns the implementation. All methods take `&self` so the handle can be
/// shared behind an `Arc`.
#[async_trait::async_trait]
pub trait LlmAgent: Send + Sync {
    /// Backend name for display.
    fn name(&self) -> &str;

    /// Start the subprocess. Fails if the binary cannot be spawned.
    async fn start(&self) -> Result<()>;

    /// Terminate the subprocess. Idempotent.
    async fn stop(&self);

    /// Whether the subprocess is currently alive.
    fn running(&self) -> bool;

    /// Deliver an interrupt (SIGINT) without ending the session. The
    /// subprocess is expected to recover.
    fn cancel(&self) -> Result<()>;

    /// Most recent activity: input accepted or output byte received.
    fn last_activity(&self) -> Instant;

    /// Advance the activity clock to now.
    fn update_activity(&self);

    /// Write one message to the subprocess's stdin. A trailing newline is
    /// appended when missing. Fails when not running.
    async fn send(&self, input: LlmInput) -> Result<()>;

    /// Take the subprocess's output byte stream. Single consumer: the
    /// first caller gets it, later calls return `None`. Readable until
    /// EOF, which the output pump treats as session end.
    fn take_output(&self) -> Option<Box<dyn AsyncRead + Send + Unpin>>;
}
