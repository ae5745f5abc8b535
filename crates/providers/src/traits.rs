use tokio::sync::mpsc;

use cr_domain::message::InboundMessage;
use cr_domain::Result;

/// A chat surface the bridge can receive from and broadcast to.
///
/// Providers are capability sinks: they never see sessions or each other.
/// Send failures are the caller's to log; a provider must not retry into
/// its own inbound path.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable provider name ("discord", "terminal"). Used as the source
    /// tag on inbound messages and in channel-binding identity.
    fn name(&self) -> &str;

    /// Begin producing inbound messages. Called once at boot.
    async fn start(&self) -> Result<()>;

    /// Stop producing. Idempotent; closes the message stream.
    async fn stop(&self);

    /// Send a text message to a channel.
    async fn send(&self, channel_id: &str, content: &str) -> Result<()>;

    /// Send a file attachment to a channel.
    async fn send_file(&self, channel_id: &str, filename: &str, bytes: &[u8]) -> Result<()>;

    /// Take the inbound message stream. Single consumer: the first caller
    /// gets the receiver, later calls return `None`. The stream ends when
    /// the provider stops.
    fn take_messages(&self) -> Option<mpsc::Receiver<InboundMessage>>;
}
