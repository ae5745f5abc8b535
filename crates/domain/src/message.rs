//! Messages crossing the provider and LLM capability boundaries.

/// One message received from a chat surface.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Provider-scoped channel identifier the message arrived on.
    pub channel_id: String,
    /// Raw message text.
    pub content: String,
    /// Display name of the sender.
    pub author: String,
    /// Stable unique per-user identifier. Empty for sources without a
    /// concept of user identity (the local terminal).
    pub author_id: String,
    /// Name of the provider that produced the message.
    pub source: String,
}

/// One line of input bound for an LLM session.
#[derive(Debug, Clone)]
pub struct LlmInput {
    /// Name of the provider the input originated from.
    pub source: String,
    /// The text to write to the LLM, already source-tagged if needed.
    pub content: String,
}
