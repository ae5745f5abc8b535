//! Inline-vs-attachment policy for broadcast chunks.

#[derive(Debug, Clone)]
pub struct OutputPolicy {
    threshold: usize,
}

impl OutputPolicy {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Chunks longer than the threshold become file attachments instead
    /// of inline messages.
    pub fn should_attach(&self, content: &str) -> bool {
        content.len() > self.threshold
    }

    /// Attachment filename for one broadcast chunk.
    pub fn attachment_name(&self) -> String {
        format!("response-{}.md", chrono::Local::now().format("%H%M%S"))
    }
}
