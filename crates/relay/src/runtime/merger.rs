//! Source tagging for concurrent multi-channel input.
//!
//! Each session owns one merger. While more than one source is active
//! inside the conflict window, every LLM-bound message carries a
//! `[source]` prefix, so the LLM never sees an unattributed line during
//! multi-source activity. Note the deliberate asymmetry: the first
//! message of a burst goes through untagged, and the conflict it later
//! turns out to be part of tags everything from the second message on.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub const DEFAULT_CONFLICT_WINDOW: Duration = Duration::from_secs(2);

pub struct SourceMerger {
    window: Duration,
    sources: Mutex<HashMap<String, Instant>>,
}

impl SourceMerger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Record activity from `source` and return the content, prefixed
    /// with the source name when another source was active within the
    /// conflict window.
    pub fn format_message(&self, source: &str, content: &str) -> String {
        let mut sources = self.sources.lock();
        let now = Instant::now();
        sources.retain(|_, seen| now.duration_since(*seen) <= self.window);

        let in_conflict = sources.keys().any(|s| s != source);
        sources.insert(source.to_string(), now);

        if in_conflict {
            format!("[{source}] {content}")
        } else {
            content.to_string()
        }
    }
}

impl Default for SourceMerger {
    fn default() -> Self {
        Self::new(DEFAULT_CONFLICT_WINDOW)
    }
}
