//! Inbound rate limiting.
//!
//! Two independent token buckets: per-user (keyed by author id) and
//! per-channel. Bridge commands are dispatched before this layer, so they
//! are never limited; sources without user identity (the terminal sends an
//! empty author id) skip the user bucket entirely.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use cr_domain::config::RateLimitConfig;
use cr_domain::message::InboundMessage;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A keyed token bucket: `rate` tokens per second, capped at `burst`.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucket {
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            rate,
            burst,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Refill the key's bucket for elapsed time, then try to take one
    /// token. New keys start at full burst.
    pub fn allow(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiter {
    enabled: bool,
    user: TokenBucket,
    channel: TokenBucket,
}

impl RateLimiter {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            user: TokenBucket::new(config.user_per_minute / 60.0, config.user_burst),
            channel: TokenBucket::new(config.channel_per_minute / 60.0, config.channel_burst),
        }
    }

    /// Returns the rejection to send inline when the message is over
    /// limit, or `None` to let it through.
    pub fn check(&self, msg: &InboundMessage) -> Option<String> {
        if !self.enabled {
            return None;
        }
        if !msg.author_id.is_empty() && !self.user.allow(&msg.author_id) {
            return Some(format!(
                "Rate limited: too many messages from {}. Try again in a moment.",
                msg.author
            ));
        }
        if !self.channel.allow(&msg.channel_id) {
            return Some("Rate limited: this channel is sending too fast. Try again in a moment.".to_string());
        }
        None
    }
}
