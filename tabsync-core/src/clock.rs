//! Millisecond wall clock used to stamp envelopes and judge expiry.

use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Source of "now" in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock anchored once, then advanced by Tokio's monotonic clock.
///
/// Timestamps never go backwards within one context even if the system
/// clock is adjusted, and they follow paused Tokio time in tests.
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor_ms: u64,
    anchor: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let anchor_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            anchor_ms,
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.anchor_ms + self.anchor.elapsed().as_millis() as u64
    }
}
