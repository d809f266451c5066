//! Per-host politeness delay.
//!
//! Every request to a host reserves the next free slot (`last + min_delay`)
//! under the lock, then sleeps until that slot outside the lock. Concurrent
//! callers for the same host are therefore spaced `min_delay` apart while
//! different hosts never wait on each other.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

pub struct PolitenessLimiter {
    min_delay: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl PolitenessLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// A limiter that never waits.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Waits until a request to `host` is allowed and reserves it.
    pub async fn acquire(&self, host: &str) {
        if self.min_delay.is_zero() {
            return;
        }
        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match slots.get(host) {
                Some(next) if *next > now => *next,
                _ => now,
            };
            slots.insert(host.to_string(), slot + self.min_delay);
            slot
        };
        if slot > Instant::now() {
            tracing::debug!(
                %host,
                wait_ms = (slot - Instant::now()).as_millis() as u64,
                "politeness delay"
            );
            tokio::time::sleep_until(slot).await;
        }
    }
}
