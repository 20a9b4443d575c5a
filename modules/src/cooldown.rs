//! Per-user rate limiting

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks, per key, when a user may next be answered
#[derive(Debug, Default)]
pub struct Cooldowns {
    timeout: Duration,
    until: HashMap<String, Instant>,
}

impl Cooldowns {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            until: HashMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether `key` is still cooling down
    pub fn is_limited(&self, key: &str) -> bool {
        self.until
            .get(key)
            .map(|until| *until > Instant::now())
            .unwrap_or(false)
    }

    /// Start the cooldown for `key`
    pub fn start(&mut self, key: &str) {
        self.until.insert(key.to_string(), Instant::now() + self.timeout);
    }

    /// Change the timeout, shifting running cooldowns by the difference
    pub fn set_timeout(&mut self, timeout: Duration) {
        let old = self.timeout;
        for until in self.until.values_mut() {
            *until = if timeout >= old {
                *until + (timeout - old)
            } else {
                until.checked_sub(old - timeout).unwrap_or(*until)
            };
        }
        self.timeout = timeout;
    }
}
