use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Sliding-window request counter keyed by client address.
#[derive(Debug, Clone)]
pub struct IpRateLimiter {
    inner: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    window: Duration,
    max_requests: usize,
}

impl IpRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_requests,
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut guard = self.inner.lock();
        let window = self.window;
        guard.retain(|_, hits| {
            while hits
                .front()
                .is_some_and(|front| now.saturating_duration_since(*front) > window)
            {
                hits.pop_front();
            }
            !hits.is_empty()
        });

        let hits = guard.entry(key.to_string()).or_default();
        if hits.len() >= self.max_requests {
            return false;
        }
        hits.push_back(now);
        true
    }
}
