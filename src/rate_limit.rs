use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::project::RateLimitConfig;

/// Sliding-window webhook limiter keyed by project name
#[derive(Debug, Default)]
pub struct RateLimiter {
    /// tracks accepted request times per project
    requests: HashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request for `key` unless that would exceed `limit`.
    /// Returns `true` if the rate limit is exceeded, `false` otherwise.
    pub fn check_rate_limit(&mut self, key: &str, limit: RateLimitConfig) -> bool {
        self.check_at(key, limit, Instant::now())
    }

    fn check_at(&mut self, key: &str, limit: RateLimitConfig, now: Instant) -> bool {
        let window = Duration::from_secs(limit.window_secs);
        let timestamps = self.requests.entry(key.to_string()).or_default();

        while timestamps
            .front()
            .is_some_and(|&t| now.duration_since(t) >= window)
        {
            timestamps.pop_front();
        }

        if timestamps.len() < limit.max {
            timestamps.push_back(now);
            false
        } else {
            true
        }
    }
}
