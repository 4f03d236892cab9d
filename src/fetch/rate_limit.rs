//! Per-base-host rate limiter for the Fetcher (C3).
//!
//! Grounded in the teacher's `middleware/rate_limit.rs` sliding-window
//! pattern, adapted here to a minimum-inter-request-interval model per
//! spec.md §4.3: "per-base-host minimum inter-request interval of
//! `60/CRAWL_RATE_LIMIT_PER_DOMAIN` seconds."

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct DomainRateLimiter {
    interval: Duration,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl DomainRateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let requests_per_minute = requests_per_minute.max(1);
        Self {
            interval: Duration::from_secs_f64(60.0 / requests_per_minute as f64),
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Blocks the caller until the per-domain interval has elapsed since the
    /// last request to `host`, then records this request's time.
    pub async fn acquire(&self, host: &str) {
        let wait = {
            let mut map = self.last_request.lock();
            let now = Instant::now();
            let next_allowed = map.get(host).copied().unwrap_or(now);
            let slot = next_allowed.max(now);
            map.insert(host.to_string(), slot + self.interval);
            slot.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
