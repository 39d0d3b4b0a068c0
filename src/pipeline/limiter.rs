//! Process-wide fixed-window usage limiter

use super::{GatewayRequest, Next, Stage, StageResult};
use crate::error::GatewayError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug)]
struct Window {
    start: Instant,
    count: u64,
}

/// Counts requests per window; the window restarts once `interval` has passed.
#[derive(Debug)]
pub struct UsageLimiter {
    interval: Duration,
    max_count: u64,
    window: Mutex<Window>,
}

impl UsageLimiter {
    pub fn new(interval: Duration, max_count: u64) -> Self {
        Self {
            interval,
            max_count,
            window: Mutex::new(Window {
                start: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Count one request; false once the window's budget is spent
    pub fn admit(&self) -> bool {
        self.admit_at(Instant::now())
    }

    pub fn admit_at(&self, now: Instant) -> bool {
        let mut window = self.window.lock();
        if now > window.start + self.interval {
            window.start = now;
            window.count = 0;
        }
        window.count += 1;
        window.count <= self.max_count
    }
}

#[async_trait]
impl Stage for UsageLimiter {
    fn name(&self) -> &'static str {
        "usage_limiter"
    }

    async fn handle(&self, request: GatewayRequest, next: Next<'_>) -> StageResult {
        if !self.admit() {
            crate::metrics::record_rate_limited();
            warn!(path = %request.path, "Usage limit exceeded");
            return Err(GatewayError::RateLimited("Exceeded usage limit".into()));
        }
        next.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_budget() {
        let limiter = UsageLimiter::new(Duration::from_secs(10), 3);
        let start = Instant::now();

        assert!(limiter.admit_at(start));
        assert!(limiter.admit_at(start));
        assert!(limiter.admit_at(start));
        assert!(!limiter.admit_at(start));
        assert!(!limiter.admit_at(start + Duration::from_secs(5)));
    }

    #[test]
    fn test_window_resets_after_interval() {
        let limiter = UsageLimiter::new(Duration::from_secs(10), 1);
        let start = Instant::now();

        assert!(limiter.admit_at(start));
        assert!(!limiter.admit_at(start));
        // The boundary itself still belongs to the old window
        assert!(!limiter.admit_at(start + Duration::from_secs(10)));
        assert!(limiter.admit_at(start + Duration::from_secs(21)));
        assert!(!limiter.admit_at(start + Duration::from_secs(21)));
    }

    #[test]
    fn test_shared_across_threads() {
        let limiter = std::sync::Arc::new(UsageLimiter::new(Duration::from_secs(60), 100));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..50).filter(|_| limiter.admit()).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }
}
