//! Fixed-window request limiter keyed by client address.
//!
//! Each key gets `limit` admissions per window. The window starts at the
//! first request for a key and resets wholesale once it has fully elapsed;
//! there is no carry-over between windows.
//!
//! A limit of zero closes the gate for every key.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started_at: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a request for `key` and report whether it is admitted.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// [`allow`](Self::allow) with an explicit clock reading.
    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        if self.limit == 0 {
            return false;
        }

        let mut windows = self.windows.lock();
        match windows.get_mut(key) {
            Some(w) if now.saturating_duration_since(w.started_at) <= self.window => {
                if w.count >= self.limit {
                    false
                } else {
                    w.count += 1;
                    true
                }
            }
            _ => {
                windows.insert(
                    key.to_string(),
                    Window {
                        count: 1,
                        started_at: now,
                    },
                );
                true
            }
        }
    }

    /// Drop every record whose window has elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, w| now.saturating_duration_since(w.started_at) <= self.window);
        before - windows.len()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_allows_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(10, MINUTE);
        let start = Instant::now();

        for i in 0..10 {
            assert!(
                limiter.allow_at("10.0.0.1", start + Duration::from_secs(i)),
                "request {} should be admitted",
                i + 1
            );
        }
        assert!(!limiter.allow_at("10.0.0.1", start + Duration::from_secs(30)));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(2, MINUTE);
        let now = Instant::now();

        assert!(limiter.allow_at("a", now));
        assert!(limiter.allow_at("a", now));
        assert!(!limiter.allow_at("a", now));

        assert!(limiter.allow_at("b", now));
        assert!(limiter.allow_at("b", now));
    }

    #[test]
    fn test_zero_limit_denies_everything() {
        let limiter = RateLimiter::new(0, MINUTE);
        let now = Instant::now();

        assert!(!limiter.allow_at("a", now));
        assert!(!limiter.allow_at("b", now));
        assert!(!limiter.allow_at("a", now + MINUTE * 2));
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_window_reset_after_expiry() {
        let limiter = RateLimiter::new(1, MINUTE);
        let start = Instant::now();

        assert!(limiter.allow_at("k", start));
        assert!(!limiter.allow_at("k", start + MINUTE));
        // Strictly past the window: fresh window, counter back to one.
        assert!(limiter.allow_at("k", start + MINUTE + Duration::from_millis(1)));
        assert!(!limiter.allow_at("k", start + MINUTE + Duration::from_millis(2)));
    }

    #[test]
    fn test_window_edge_is_a_hard_cliff() {
        let limiter = RateLimiter::new(1, MINUTE);
        let start = Instant::now();

        assert!(limiter.allow_at("k", start));
        assert!(!limiter.allow_at("k", start + Duration::from_nanos(1)));
        assert!(!limiter.allow_at("k", start + MINUTE - Duration::from_nanos(1)));
    }

    #[test]
    fn test_purge_expired_only_drops_elapsed_windows() {
        let limiter = RateLimiter::new(5, MINUTE);
        let start = Instant::now();

        limiter.allow_at("old", start);
        limiter.allow_at("fresh", start + Duration::from_secs(50));

        let removed = limiter.purge_expired_at(start + Duration::from_secs(90));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_keys(), 1);

        // The surviving window still counts earlier admissions.
        for _ in 0..4 {
            assert!(limiter.allow_at("fresh", start + Duration::from_secs(91)));
        }
        assert!(!limiter.allow_at("fresh", start + Duration::from_secs(92)));
    }

    #[test]
    fn test_concurrent_callers_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::new(100, MINUTE));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..50).filter(|_| limiter.allow_at("shared", now)).count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }
}
