//! Per-account submission counter.
//!
//! Fixed-window counting store scoped to one process. Each key's window is
//! checked and bumped under its DashMap shard lock, so concurrent submissions
//! for the same account cannot both slip past the limit.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Thread-safe fixed-window request counter.
pub struct RequestCounter {
    windows: DashMap<String, Window>,
    max_per_window: u32,
    window: Duration,
    enabled: bool,
}

impl RequestCounter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            max_per_window: config.max_submissions,
            window: Duration::from_secs(config.window_secs),
            enabled: config.enabled,
        }
    }

    /// Count one request for `key`.
    ///
    /// Returns `false` when the key has used up its window.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_at(key, Instant::now())
    }

    fn try_acquire_at(&self, key: &str, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }

        let mut window = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.max_per_window {
            return false;
        }
        window.count += 1;
        true
    }

    /// Drop windows that have fully expired.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, w| now.duration_since(w.started) < self.window);
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    fn counter(max: u32) -> RequestCounter {
        RequestCounter::new(&RateLimitConfig {
            enabled: true,
            max_submissions: max,
            window_secs: 60,
        })
    }

    #[test]
    fn test_limit_per_key() {
        let counter = counter(2);
        assert!(counter.try_acquire("acct-1"));
        assert!(counter.try_acquire("acct-1"));
        assert!(!counter.try_acquire("acct-1"));
        // Other keys are independent
        assert!(counter.try_acquire("acct-2"));
        assert_eq!(counter.len(), 2);
    }

    #[test]
    fn test_window_resets() {
        let counter = counter(1);
        let start = Instant::now();
        assert!(counter.try_acquire_at("acct-1", start));
        assert!(!counter.try_acquire_at("acct-1", start + Duration::from_secs(59)));
        assert!(counter.try_acquire_at("acct-1", start + Duration::from_secs(60)));
    }

    #[test]
    fn test_disabled_always_allows() {
        let counter = RequestCounter::new(&RateLimitConfig {
            enabled: false,
            max_submissions: 0,
            window_secs: 60,
        });
        assert!(counter.try_acquire("acct-1"));
        assert!(counter.is_empty());
    }

    #[test]
    fn test_concurrent_acquire_respects_limit() {
        let counter = Arc::new(counter(50));
        let granted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let counter = Arc::clone(&counter);
                let granted = Arc::clone(&granted);
                thread::spawn(move || {
                    for _ in 0..20 {
                        if counter.try_acquire("hot") {
                            granted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(granted.load(Ordering::SeqCst), 50);
    }
}
