use std::{collections::HashMap, sync::Arc, time::Duration};

use shared::domain::UserId;
use tokio::{sync::Mutex, time::Instant};

pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    count: u32,
}

/// Fixed one-minute window per sender.
///
/// Counters are process-local and never persisted. Several server processes
/// each enforce their own budget; a shared counter would be needed to bound
/// a sender across all of them.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<UserId, Window>>>,
    max_per_window: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn per_minute(max_per_window: u32) -> Self {
        Self::new(max_per_window, WINDOW)
    }

    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            max_per_window,
            window,
        }
    }

    pub async fn check(&self, sender: UserId) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(sender).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) > self.window {
            *entry = Window {
                started_at: now,
                count: 1,
            };
            return true;
        }
        if entry.count >= self.max_per_window {
            return false;
        }
        entry.count += 1;
        true
    }

    pub async fn purge_expired(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| now.duration_since(w.started_at) <= self.window);
    }

    pub async fn tracked_senders(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rejects_after_budget_until_window_elapses() {
        let limiter = RateLimiter::per_minute(3);
        let alice = UserId(1);

        for _ in 0..3 {
            assert!(limiter.check(alice).await);
        }
        assert!(!limiter.check(alice).await);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!limiter.check(alice).await, "window is inclusive of 60s");

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(limiter.check(alice).await);
        assert!(limiter.check(alice).await);
        assert!(limiter.check(alice).await);
        assert!(!limiter.check(alice).await);
    }

    #[tokio::test(start_paused = true)]
    async fn senders_are_independent() {
        let limiter = RateLimiter::per_minute(1);
        assert!(limiter.check(UserId(1)).await);
        assert!(!limiter.check(UserId(1)).await);
        assert!(limiter.check(UserId(2)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_expired_windows() {
        let limiter = RateLimiter::per_minute(5);
        limiter.check(UserId(1)).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.check(UserId(2)).await;
        tokio::time::advance(Duration::from_secs(45)).await;

        limiter.purge_expired().await;
        assert_eq!(limiter.tracked_senders().await, 1);
    }
}
