//! Multi-window rate limiter.
//!
//! Each window is a pool of `capacity` permits. A hit takes one permit from
//! every window in order, and each permit returns to its pool on its own
//! once that window's period has elapsed. Permits already taken are not
//! handed back if a later window makes the caller wait, so a slow window can
//! hold quota of a faster one for a while.

use std::sync::Arc;
use std::time::Duration;

use stashfetch_core::config::RateWindowConfig;
use tokio::sync::Semaphore;

/// At most `capacity` hits per `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub capacity: usize,
    pub period: Duration,
}

impl Window {
    pub fn new(capacity: usize, period: Duration) -> Self {
        Self { capacity, period }
    }
}

impl From<&RateWindowConfig> for Window {
    fn from(config: &RateWindowConfig) -> Self {
        Self::new(config.capacity, config.period())
    }
}

#[derive(Debug)]
struct Pool {
    permits: Arc<Semaphore>,
    period: Duration,
}

/// Rate limiter enforcing every configured window at once.
#[derive(Debug)]
pub struct RateLimiter {
    pools: Vec<Pool>,
}

impl RateLimiter {
    /// Build a limiter from `windows`. A zero-capacity window is treated as
    /// capacity 1, since it could otherwise never grant.
    pub fn new(windows: impl IntoIterator<Item = Window>) -> Self {
        let pools = windows
            .into_iter()
            .map(|w| Pool { permits: Arc::new(Semaphore::new(w.capacity.max(1))), period: w.period })
            .collect();
        Self { pools }
    }

    pub fn from_config(windows: &[RateWindowConfig]) -> Self {
        Self::new(windows.iter().map(Window::from))
    }

    /// Wait until every window has room, spending one permit from each.
    pub async fn hit(&self) {
        for pool in &self.pools {
            let Ok(permit) = Arc::clone(&pool.permits).acquire_owned().await else {
                continue;
            };
            let period = pool.period;
            tokio::spawn(async move {
                tokio::time::sleep(period).await;
                drop(permit);
            });
        }
    }

    /// Permits currently free in each window, in configuration order.
    pub fn available(&self) -> Vec<usize> {
        self.pools.iter().map(|p| p.permits.available_permits()).collect()
    }
}
