//! Provider-internal rate discipline.
//!
//! Two cooperating pieces: [`RateBudget`] answers "may I call right now"
//! against a provider's published quota, and [`CallPacer`] serializes calls
//! from rate-strict sources with a minimum inter-call delay so bursts never
//! reach the upstream at all.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tokio::time::Instant;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Non-blocking quota check for a provider's own call budget.
#[derive(Clone)]
pub struct RateBudget {
    limiter: Arc<DirectRateLimiter>,
}

impl RateBudget {
    pub fn new(window: Duration, limit: u32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(quota_from_window(window, limit))),
        }
    }

    /// Consumes one cell of budget if available.
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// Serializes upstream calls with a minimum spacing between call starts.
///
/// Each caller claims the next free slot under the async mutex, then sleeps
/// until its slot without holding the lock, so N concurrent callers start
/// exactly `spacing` apart in claim order.
pub struct CallPacer {
    spacing: Duration,
    next_free: tokio::sync::Mutex<Instant>,
}

impl CallPacer {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            next_free: tokio::sync::Mutex::new(Instant::now()),
        }
    }

    /// Waits until this caller's slot opens.
    pub async fn pace(&self) {
        let wake_at = {
            let mut slot = self.next_free.lock().await;
            let now = Instant::now();
            let at = if *slot > now { *slot } else { now };
            *slot = at + self.spacing;
            at
        };
        tokio::time::sleep_until(wake_at).await;
    }
}

fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let safe_limit = limit.max(1);
    let burst = NonZeroU32::new(safe_limit).expect("safe limit must be non-zero");

    let seconds_per_cell = (window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .expect("period is always greater than zero")
        .allow_burst(burst)
}
