//! Request pacing shared by all callers of one client

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};

type DirectLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// `rate` requests per `interval`, with a burst of `rate`
///
/// Clones share one quota.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<DirectLimiter>,
}

impl RateLimiter {
    pub fn new(rate: u32, interval: Duration) -> Self {
        let burst = NonZeroU32::new(rate).unwrap_or(NonZeroU32::MIN);
        let period = (interval / burst.get()).max(Duration::from_nanos(1));

        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        Self {
            inner: Arc::new(GovernorRateLimiter::direct(quota)),
        }
    }

    pub fn per_minute(rate: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(rate).unwrap_or(NonZeroU32::MIN));
        Self {
            inner: Arc::new(GovernorRateLimiter::direct(quota)),
        }
    }

    /// Wait until the quota allows one more request
    pub async fn acquire(&self) {
        self.inner.until_ready().await;
    }
}
