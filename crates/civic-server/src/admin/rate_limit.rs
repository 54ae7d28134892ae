//! Per-actor rate limiting for control plane mutations
//!
//! Backed by a keyed governor limiter. Each actor gets a burst of `limit`
//! calls, refilled at `limit` per minute. Rejections are returned to the
//! caller instead of being answered by a tower layer, so the control plane
//! can audit them.

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::Quota;
use std::num::NonZeroU32;
use std::time::Duration;

/// Rejection carrying the time until the actor may call again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after: Duration,
}

type KeyedLimiter<C> = governor::RateLimiter<
    String,
    DefaultKeyedStateStore<String>,
    C,
    NoOpMiddleware<<C as Clock>::Instant>,
>;

/// Allows `limit` calls per actor per minute. Rejected calls do not use up
/// quota.
pub struct RateLimiter<C: Clock = DefaultClock> {
    limit: u32,
    limiter: KeyedLimiter<C>,
    clock: C,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn per_minute(limit: u32) -> Self {
        Self::with_clock(limit, DefaultClock::default())
    }
}

impl<C: Clock> RateLimiter<C> {
    /// A limit of 0 is treated as 1; config validation rejects it earlier.
    pub fn with_clock(limit: u32, clock: C) -> Self {
        let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
        let limiter = governor::RateLimiter::new(
            Quota::per_minute(burst),
            DefaultKeyedStateStore::default(),
            &clock,
        );
        Self {
            limit: burst.get(),
            limiter,
            clock,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn check(&self, actor: &str) -> Result<(), RateLimited> {
        self.limiter
            .check_key(&actor.to_string())
            .map_err(|not_until| RateLimited {
                retry_after: not_until.wait_time_from(self.clock.now()),
            })
    }
}
