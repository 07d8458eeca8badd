//! Per-client token buckets.
//!
//! Backed by governor's keyed GCRA limiter over a sharded `DashMap`: each
//! client's state is a single atomic cell updated by compare-and-swap, so two
//! simultaneous requests can never both take the last permit, and unrelated
//! clients never contend on one lock.

use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{net::IpAddr, num::NonZeroU32, sync::Arc, time::Duration};

use crate::config::RateLimitConfig;

type KeyedLimiter<C> =
    RateLimiter<IpAddr, DashMapStateStore<IpAddr>, C, NoOpMiddleware<<C as Clock>::Instant>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Admitted,
    Throttled { retry_after: Duration },
}

/// Token bucket per client address. Buckets appear on first sight with full
/// capacity; [`ClientRateLimiter::evict_idle`] drops the ones that have
/// refilled completely.
pub struct ClientRateLimiter<C: Clock = DefaultClock> {
    limiter: Arc<KeyedLimiter<C>>,
    clock: C,
}

impl<C: Clock> Clone for ClientRateLimiter<C> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            clock: self.clock.clone(),
        }
    }
}

impl ClientRateLimiter {
    pub fn new(capacity: u32, refill_per_second: f64) -> Result<Self, anyhow::Error> {
        Self::with_clock(capacity, refill_per_second, DefaultClock::default())
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self, anyhow::Error> {
        Self::new(config.capacity, config.refill_per_second)
    }
}

impl<C: Clock> ClientRateLimiter<C> {
    pub fn with_clock(capacity: u32, refill_per_second: f64, clock: C) -> Result<Self, anyhow::Error> {
        let capacity = NonZeroU32::new(capacity)
            .ok_or_else(|| anyhow::anyhow!("Rate limit capacity must be at least 1"))?;

        if !(refill_per_second.is_finite() && refill_per_second > 0.0) {
            return Err(anyhow::anyhow!("Rate limit refill rate must be positive"));
        }

        let period = Duration::try_from_secs_f64(1.0 / refill_per_second)
            .map_err(|e| anyhow::anyhow!("Refill rate {} is out of range: {}", refill_per_second, e))?;
        let quota = Quota::with_period(period)
            .ok_or_else(|| anyhow::anyhow!("Refill rate {} is too high", refill_per_second))?
            .allow_burst(capacity);

        let limiter = RateLimiter::new(quota, DashMapStateStore::default(), &clock);

        Ok(Self {
            limiter: Arc::new(limiter),
            clock,
        })
    }

    pub fn try_acquire(&self, client: IpAddr) -> Acquire {
        self.try_acquire_n(client, NonZeroU32::MIN)
    }

    /// Take `cost` permits at once, or none. A cost above capacity can never
    /// succeed and is throttled without a meaningful retry hint.
    pub fn try_acquire_n(&self, client: IpAddr, cost: NonZeroU32) -> Acquire {
        match self.limiter.check_key_n(&client, cost) {
            Ok(Ok(_)) => Acquire::Admitted,
            Ok(Err(not_until)) => Acquire::Throttled {
                retry_after: not_until.wait_time_from(self.clock.now()),
            },
            Err(_) => Acquire::Throttled {
                retry_after: Duration::MAX,
            },
        }
    }

    /// Drop buckets that have fully refilled (indistinguishable from a new
    /// one) and release the freed map capacity. Returns how many remain.
    pub fn evict_idle(&self) -> usize {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        self.limiter.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}
