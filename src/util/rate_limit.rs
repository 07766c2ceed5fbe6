//! Rate limiting for boat input ingress

use dashmap::DashMap;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use uuid::Uuid;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified messages per second
pub fn create_limiter(per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Default input rate limit (messages per second per boat)
pub const INPUT_RATE_LIMIT: u32 = 30;

/// Per-boat rate limiter state
#[derive(Clone)]
pub struct BoatRateLimiter {
    input_limiter: Arc<Limiter>,
}

impl BoatRateLimiter {
    pub fn new(per_second: u32) -> Self {
        Self {
            input_limiter: create_limiter(per_second),
        }
    }

    /// Check if an input message is allowed (returns true if allowed)
    pub fn check_input(&self) -> bool {
        self.input_limiter.check().is_ok()
    }
}

/// Limiters for every boat feeding a host loop
pub struct InputRateLimiters {
    per_second: u32,
    limiters: DashMap<Uuid, BoatRateLimiter>,
}

impl InputRateLimiters {
    pub fn new(per_second: u32) -> Self {
        Self {
            per_second,
            limiters: DashMap::new(),
        }
    }

    pub fn check(&self, boat_id: Uuid) -> bool {
        self.limiters
            .entry(boat_id)
            .or_insert_with(|| BoatRateLimiter::new(self.per_second))
            .check_input()
    }

    pub fn forget(&self, boat_id: &Uuid) {
        self.limiters.remove(boat_id);
    }
}

impl Default for InputRateLimiters {
    fn default() -> Self {
        Self::new(INPUT_RATE_LIMIT)
    }
}
