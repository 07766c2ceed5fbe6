//! Time utilities for the race loop

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Default tick rate
pub const DEFAULT_TICK_RATE: u32 = 30;

/// Upper bound on a single integration step (seconds)
pub const DEFAULT_MAX_TICK_DT: f32 = 0.25;

/// Delta time for a tick rate (in seconds)
pub fn tick_delta(tick_rate: u32) -> f32 {
    1.0 / tick_rate.max(1) as f32
}

/// Tick period for a tick rate
pub fn tick_period(tick_rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / tick_rate.max(1) as u64)
}

/// Millisecond clock shared by every node in a process.
///
/// Anchored to the wall clock once, then advanced with `tokio::time::Instant`
/// so paused-time tests see a consistent, monotonic clock across hosts.
#[derive(Debug, Clone, Copy)]
pub struct LoopClock {
    base_ms: u64,
    start: tokio::time::Instant,
}

impl LoopClock {
    pub fn new() -> Self {
        Self {
            base_ms: unix_millis(),
            start: tokio::time::Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.base_ms + self.start.elapsed().as_millis() as u64
    }
}

impl Default for LoopClock {
    fn default() -> Self {
        Self::new()
    }
}

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
