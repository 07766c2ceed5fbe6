//! Shared utilities

pub mod geometry;
pub mod rate_limit;
pub mod rng;
pub mod time;
