//! Regatta Host - authoritative simulation for multiplayer sailboat racing
//!
//! One elected client runs the race: boat physics under a seeded wind field,
//! right-of-way rules, mark rounding and start-line timing, published as
//! immutable frames. The other clients send inputs and take over the loop
//! from the last frame if the host disappears.

pub mod bus;
pub mod config;
pub mod election;
pub mod host;
pub mod race;
pub mod util;
