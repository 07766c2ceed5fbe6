//! Race simulation modules

pub mod bots;
pub mod collision;
pub mod course;
pub mod events;
pub mod penalty;
pub mod physics;
pub mod polar;
pub mod rounding;
pub mod rules;
pub mod start;
pub mod state;
pub mod wake;
pub mod wind;

pub use course::{Course, Leg, Line, Mark, Rounding};
pub use events::{EventKind, Frame, FrameSummary, RaceEvent};
pub use state::{BoatState, RacePhase, RaceState, Tack, Wind};
