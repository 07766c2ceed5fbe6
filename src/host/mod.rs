//! Authoritative race hosting: engine, loop and collaborators

pub mod context;
pub mod control;
pub mod engine;
pub mod history;
pub mod hooks;
pub mod host_loop;
pub mod input;
pub mod registry;

pub use context::{Checkpoint, SimulationContext};
pub use control::{ControlCommand, ControlError};
pub use engine::{RaceEngine, TickError};
pub use hooks::{LoggingHooks, RaceHooks};
pub use host_loop::{ExitReason, HostHandle, HostLoop, LoopExit};
pub use registry::RaceRegistry;
