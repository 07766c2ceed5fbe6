//! Everything the host owns besides the published state

use crate::config::RaceConfig;
use crate::race::bots::BotPilot;
use crate::race::physics::PhysicsParams;
use crate::race::polar::Polar;
use crate::race::rounding::RoundingTracker;
use crate::race::rules::RulesEngine;
use crate::race::start::StartLineTracker;
use crate::race::wake::WakeModel;
use crate::race::wind::WindModel;
use crate::util::rng::SimRng;

/// Tick-mutated bookkeeping, kept aside until the tick commits
pub struct Checkpoint {
    rng: SimRng,
    wind: WindModel,
    rules: RulesEngine,
    rounding: RoundingTracker,
    start: StartLineTracker,
}

/// Simulation tuning plus the ephemeral per-race bookkeeping. Owned by
/// exactly one host loop; nothing in here is shared.
pub struct SimulationContext {
    pub config: RaceConfig,
    /// Draws for the wind walk
    pub rng: SimRng,
    pub polar: Polar,
    pub physics: PhysicsParams,
    pub wind: WindModel,
    pub wake: WakeModel,
    pub rules: RulesEngine,
    pub rounding: RoundingTracker,
    pub start: StartLineTracker,
    pub pilot: BotPilot,
}

impl SimulationContext {
    /// Build for a race seed. The puff layout depends only on the seed so
    /// every host sees the same field; the wind walk continues on a stream
    /// keyed by the tick the host took over at.
    pub fn new(config: RaceConfig, seed: u64, from_tick: u64) -> Self {
        let mut setup = SimRng::new(seed);
        let wind = WindModel::new(config.wind, &mut setup);
        let rng = setup.fork(from_tick.wrapping_add(1));
        Self {
            rules: RulesEngine::new(config.rules),
            config,
            rng,
            polar: Polar::new(),
            physics: PhysicsParams::default(),
            wind,
            wake: WakeModel::default(),
            rounding: RoundingTracker::new(),
            start: StartLineTracker::new(),
            pilot: BotPilot::default(),
        }
    }

    /// Copy of the bookkeeping a tick mutates
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            rng: self.rng.clone(),
            wind: self.wind.clone(),
            rules: self.rules.clone(),
            rounding: self.rounding.clone(),
            start: self.start.clone(),
        }
    }

    /// Roll back to a checkpoint taken before a failed tick
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.rng = checkpoint.rng;
        self.wind = checkpoint.wind;
        self.rules = checkpoint.rules;
        self.rounding = checkpoint.rounding;
        self.start = checkpoint.start;
    }

    /// Forget cooldowns, rounding progress, OCS baselines and the wake grid
    pub fn reset_ephemeral(&mut self) {
        self.rules.reset();
        self.rounding.reset();
        self.start.reset();
        self.wake.reset();
    }
}
