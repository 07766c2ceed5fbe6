//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use glam::Vec2;
use uuid::Uuid;

use regatta_host::config::RaceConfig;
use regatta_host::host::{ControlCommand, RaceEngine, RaceHooks, TickError};
use regatta_host::race::{BoatState, Frame, FrameSummary, RaceEvent, RaceState};

/// Arbitrary wall-clock origin
pub const T0: u64 = 5_000_000;

/// One tick at 30 Hz, in milliseconds
pub const TICK_MS: u64 = 33;

/// Hooks that only count calls
#[derive(Default)]
pub struct CountingHooks {
    pub timeouts: AtomicUsize,
    pub finishes: AtomicUsize,
    pub halts: AtomicUsize,
    pub history_len: AtomicUsize,
}

impl CountingHooks {
    pub fn timeouts(&self) -> usize {
        self.timeouts.load(Ordering::SeqCst)
    }

    pub fn finishes(&self) -> usize {
        self.finishes.load(Ordering::SeqCst)
    }
}

impl RaceHooks for CountingHooks {
    fn on_timeout(&self, _state: &RaceState) {
        self.timeouts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_finished(&self, _state: &RaceState, history: &[FrameSummary]) {
        self.finishes.fetch_add(1, Ordering::SeqCst);
        self.history_len.store(history.len(), Ordering::SeqCst);
    }

    fn on_halted(&self, _race_id: Uuid, _error: &TickError) {
        self.halts.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn config(seed: u64) -> RaceConfig {
    RaceConfig {
        seed: Some(seed),
        countdown_secs: 5.0,
        ..RaceConfig::default()
    }
}

pub fn join(engine: &mut RaceEngine, id: Uuid, name: &str, bot: bool) {
    engine
        .apply_control(
            ControlCommand::JoinBoat {
                id,
                name: name.into(),
                bot,
            },
            T0,
        )
        .unwrap();
}

/// Engine resumed from `engine`'s state with boats placed by hand
pub fn with_boats(
    config: RaceConfig,
    hooks: Arc<dyn RaceHooks>,
    boats: &[(Uuid, Vec2, f32)],
) -> RaceEngine {
    let base = RaceEngine::new(Uuid::new_v4(), config.clone(), hooks.clone());
    let mut state = (*base.state()).clone();
    for (id, pos, heading) in boats {
        state
            .boats
            .insert(*id, BoatState::new(*id, id.to_string(), false, *pos, *heading));
    }
    state.recompute_leaderboard();
    RaceEngine::resume(state, config, hooks)
}

/// Tick `count` times from `start_ms`, collecting frames
pub fn run_ticks(engine: &mut RaceEngine, start_ms: u64, count: u64) -> Vec<Arc<Frame>> {
    (1..=count)
        .map(|i| engine.tick_at(start_ms + i * TICK_MS).unwrap())
        .collect()
}

pub fn events(frames: &[Arc<Frame>]) -> Vec<RaceEvent> {
    frames.iter().flat_map(|f| f.events.iter().cloned()).collect()
}
