//! Authoritative race engine
//!
//! A tick clones the published state, runs every subsystem on the clone and
//! swaps it in only if the whole tick succeeded. Observers hold `Arc`s to
//! earlier states and never see a half-updated world.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::BoatInput;
use crate::config::RaceConfig;
use crate::race::bots::{BotAction, SailingFeatures};
use crate::race::collision::resolve_boat_collisions;
use crate::race::course::Course;
use crate::race::events::{EventKind, Frame, RaceEvent};
use crate::race::penalty::{self, SpinTransition};
use crate::race::physics::{PhysicsSystem, StepContext};
use crate::race::rounding::RoundingEvent;
use crate::race::start::StartEvent;
use crate::race::state::{BoatState, RacePhase, RaceState, Wind};
use crate::util::time::{tick_delta, tick_period, Timer};

use super::context::SimulationContext;
use super::control::{ControlCommand, ControlError, MAX_COUNTDOWN_SECS};
use super::history::FrameHistory;
use super::hooks::RaceHooks;
use super::input::{InputBuffer, PendingInput};

/// Why a tick produced no frame
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TickError {
    #[error("boat {boat} has non-finite state after integration")]
    NonFiniteBoat { boat: Uuid },

    #[error("wind is non-finite after the wind step")]
    NonFiniteWind,

    #[error("tick panicked: {0}")]
    Panicked(String),

    #[error("halted after {failures} consecutive failed ticks")]
    Halted { failures: u32 },
}

/// Follow-ups that run once the tick is published
#[derive(Debug, Default)]
struct TickReport {
    timed_out: bool,
    finished: bool,
}

/// The authoritative race
pub struct RaceEngine {
    ctx: SimulationContext,
    state: Arc<RaceState>,
    inputs: InputBuffer,
    /// Control events waiting for the next frame
    queued_events: Vec<RaceEvent>,
    history: FrameHistory,
    hooks: Arc<dyn RaceHooks>,
    last_tick_ms: Option<u64>,
    consecutive_failures: u32,
    halted: bool,
    finish_reported: bool,
}

impl RaceEngine {
    /// Fresh race on the default windward-leeward course
    pub fn new(race_id: Uuid, config: RaceConfig, hooks: Arc<dyn RaceHooks>) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        let course = Course::windward_leeward(config.wind.direction_deg, config.laps, config.beat_length);
        let wind = Wind {
            direction_deg: config.wind.direction_deg,
            speed_kts: config.wind.speed_kts,
        };
        let mut state = RaceState::new(race_id, seed, course, wind, config.countdown_secs);
        state.fixed_wind = config.fixed_wind;
        info!(race_id = %race_id, seed, "Race created");
        Self::resume(state, config, hooks)
    }

    /// Continue from a published state (host promotion). Ephemeral
    /// bookkeeping starts empty; the state itself is taken as is.
    pub fn resume(state: RaceState, config: RaceConfig, hooks: Arc<dyn RaceHooks>) -> Self {
        let interval_ticks = (config.history_interval_secs * config.tick_rate as f32).round().max(1.0) as u32;
        let history = FrameHistory::new(interval_ticks, config.history_len);
        let finish_reported = state.phase == RacePhase::Finished;
        Self {
            ctx: SimulationContext::new(config, state.seed, state.tick),
            state: Arc::new(state),
            inputs: InputBuffer::new(),
            queued_events: Vec::new(),
            history,
            hooks,
            last_tick_ms: None,
            consecutive_failures: 0,
            halted: false,
            finish_reported,
        }
    }

    pub fn race_id(&self) -> Uuid {
        self.state.race_id
    }

    /// Latest published state
    pub fn state(&self) -> Arc<RaceState> {
        Arc::clone(&self.state)
    }

    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    pub fn history(&self) -> &FrameHistory {
        &self.history
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Stamp the host identity into the state
    pub fn claim_host(&mut self, host_id: Uuid, epoch: u64) {
        let mut next = (*self.state).clone();
        next.host_id = Some(host_id);
        next.host_epoch = epoch;
        self.state = Arc::new(next);
    }

    /// Buffer a boat input for the next tick
    pub fn submit_input(&mut self, input: &BoatInput) -> bool {
        if !self.state.boats.contains_key(&input.boat_id) {
            warn!(race_id = %self.state.race_id, boat_id = %input.boat_id, "Input for unknown boat");
            return false;
        }
        self.inputs.submit(input)
    }

    /// Apply a host control command between ticks. The events it produces go
    /// out with the next frame and are also returned.
    pub fn apply_control(&mut self, command: ControlCommand, now_ms: u64) -> Result<Vec<RaceEvent>, ControlError> {
        let mut next = (*self.state).clone();
        let mut events = Vec::new();

        match command {
            ControlCommand::ArmCountdown { seconds } => {
                if !seconds.is_finite() || !(0.0..=MAX_COUNTDOWN_SECS).contains(&seconds) {
                    return Err(ControlError::InvalidArgument(format!("countdown of {seconds} s")));
                }
                if next.phase != RacePhase::Prestart {
                    return Err(ControlError::WrongPhase(next.phase));
                }
                next.start_at_ms = Some(now_ms + (seconds * 1000.0).round() as u64);
                next.t = -seconds;
                info!(race_id = %next.race_id, seconds, "Countdown armed");
                events.push(RaceEvent::next(
                    &mut next,
                    EventKind::CountdownArmed,
                    format!("Start in {seconds:.0} s"),
                ));
            }
            ControlCommand::ResetRace => {
                self.reset_race(&mut next);
                info!(race_id = %next.race_id, "Race reset");
                events.push(RaceEvent::next(&mut next, EventKind::RaceReset, "Race reset"));
            }
            ControlCommand::JoinBoat { id, name, bot } => {
                if !next.add_boat(id, name.clone(), bot) {
                    return Err(ControlError::DuplicateBoat(id));
                }
                info!(race_id = %next.race_id, boat_id = %id, bot, "Boat joined");
                events.push(
                    RaceEvent::next(&mut next, EventKind::BoatJoined, format!("{name} joined")).with_boats([id]),
                );
            }
            ControlCommand::LeaveBoat { id } => {
                let boat = next.remove_boat(&id).ok_or(ControlError::UnknownBoat(id))?;
                self.ctx.rounding.forget(&id);
                self.inputs.forget(&id);
                info!(race_id = %next.race_id, boat_id = %id, "Boat left");
                events.push(
                    RaceEvent::next(&mut next, EventKind::BoatLeft, format!("{} left", boat.name)).with_boats([id]),
                );
            }
            ControlCommand::SetWakeParams { patch } => {
                self.ctx.wake.apply_patch(&patch);
                debug!(race_id = %next.race_id, params = ?self.ctx.wake.params(), "Wake params updated");
            }
            ControlCommand::SetFixedWind { fixed } => {
                next.fixed_wind = fixed;
                info!(race_id = %next.race_id, fixed, "Fixed wind toggled");
            }
            ControlCommand::JumpToMark { boat, leg } => {
                if leg >= next.course.legs.len() {
                    return Err(ControlError::InvalidArgument(format!("no leg {leg}")));
                }
                let b = next.boats.get_mut(&boat).ok_or(ControlError::UnknownBoat(boat))?;
                b.next_mark_index = leg;
                b.finished = false;
                b.finish_time = None;
                self.ctx.rounding.forget(&boat);
                debug!(boat_id = %boat, leg, "Debug jump to leg");
            }
            ControlCommand::SetLap { boat, lap } => {
                if lap > next.course.laps_to_finish {
                    return Err(ControlError::InvalidArgument(format!("lap {lap} past the last lap")));
                }
                let b = next.boats.get_mut(&boat).ok_or(ControlError::UnknownBoat(boat))?;
                if lap < b.lap {
                    return Err(ControlError::InvalidArgument(format!("lap {lap} is behind lap {}", b.lap)));
                }
                b.lap = lap;
                debug!(boat_id = %boat, lap, "Debug set lap");
            }
            ControlCommand::ForceFinish { boat } => {
                let t = next.t;
                let laps = next.course.laps_to_finish;
                let b = next.boats.get_mut(&boat).ok_or(ControlError::UnknownBoat(boat))?;
                b.finished = true;
                b.finish_time = Some(t);
                b.lap = b.lap.max(laps);
                let name = b.name.clone();
                self.ctx.rounding.forget(&boat);
                events.push(
                    RaceEvent::next(&mut next, EventKind::Finished, format!("{name} finished")).with_boats([boat]),
                );
            }
        }

        next.recompute_leaderboard();
        self.state = Arc::new(next);
        self.queued_events.extend(events.iter().cloned());
        Ok(events)
    }

    /// Run one tick at wall-clock time `now_ms`
    pub fn tick_at(&mut self, now_ms: u64) -> Result<Arc<Frame>, TickError> {
        if self.halted {
            return Err(TickError::Halted {
                failures: self.consecutive_failures,
            });
        }
        let timer = Timer::new();
        let dt = self.step_dt(now_ms);
        self.last_tick_ms = Some(now_ms);

        let inputs = self.inputs.drain();
        let base = Arc::clone(&self.state);
        let checkpoint = self.ctx.checkpoint();
        let ctx = &mut self.ctx;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| simulate(ctx, &base, &inputs, dt, now_ms)));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(TickError::Panicked(panic_message(payload))),
        };

        match result {
            Ok((next, events, report)) => {
                let frame = self.commit(next, events, report);
                let budget = tick_period(self.ctx.config.tick_rate).as_micros() as u64;
                let took = timer.elapsed_micros();
                if took > budget {
                    warn!(race_id = %frame.state.race_id, tick = frame.tick, took_us = took, "Slow tick");
                }
                Ok(frame)
            }
            Err(err) => {
                // Cooldowns and rounding progress must match the state that stays published
                self.ctx.restore(checkpoint);
                self.consecutive_failures += 1;
                warn!(
                    race_id = %self.state.race_id,
                    failures = self.consecutive_failures,
                    error = %err,
                    "Tick failed, state left unchanged"
                );
                if self.consecutive_failures >= self.ctx.config.max_tick_failures.max(1) {
                    self.halted = true;
                    error!(
                        race_id = %self.state.race_id,
                        failures = self.consecutive_failures,
                        "Too many failed ticks, halting"
                    );
                    self.hooks.on_halted(self.state.race_id, &err);
                }
                Err(err)
            }
        }
    }

    fn step_dt(&self, now_ms: u64) -> f32 {
        let raw = match self.last_tick_ms {
            Some(last) => now_ms.saturating_sub(last) as f32 / 1000.0,
            None => tick_delta(self.ctx.config.tick_rate),
        };
        raw.clamp(0.0, self.ctx.config.max_tick_dt.max(0.0))
    }

    fn commit(&mut self, next: RaceState, events: Vec<RaceEvent>, report: TickReport) -> Arc<Frame> {
        self.consecutive_failures = 0;
        let mut all_events = std::mem::take(&mut self.queued_events);
        all_events.extend(events);

        let state = Arc::new(next);
        self.state = Arc::clone(&state);

        if report.finished || report.timed_out {
            self.history.force_next();
        }
        if self.history.should_sample() {
            self.history.record(&state);
            self.hooks.on_sample(&state, &self.observe(&state));
        }
        if report.timed_out {
            self.hooks.on_timeout(&state);
        }
        if report.finished && !self.finish_reported {
            self.finish_reported = true;
            self.hooks.on_finished(&state, &self.history.summaries());
        }
        Arc::new(Frame::new(state, all_events))
    }

    /// Feature rows for every boat still racing
    fn observe(&self, state: &RaceState) -> Vec<(Uuid, SailingFeatures)> {
        state
            .boats
            .values()
            .filter(|b| !b.finished)
            .map(|b| {
                let target = state
                    .course
                    .target_point(b.next_mark_index, self.ctx.rounding.committed_mark(&b.id), b.pos);
                (b.id, SailingFeatures::observe(state, b, target))
            })
            .collect()
    }

    fn reset_race(&mut self, next: &mut RaceState) {
        next.phase = RacePhase::Prestart;
        next.t = -self.ctx.config.countdown_secs.abs();
        next.start_at_ms = None;
        next.start_signal_sent = false;

        let ids: Vec<Uuid> = next.boats.keys().copied().collect();
        for (slot, id) in ids.iter().enumerate() {
            let (pos, heading) = next.spawn_position(slot);
            if let Some(boat) = next.boats.get_mut(id) {
                boat.reset_racing();
                boat.pos = pos;
                boat.prev_pos = pos;
                boat.heading_deg = heading;
                boat.desired_heading_deg = heading;
                boat.vmg_mode = false;
                boat.blow_sails = false;
            }
        }

        self.ctx.reset_ephemeral();
        self.inputs.clear();
        self.history.clear();
        self.finish_reported = false;
    }
}

type Simulated = (RaceState, Vec<RaceEvent>, TickReport);

/// One tick on a clone of `base`
fn simulate(
    ctx: &mut SimulationContext,
    base: &RaceState,
    inputs: &BTreeMap<Uuid, PendingInput>,
    dt: f32,
    now_ms: u64,
) -> Result<Simulated, TickError> {
    let mut next = base.clone();
    let mut events = Vec::new();
    let mut report = TickReport::default();
    next.tick += 1;
    next.elapsed += dt;

    // Controls
    let mut spin_requests = Vec::new();
    for (id, pending) in inputs {
        if let Some(boat) = next.boats.get_mut(id) {
            if pending.apply(boat) {
                spin_requests.push(*id);
            }
        }
    }
    if next.phase != RacePhase::Finished {
        spin_requests.extend(drive_bots(ctx, &mut next));
    }
    let wind_dir = next.wind.direction_deg;
    let mut started = Vec::new();
    for id in spin_requests {
        if let Some(boat) = next.boats.get_mut(&id) {
            if penalty::request_spin(boat, wind_dir) == Some(SpinTransition::Started) {
                started.push(id);
            }
        }
    }
    for id in started {
        debug!(boat_id = %id, "Penalty spin started");
        events.push(RaceEvent::next(&mut next, EventKind::SpinStarted, "Penalty spin started").with_boats([id]));
    }

    // Wind
    let sample = ctx
        .wind
        .step(next.baseline_wind_deg, next.elapsed, dt, next.fixed_wind, &mut ctx.rng);
    if !sample.wind.direction_deg.is_finite() || !sample.wind.speed_kts.is_finite() {
        return Err(TickError::NonFiniteWind);
    }
    next.wind = sample.wind;
    next.baseline_wind_deg = sample.baseline_deg;
    let wind = next.wind;

    // Faults are decided on the pre-move positions so an overlapping boat is
    // slowed in the tick it overlapped
    let outcomes = ctx.rules.compute_collision_outcomes(&next, 0.0);
    let wake = ctx.wake.compute_factors(&next.boats, wind, next.course.bounds());

    // Physics
    let stepped: Vec<BoatState> = next
        .boats
        .values()
        .map(|boat| {
            let target = next
                .course
                .steering_point(boat.next_mark_index, ctx.rounding.committed_mark(&boat.id), boat.pos);
            let step = StepContext {
                polar: &ctx.polar,
                params: &ctx.physics,
                wind,
                local_wind: ctx.wind.sample(wind, boat.pos, next.elapsed, next.fixed_wind),
                wake_factor: wake.get(&boat.id).copied().unwrap_or(1.0),
                collision: outcomes.get(&boat.id).copied().unwrap_or_default(),
                target,
                dt,
            };
            PhysicsSystem::step_boat(boat, &step)
        })
        .collect();
    for boat in stepped {
        next.boats.insert(boat.id, boat);
    }

    // Race clock
    if next.phase != RacePhase::Finished {
        match next.start_at_ms {
            Some(start_at) => next.t = (now_ms as i64 - start_at as i64) as f32 / 1000.0,
            None if next.phase == RacePhase::Running => next.t += dt,
            None => {}
        }
        if next.phase == RacePhase::Prestart && next.start_at_ms.is_some() && next.t >= 0.0 {
            next.phase = RacePhase::Running;
            info!(race_id = %next.race_id, tick = next.tick, "Gun");
        }
        if next.phase == RacePhase::Running && next.t >= ctx.config.race_duration_secs {
            next.phase = RacePhase::Finished;
            report.timed_out = true;
            events.push(RaceEvent::next(&mut next, EventKind::RaceTimeout, "Race time limit reached"));
        }
    }

    if next.phase != RacePhase::Finished {
        // Course progress
        for ev in ctx.rounding.update(&mut next) {
            events.extend(rounding_event(&mut next, ev));
        }
        next.recompute_leaderboard();

        // Penalty spins
        let tick = next.tick;
        let mut cleared = Vec::new();
        for boat in next.boats.values_mut() {
            match penalty::advance(boat, tick) {
                Some(SpinTransition::TurnCompleted) => debug!(boat_id = %boat.id, "Spin turn completed"),
                Some(SpinTransition::Cleared) => cleared.push(boat.id),
                _ => {}
            }
        }
        for id in cleared {
            events.push(RaceEvent::next(&mut next, EventKind::PenaltyCleared, "Penalty cleared").with_boats([id]));
        }

        // Start line
        for ev in ctx.start.update(&mut next) {
            events.push(start_event(&mut next, ev));
        }

        // Right of way
        for ruling in ctx.rules.evaluate(&next) {
            if let Some(offender) = next.boats.get_mut(&ruling.offender) {
                offender.penalties += 1;
            }
            let message = format!("Penalty: {:?}", ruling.rule);
            events.push(
                RaceEvent::next(&mut next, EventKind::Penalty, message)
                    .with_rule(ruling.rule)
                    .with_boats([ruling.offender, ruling.stand_on]),
            );
        }
    }
    resolve_boat_collisions(&mut next.boats, &outcomes);

    if let Some(bad) = next.boats.values().find(|b| !b.is_finite()) {
        return Err(TickError::NonFiniteBoat { boat: bad.id });
    }

    if next.phase == RacePhase::Running && next.all_finished() {
        next.phase = RacePhase::Finished;
        report.finished = true;
        info!(race_id = %next.race_id, t = next.t, "All boats finished");
        events.push(RaceEvent::next(&mut next, EventKind::RaceFinished, "All boats finished"));
    }

    Ok((next, events, report))
}

/// Let the bot pilot steer every bot boat. Returns bots asking for a spin.
fn drive_bots(ctx: &SimulationContext, state: &mut RaceState) -> Vec<Uuid> {
    let decisions: Vec<(Uuid, Vec<BotAction>)> = state
        .boats
        .values()
        .filter(|b| b.bot)
        .map(|b| {
            let target = state
                .course
                .steering_point(b.next_mark_index, ctx.rounding.committed_mark(&b.id), b.pos);
            (b.id, ctx.pilot.decide(state, b, &ctx.polar, target))
        })
        .collect();

    let mut spins = Vec::new();
    for (id, actions) in decisions {
        let Some(boat) = state.boats.get_mut(&id) else {
            continue;
        };
        for action in actions {
            match action {
                BotAction::Heading(heading) => {
                    boat.desired_heading_deg = heading;
                    boat.vmg_mode = false;
                }
                BotAction::Vmg => boat.vmg_mode = true,
                BotAction::Spin => spins.push(id),
            }
        }
    }
    spins
}

fn rounding_event(state: &mut RaceState, event: RoundingEvent) -> Option<RaceEvent> {
    match event {
        RoundingEvent::StartCrossed { boat } => {
            debug!(boat_id = %boat, "Started");
            None
        }
        RoundingEvent::MarkRounded { boat, leg, by_sweep } => Some(
            RaceEvent::next(
                state,
                EventKind::MarkRounded,
                if by_sweep {
                    format!("Rounded leg {leg} (sweep)")
                } else {
                    format!("Rounded leg {leg}")
                },
            )
            .with_boats([boat]),
        ),
        RoundingEvent::LapCompleted { boat, lap } => {
            Some(RaceEvent::next(state, EventKind::LapCompleted, format!("Lap {lap} completed")).with_boats([boat]))
        }
        RoundingEvent::Finished { boat, finish_time } => {
            info!(boat_id = %boat, finish_time, "Boat finished");
            Some(
                RaceEvent::next(state, EventKind::Finished, format!("Finished in {finish_time:.1} s"))
                    .with_boats([boat]),
            )
        }
    }
}

fn start_event(state: &mut RaceState, event: StartEvent) -> RaceEvent {
    match event {
        StartEvent::Ocs { boat } => {
            RaceEvent::next(state, EventKind::OcsFlagged, "Over the line early").with_boats([boat])
        }
        StartEvent::OcsCleared { boat } => {
            RaceEvent::next(state, EventKind::OcsCleared, "Returned below the line").with_boats([boat])
        }
        StartEvent::StartSignal => RaceEvent::next(state, EventKind::StartSignal, "Start"),
        StartEvent::GeneralRecall { boats } => {
            let message = format!("General recall: {} boat(s) over", boats.len());
            RaceEvent::next(state, EventKind::GeneralRecall, message).with_boats(boats)
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InputCommand;
    use crate::host::hooks::LoggingHooks;
    use glam::Vec2;

    const T0: u64 = 1_000_000;

    fn config() -> RaceConfig {
        RaceConfig {
            seed: Some(11),
            countdown_secs: 5.0,
            fixed_wind: true,
            ..RaceConfig::default()
        }
    }

    fn engine() -> RaceEngine {
        RaceEngine::new(Uuid::new_v4(), config(), Arc::new(LoggingHooks))
    }

    fn join(engine: &mut RaceEngine, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        engine
            .apply_control(
                ControlCommand::JoinBoat {
                    id,
                    name: name.into(),
                    bot: false,
                },
                T0,
            )
            .unwrap();
        id
    }

    #[test]
    fn tick_publishes_a_new_state_and_leaves_the_old_one_alone() {
        let mut e = engine();
        let boat = join(&mut e, "a");
        let before = e.state();
        let frame = e.tick_at(T0).unwrap();
        assert_eq!(frame.tick, before.tick + 1);
        assert_eq!(before.tick, 0);
        assert!(Arc::ptr_eq(&frame.state, &e.state()));
        // Join event rides on the first frame
        assert!(frame.events.iter().any(|ev| ev.kind == EventKind::BoatJoined));
        assert_ne!(frame.state.boats[&boat].pos, before.boats[&boat].pos);
    }

    #[test]
    fn dt_is_capped() {
        let mut e = engine();
        join(&mut e, "a");
        e.tick_at(T0).unwrap();
        let before = e.state().elapsed;
        e.tick_at(T0 + 10_000).unwrap();
        let step = e.state().elapsed - before;
        assert!((step - e.context().config.max_tick_dt).abs() < 1e-5);
    }

    #[test]
    fn countdown_fires_the_gun_from_the_wall_clock() {
        let mut e = engine();
        join(&mut e, "a");
        let events = e.apply_control(ControlCommand::ArmCountdown { seconds: 1.0 }, T0).unwrap();
        assert_eq!(events[0].kind, EventKind::CountdownArmed);
        let mut now = T0;
        let mut saw_start = false;
        while now <= T0 + 1_100 {
            now += 33;
            let frame = e.tick_at(now).unwrap();
            saw_start |= frame
                .events
                .iter()
                .any(|ev| matches!(ev.kind, EventKind::StartSignal | EventKind::GeneralRecall));
        }
        assert_eq!(e.state().phase, RacePhase::Running);
        assert!(saw_start);
        assert!(e.state().t > 0.0);
        assert_eq!(
            e.apply_control(ControlCommand::ArmCountdown { seconds: 5.0 }, now),
            Err(ControlError::WrongPhase(RacePhase::Running))
        );
    }

    #[test]
    fn manual_heading_input_is_applied_next_tick() {
        let mut e = engine();
        let boat = join(&mut e, "a");
        assert!(e.submit_input(&BoatInput {
            boat_id: boat,
            seq: 1,
            client_ts_ms: 0,
            command: InputCommand::Heading {
                desired_heading_deg: 90.0
            },
        }));
        assert!(!e.submit_input(&BoatInput {
            boat_id: Uuid::new_v4(),
            seq: 1,
            client_ts_ms: 0,
            command: InputCommand::Spin,
        }));
        let frame = e.tick_at(T0).unwrap();
        let b = &frame.state.boats[&boat];
        assert_eq!(b.desired_heading_deg, 90.0);
        assert_eq!(b.last_input_seq, 1);
    }

    #[test]
    fn non_finite_state_is_discarded_and_the_loop_halts() {
        let mut state = (*engine().state()).clone();
        let id = Uuid::new_v4();
        state
            .boats
            .insert(id, BoatState::new(id, "nan".into(), false, Vec2::new(f32::NAN, 0.0), 0.0));
        let cfg = RaceConfig {
            max_tick_failures: 3,
            ..config()
        };
        let mut e = RaceEngine::resume(state, cfg, Arc::new(LoggingHooks));
        let tick_before = e.state().tick;
        for i in 0..3 {
            assert_eq!(e.tick_at(T0 + i * 33).unwrap_err(), TickError::NonFiniteBoat { boat: id });
        }
        assert!(e.is_halted());
        assert_eq!(e.state().tick, tick_before);
        assert_eq!(e.tick_at(T0 + 200).unwrap_err(), TickError::Halted { failures: 3 });
    }

    #[test]
    fn foul_seen_in_a_failed_tick_is_called_again() {
        let mut state = (*engine().state()).clone();
        let port = Uuid::new_v4();
        let starboard = Uuid::new_v4();
        let nan = Uuid::new_v4();
        for (id, pos, heading) in [
            (port, Vec2::new(0.0, -100.0), 45.0),
            (starboard, Vec2::new(2.0, -100.0), 315.0),
            (nan, Vec2::new(f32::NAN, 0.0), 0.0),
        ] {
            state.boats.insert(id, BoatState::new(id, "b".into(), false, pos, heading));
        }
        let mut e = RaceEngine::resume(state, config(), Arc::new(LoggingHooks));

        assert_eq!(e.tick_at(T0).unwrap_err(), TickError::NonFiniteBoat { boat: nan });
        e.apply_control(ControlCommand::LeaveBoat { id: nan }, T0).unwrap();

        let fouls: usize = (1..=10)
            .map(|i| {
                e.tick_at(T0 + i * 33)
                    .unwrap()
                    .events
                    .iter()
                    .filter(|ev| ev.kind == EventKind::Penalty)
                    .count()
            })
            .sum();
        assert_eq!(fouls, 1);
        assert_eq!(e.state().boats[&port].penalties, 1);
        assert_eq!(e.state().boats[&starboard].penalties, 0);
    }

    #[derive(Default)]
    struct RowSink(parking_lot::Mutex<Vec<(Uuid, SailingFeatures)>>);

    impl RaceHooks for RowSink {
        fn on_timeout(&self, _state: &RaceState) {}
        fn on_finished(&self, _state: &RaceState, _history: &[crate::race::events::FrameSummary]) {}
        fn on_halted(&self, _race_id: Uuid, _error: &TickError) {}
        fn on_sample(&self, _state: &RaceState, rows: &[(Uuid, SailingFeatures)]) {
            self.0.lock().extend_from_slice(rows);
        }
    }

    #[test]
    fn observation_rows_go_out_with_each_history_sample() {
        let sink = Arc::new(RowSink::default());
        let mut e = RaceEngine::new(Uuid::new_v4(), config(), sink.clone());
        let a = join(&mut e, "a");
        let b = join(&mut e, "b");
        // First tick and one interval later
        for i in 0..31 {
            e.tick_at(T0 + i * 33).unwrap();
        }
        assert_eq!(e.history().len(), 2);

        let rows = sink.0.lock();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().any(|(id, _)| *id == a));
        assert!(rows.iter().any(|(id, _)| *id == b));
        for (_, features) in rows.iter() {
            assert!(features.near1_dist < crate::race::bots::MISSING_NEIGHBOUR_DIST);
            assert!(features.to_row().iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn set_lap_never_winds_a_boat_back() {
        let mut e = engine();
        let boat = join(&mut e, "a");
        e.apply_control(ControlCommand::SetLap { boat, lap: 1 }, T0).unwrap();
        assert!(matches!(
            e.apply_control(ControlCommand::SetLap { boat, lap: 0 }, T0),
            Err(ControlError::InvalidArgument(_))
        ));
        assert_eq!(e.state().boats[&boat].lap, 1);
    }

    #[test]
    fn debug_commands_validate_their_arguments() {
        let mut e = engine();
        let boat = join(&mut e, "a");
        let ghost = Uuid::new_v4();
        assert_eq!(
            e.apply_control(ControlCommand::ForceFinish { boat: ghost }, T0),
            Err(ControlError::UnknownBoat(ghost))
        );
        assert!(matches!(
            e.apply_control(ControlCommand::JumpToMark { boat, leg: 99 }, T0),
            Err(ControlError::InvalidArgument(_))
        ));
        assert_eq!(
            e.apply_control(
                ControlCommand::JoinBoat {
                    id: boat,
                    name: "again".into(),
                    bot: false
                },
                T0
            ),
            Err(ControlError::DuplicateBoat(boat))
        );
        e.apply_control(ControlCommand::ForceFinish { boat }, T0).unwrap();
        let b = &e.state().boats[&boat];
        assert!(b.finished);
        assert!(b.lap >= e.state().course.laps_to_finish);
    }

    #[test]
    fn reset_returns_everyone_to_prestart() {
        let mut e = engine();
        let boat = join(&mut e, "a");
        e.apply_control(ControlCommand::ArmCountdown { seconds: 0.0 }, T0).unwrap();
        for i in 1..10 {
            e.tick_at(T0 + i * 33).unwrap();
        }
        assert_eq!(e.state().phase, RacePhase::Running);
        e.apply_control(ControlCommand::SetLap { boat, lap: 1 }, T0 + 400).unwrap();

        let events = e.apply_control(ControlCommand::ResetRace, T0 + 400).unwrap();
        assert_eq!(events[0].kind, EventKind::RaceReset);
        let s = e.state();
        assert_eq!(s.phase, RacePhase::Prestart);
        assert_eq!(s.start_at_ms, None);
        assert_eq!(s.boats[&boat].lap, 0);
        assert_eq!(s.boats[&boat].speed, 0.0);
        assert!(s.boats[&boat].pos.y < 0.0);
    }
}
