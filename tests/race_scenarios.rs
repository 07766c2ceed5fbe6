//! Whole-engine race scenarios

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Vec2;
use uuid::Uuid;

use common::{config, events, join, run_ticks, with_boats, CountingHooks, T0, TICK_MS};
use regatta_host::bus::{BoatInput, InputCommand};
use regatta_host::config::RaceConfig;
use regatta_host::host::{ControlCommand, LoggingHooks, RaceEngine};
use regatta_host::race::rules::RuleId;
use regatta_host::race::{EventKind, RacePhase};

fn fixed(seed: u64) -> RaceConfig {
    RaceConfig {
        fixed_wind: true,
        ..config(seed)
    }
}

#[test]
fn port_tack_boat_is_penalised_once_and_can_spin_it_off() {
    // Wind from the north: 45° is port tack, 315° starboard
    let port = Uuid::from_u128(10);
    let starboard = Uuid::from_u128(20);
    let mut engine = with_boats(
        fixed(1),
        Arc::new(LoggingHooks),
        &[
            (port, Vec2::new(0.0, -100.0), 45.0),
            (starboard, Vec2::new(2.0, -100.0), 315.0),
        ],
    );

    let frames = run_ticks(&mut engine, T0, 30);
    let fouls: Vec<_> = events(&frames)
        .into_iter()
        .filter(|e| e.kind == EventKind::Penalty)
        .collect();
    assert_eq!(fouls.len(), 1);
    assert_eq!(fouls[0].rule_id, Some(RuleId::OppositeTack));
    assert_eq!(fouls[0].boats, vec![port, starboard]);

    let state = engine.state();
    assert_eq!(state.boats[&port].penalties, 1);
    assert_eq!(state.boats[&starboard].penalties, 0);

    assert!(engine.submit_input(&BoatInput {
        boat_id: port,
        seq: 1,
        client_ts_ms: T0,
        command: InputCommand::Spin,
    }));
    let frames = run_ticks(&mut engine, T0 + 30 * TICK_MS, 300);
    let kinds: Vec<EventKind> = events(&frames).iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::SpinStarted));
    assert!(kinds.contains(&EventKind::PenaltyCleared));
    assert!(engine.state().boats[&port].spin.is_idle());
}

#[test]
fn boat_over_early_is_flagged_and_recalled() {
    let early = Uuid::from_u128(1);
    let clean = Uuid::from_u128(2);
    let mut engine = with_boats(
        fixed(2),
        Arc::new(LoggingHooks),
        &[
            (early, Vec2::new(0.0, 5.0), 90.0),
            (clean, Vec2::new(-30.0, -30.0), 90.0),
        ],
    );
    engine
        .apply_control(ControlCommand::ArmCountdown { seconds: 1.0 }, T0)
        .unwrap();

    let frames = run_ticks(&mut engine, T0, 45);
    let all = events(&frames);

    let flagged: Vec<_> = all.iter().filter(|e| e.kind == EventKind::OcsFlagged).collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].boats, vec![early]);

    let recall = all
        .iter()
        .find(|e| e.kind == EventKind::GeneralRecall)
        .expect("general recall at the gun");
    assert_eq!(recall.boats, vec![early]);
    assert!(!all.iter().any(|e| e.kind == EventKind::StartSignal));

    let state = engine.state();
    assert_eq!(state.phase, RacePhase::Running);
    assert!(state.start_signal_sent);
    assert!(!state.boats[&clean].over_early);
}

#[test]
fn timeout_hook_fires_exactly_once() {
    let hooks = Arc::new(CountingHooks::default());
    let cfg = RaceConfig {
        race_duration_secs: 2.0,
        ..fixed(3)
    };
    let mut engine = RaceEngine::new(Uuid::new_v4(), cfg, hooks.clone());
    join(&mut engine, Uuid::new_v4(), "solo", false);
    engine
        .apply_control(ControlCommand::ArmCountdown { seconds: 0.0 }, T0)
        .unwrap();

    let frames = run_ticks(&mut engine, T0, 150);
    assert_eq!(engine.state().phase, RacePhase::Finished);
    assert_eq!(hooks.timeouts(), 1);
    assert_eq!(hooks.finishes(), 0);
    let timeouts = events(&frames)
        .iter()
        .filter(|e| e.kind == EventKind::RaceTimeout)
        .count();
    assert_eq!(timeouts, 1);

    // Boats keep moving after the race is over; nothing is re-reported
    let tick_before = engine.state().tick;
    run_ticks(&mut engine, T0 + 150 * TICK_MS, 30);
    assert_eq!(engine.state().tick, tick_before + 30);
    assert_eq!(hooks.timeouts(), 1);
}

#[test]
fn race_finishes_once_every_boat_is_home() {
    let hooks = Arc::new(CountingHooks::default());
    let mut engine = RaceEngine::new(Uuid::new_v4(), fixed(4), hooks.clone());
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    join(&mut engine, a, "a", false);
    join(&mut engine, b, "b", false);
    engine
        .apply_control(ControlCommand::ArmCountdown { seconds: 0.0 }, T0)
        .unwrap();
    run_ticks(&mut engine, T0, 30);
    assert_eq!(engine.state().phase, RacePhase::Running);

    let now = T0 + 30 * TICK_MS;
    engine.apply_control(ControlCommand::ForceFinish { boat: b }, now).unwrap();
    run_ticks(&mut engine, now, 5);
    assert_eq!(engine.state().phase, RacePhase::Running);
    assert_eq!(engine.state().leaderboard[0], b);

    let now = now + 5 * TICK_MS;
    engine.apply_control(ControlCommand::ForceFinish { boat: a }, now).unwrap();
    let frames = run_ticks(&mut engine, now, 30);

    assert_eq!(engine.state().phase, RacePhase::Finished);
    assert_eq!(hooks.finishes(), 1);
    assert!(hooks.history_len.load(std::sync::atomic::Ordering::SeqCst) > 0);
    let finished = events(&frames)
        .iter()
        .filter(|e| e.kind == EventKind::RaceFinished)
        .count();
    assert_eq!(finished, 1);
    assert_eq!(engine.state().leaderboard, vec![b, a]);
}

#[test]
fn fixed_wind_holds_for_thirty_seconds() {
    let cfg = fixed(5);
    let (direction, speed) = (cfg.wind.direction_deg, cfg.wind.speed_kts);
    let mut engine = RaceEngine::new(Uuid::new_v4(), cfg, Arc::new(LoggingHooks));
    join(&mut engine, Uuid::new_v4(), "a", true);

    for frame in run_ticks(&mut engine, T0, 30 * 30) {
        assert_eq!(frame.state.wind.direction_deg, direction);
        assert_eq!(frame.state.wind.speed_kts, speed);
    }
}

#[test]
fn shifting_wind_moves_but_stays_finite() {
    let mut engine = RaceEngine::new(Uuid::new_v4(), config(6), Arc::new(LoggingHooks));
    join(&mut engine, Uuid::new_v4(), "a", true);

    let frames = run_ticks(&mut engine, T0, 30 * 30);
    let first = frames[0].state.wind;
    let last = frames[frames.len() - 1].state.wind;
    assert_ne!(first, last);
    for frame in &frames {
        assert!(frame.state.wind.direction_deg.is_finite());
        assert!((0.0..=360.0).contains(&frame.state.wind.direction_deg));
        assert!(frame.state.wind.speed_kts >= 0.0);
    }
}

#[test]
fn jump_to_mark_and_set_lap_move_a_boat_along_the_course() {
    let mut engine = RaceEngine::new(Uuid::new_v4(), fixed(7), Arc::new(LoggingHooks));
    let boat = Uuid::new_v4();
    join(&mut engine, boat, "a", false);
    engine
        .apply_control(ControlCommand::JumpToMark { boat, leg: 2 }, T0)
        .unwrap();
    engine
        .apply_control(ControlCommand::SetLap { boat, lap: 1 }, T0)
        .unwrap();
    run_ticks(&mut engine, T0, 3);

    let b = &engine.state().boats[&boat];
    assert_eq!(b.next_mark_index, 2);
    assert_eq!(b.lap, 1);
    assert!(b.distance_to_next_mark > 0.0);
}

#[test]
fn bot_fleet_sails_the_course_and_finishes() {
    let hooks = Arc::new(CountingHooks::default());
    let cfg = RaceConfig {
        tick_rate: 10,
        max_tick_dt: 0.1,
        laps: 1,
        beat_length: 250.0,
        race_duration_secs: 1200.0,
        ..fixed(3)
    };
    let mut engine = RaceEngine::new(Uuid::from_u128(1), cfg, hooks.clone());
    let bots: Vec<Uuid> = (1..=4u128).map(|i| Uuid::from_u128(100 + i)).collect();
    for (i, id) in bots.iter().enumerate() {
        join(&mut engine, *id, &format!("bot {i}"), true);
    }
    engine
        .apply_control(ControlCommand::ArmCountdown { seconds: 5.0 }, T0)
        .unwrap();

    let mut laps: BTreeMap<Uuid, u32> = BTreeMap::new();
    let mut rounded = 0;
    let mut now = T0;
    while engine.state().phase != RacePhase::Finished && now < T0 + 1_300_000 {
        now += 100;
        let frame = engine.tick_at(now).unwrap();
        rounded += frame
            .events
            .iter()
            .filter(|ev| ev.kind == EventKind::MarkRounded)
            .count();
        for boat in frame.state.boats.values() {
            let before = laps.insert(boat.id, boat.lap).unwrap_or(0);
            assert!(boat.lap >= before, "lap went back for {}", boat.name);
        }
    }

    let state = engine.state();
    assert_eq!(state.phase, RacePhase::Finished);
    for id in &bots {
        let boat = &state.boats[id];
        assert!(boat.finished, "{} still on leg {}", boat.name, boat.next_mark_index);
        assert_eq!(boat.lap, 1);
    }
    // Windward mark and gate for every boat
    assert!(rounded >= 2 * bots.len());
    assert_eq!(hooks.finishes(), 1);
    assert_eq!(hooks.timeouts(), 0);
}
