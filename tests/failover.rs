//! Host failover over the in-process bus, on virtual time

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use regatta_host::bus::RaceBus;
use regatta_host::config::{ElectionConfig, RaceConfig};
use regatta_host::election::{ElectionNode, NodeHandle, Role};
use regatta_host::host::{ControlCommand, ControlError, LoggingHooks, RaceRegistry};
use regatta_host::race::RacePhase;
use regatta_host::util::time::LoopClock;

fn spawn(id: u128, bus: &RaceBus, clock: LoopClock, race_id: Uuid) -> (NodeHandle, Arc<RaceRegistry>) {
    let (handle, registry, _task) = spawn_task(id, bus, clock, race_id);
    (handle, registry)
}

fn spawn_task(id: u128, bus: &RaceBus, clock: LoopClock, race_id: Uuid) -> (NodeHandle, Arc<RaceRegistry>, JoinHandle<()>) {
    let registry = Arc::new(RaceRegistry::new());
    let race = RaceConfig {
        seed: Some(21),
        ..RaceConfig::default()
    };
    let (node, handle) = ElectionNode::new(
        ElectionConfig::for_client(Uuid::from_u128(id)),
        race_id,
        race,
        bus.clone(),
        clock,
        Arc::new(LoggingHooks),
        registry.clone(),
    );
    let task = tokio::spawn(node.run());
    (handle, registry, task)
}

#[tokio::test(start_paused = true)]
async fn follower_takes_over_from_the_last_frame() {
    let bus = RaceBus::default();
    let clock = LoopClock::new();
    let race_id = Uuid::new_v4();
    let (a, a_registry) = spawn(1, &bus, clock, race_id);
    let (b, b_registry) = spawn(2, &bus, clock, race_id);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(a.status().role, Role::Host);
    assert_eq!(b.status().role, Role::Player);
    assert_eq!(a_registry.active_races(), 1);
    assert_eq!(b_registry.active_races(), 0);

    let boat = Uuid::new_v4();
    a.control(ControlCommand::JoinBoat {
        id: boat,
        name: "bot".into(),
        bot: true,
    })
    .await
    .unwrap();
    a.control(ControlCommand::ArmCountdown { seconds: 1.0 })
        .await
        .unwrap();
    assert_eq!(
        b.control(ControlCommand::ResetRace).await,
        Err(ControlError::NotHost)
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    let before = b.last_frame().expect("follower tracks frames");
    assert_eq!(before.state.phase, RacePhase::Running);
    assert_eq!(before.state.host_epoch, 1);
    assert!(before.state.boats.contains_key(&boat));

    a.leave();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let status = b.status();
    assert_eq!(status.role, Role::Host);
    assert_eq!(status.epoch, 2);
    assert_eq!(b_registry.active_races(), 1);
    assert_eq!(
        a.control(ControlCommand::ResetRace).await,
        Err(ControlError::NotHost)
    );

    let after = b.last_frame().expect("new host publishes");
    assert_eq!(after.state.host_id, Some(b.client_id()));
    assert_eq!(after.state.host_epoch, 2);
    // Resumed, not restarted
    assert!(after.tick > before.tick);
    assert_eq!(after.state.phase, RacePhase::Running);
    assert_eq!(after.state.start_at_ms, before.state.start_at_ms);
    assert!(after.state.boats.contains_key(&boat));

    b.control(ControlCommand::SetFixedWind { fixed: true })
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn late_joiner_follows_the_existing_host() {
    let bus = RaceBus::default();
    let clock = LoopClock::new();
    let race_id = Uuid::new_v4();
    // Larger id hosts first
    let (first, _) = spawn(9, &bus, clock, race_id);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(first.status().role, Role::Host);

    let (late, _) = spawn(1, &bus, clock, race_id);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(late.status().role, Role::Player);
    assert_eq!(late.status().host_id, Some(first.client_id()));
    assert_eq!(first.status().role, Role::Host);
    assert_eq!(first.status().epoch, 1);
}

#[tokio::test(start_paused = true)]
async fn silent_host_is_replaced_without_a_goodbye() {
    let bus = RaceBus::default();
    let clock = LoopClock::new();
    let race_id = Uuid::new_v4();
    let (a, a_registry, a_task) = spawn_task(1, &bus, clock, race_id);
    let (b, b_registry) = spawn(2, &bus, clock, race_id);
    let (c, c_registry) = spawn(3, &bus, clock, race_id);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(a.status().role, Role::Host);
    let boat = Uuid::new_v4();
    a.control(ControlCommand::JoinBoat {
        id: boat,
        name: "bot".into(),
        bot: true,
    })
    .await
    .unwrap();
    a.control(ControlCommand::ArmCountdown { seconds: 1.0 })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    // Crash: no Offline presence, the loop just stops
    a_task.abort();
    a_registry.stop_all();
    let before = b.last_frame().expect("follower tracks frames");
    assert_eq!(before.state.host_epoch, 1);
    assert_eq!(before.state.phase, RacePhase::Running);

    // Stale window, then the smallest remaining id promotes
    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(b.status().role, Role::Host);
    assert_eq!(b.status().epoch, 2);
    assert_eq!(c.status().role, Role::Player);
    assert_eq!(c.status().host_id, Some(b.client_id()));
    assert_eq!(b_registry.active_races(), 1);
    assert_eq!(c_registry.active_races(), 0);

    let after = c.last_frame().expect("new host publishes");
    assert_eq!(after.state.host_id, Some(b.client_id()));
    assert_eq!(after.state.host_epoch, 2);
    assert!(after.tick > before.tick);
    assert_eq!(after.state.start_at_ms, before.state.start_at_ms);
    assert!(after.state.boats.contains_key(&boat));
}
