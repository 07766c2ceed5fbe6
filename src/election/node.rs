//! Async election driver
//!
//! Feeds bus presence and timer ticks into [`Election`] and carries out its
//! actions: heartbeats go out on the bus, promotion starts a host loop from
//! the last frame this node saw, step-down stops it.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{BoatInput, RaceBus};
use crate::config::{ElectionConfig, RaceConfig};
use crate::host::{ControlCommand, ControlError, HostHandle, HostLoop, LoopExit, RaceEngine, RaceHooks, RaceRegistry};
use crate::race::events::{Frame, RaceEvent};
use crate::util::time::LoopClock;

use super::machine::{Election, ElectionAction};
use super::role::Role;

/// What a node currently believes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub role: Role,
    pub epoch: u64,
    pub host_id: Option<Uuid>,
}

/// State shared between the node task and its handles
#[derive(Default)]
struct Shared {
    host: Mutex<Option<HostHandle>>,
    last_frame: RwLock<Option<Arc<Frame>>>,
}

/// Handle to a running election node
#[derive(Clone)]
pub struct NodeHandle {
    client_id: Uuid,
    bus: RaceBus,
    status: watch::Receiver<NodeStatus>,
    shared: Arc<Shared>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl NodeHandle {
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<NodeStatus> {
        self.status.clone()
    }

    pub fn is_host(&self) -> bool {
        self.shared.host.lock().is_some()
    }

    /// Host-only race control. `NotHost` unless this node runs the loop.
    pub async fn control(&self, command: ControlCommand) -> Result<Vec<RaceEvent>, ControlError> {
        let host = self.shared.host.lock().clone();
        match host {
            Some(handle) => handle.control(command).await,
            None => Err(ControlError::NotHost),
        }
    }

    /// Send a boat input to whoever hosts
    pub fn send_input(&self, input: BoatInput) {
        self.bus.publish_input(input);
    }

    /// Latest frame seen from the current host (ours included)
    pub fn last_frame(&self) -> Option<Arc<Frame>> {
        self.shared.last_frame.read().clone()
    }

    /// Go offline; a hosted loop is stopped
    pub fn leave(&self) {
        self.shutdown.send_replace(true);
    }
}

/// One client taking part in the election for a race
pub struct ElectionNode {
    election: Election,
    race_id: Uuid,
    race: RaceConfig,
    bus: RaceBus,
    clock: LoopClock,
    hooks: Arc<dyn RaceHooks>,
    registry: Arc<RaceRegistry>,
    shared: Arc<Shared>,
    status_tx: watch::Sender<NodeStatus>,
    shutdown_rx: watch::Receiver<bool>,
    hosting: Option<JoinHandle<LoopExit>>,
}

impl ElectionNode {
    pub fn new(
        config: ElectionConfig,
        race_id: Uuid,
        race: RaceConfig,
        bus: RaceBus,
        clock: LoopClock,
        hooks: Arc<dyn RaceHooks>,
        registry: Arc<RaceRegistry>,
    ) -> (Self, NodeHandle) {
        let client_id = config.client_id;
        let (status_tx, status) = watch::channel(NodeStatus {
            role: Role::Unassigned,
            epoch: 0,
            host_id: None,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared::default());

        let handle = NodeHandle {
            client_id,
            bus: bus.clone(),
            status,
            shared: shared.clone(),
            shutdown: Arc::new(shutdown_tx),
        };
        let node = Self {
            election: Election::new(config),
            race_id,
            race,
            bus,
            clock,
            hooks,
            registry,
            shared,
            status_tx,
            shutdown_rx,
            hosting: None,
        };
        (node, handle)
    }

    /// Take part until told to leave
    pub async fn run(mut self) {
        let mut presence_rx = self.bus.subscribe_presence();
        let mut frames_rx = self.bus.subscribe_frames();

        let now = self.clock.now_ms();
        let actions = self.election.start(now);
        self.execute(actions);
        // Retained presence covers heartbeats sent before we subscribed
        for presence in self.bus.retained_presence() {
            let actions = self.election.on_presence(&presence, now);
            self.execute(actions);
        }

        let check_every = Duration::from_millis((self.election.heartbeat_ms() / 4).max(10));
        let mut ticker = interval(check_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                msg = presence_rx.recv() => match msg {
                    Ok(presence) => {
                        let actions = self.election.on_presence(&presence, self.clock.now_ms());
                        self.execute(actions);
                    }
                    Err(RecvError::Lagged(n)) => warn!(client_id = %self.election.client_id(), skipped = n, "Presence channel lagged"),
                    Err(RecvError::Closed) => break,
                },
                frame = frames_rx.recv() => match frame {
                    Ok(frame) => self.observe_frame(frame),
                    Err(RecvError::Lagged(n)) => debug!(skipped = n, "Frame channel lagged"),
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => {
                    self.check_local_loop().await;
                    let actions = self.election.on_tick(self.clock.now_ms());
                    self.execute(actions);
                }
            }
        }

        let actions = self.election.leave(self.clock.now_ms());
        self.execute(actions);
        info!(client_id = %self.election.client_id(), "Left race");
    }

    fn execute(&mut self, actions: Vec<ElectionAction>) {
        for action in actions {
            match action {
                ElectionAction::Publish(presence) => self.bus.publish_presence(presence),
                ElectionAction::StartHosting { epoch } => self.start_hosting(epoch),
                ElectionAction::StopHosting => self.stop_hosting(),
            }
        }

        let status = NodeStatus {
            role: self.election.role(),
            epoch: self.election.host_epoch(),
            host_id: self.election.host_id(),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Keep the newest frame from a host at or above the highest epoch
    fn observe_frame(&mut self, frame: Arc<Frame>) {
        if frame.state.race_id != self.race_id {
            return;
        }
        if frame.state.host_epoch < self.election.highest_epoch() {
            debug!(
                host_epoch = frame.state.host_epoch,
                highest = self.election.highest_epoch(),
                "Dropping frame from a superseded host"
            );
            return;
        }
        *self.shared.last_frame.write() = Some(frame);
    }

    fn start_hosting(&mut self, epoch: u64) {
        self.stop_hosting();

        let client_id = self.election.client_id();
        let last = self.shared.last_frame.read().clone();
        let mut engine = match last {
            Some(frame) => {
                info!(race_id = %self.race_id, tick = frame.tick, epoch, "Resuming race from last frame");
                RaceEngine::resume((*frame.state).clone(), self.race.clone(), self.hooks.clone())
            }
            None => RaceEngine::new(self.race_id, self.race.clone(), self.hooks.clone()),
        };
        engine.claim_host(client_id, epoch);

        let (host_loop, handle) = HostLoop::new(engine, self.clock, Some(self.bus.clone()));
        self.registry.insert(handle.clone());
        *self.shared.host.lock() = Some(handle);
        self.hosting = Some(tokio::spawn(host_loop.run()));
    }

    fn stop_hosting(&mut self) {
        let handle = self.shared.host.lock().take();
        if let Some(handle) = handle {
            handle.stop();
            self.registry.remove_handle(&handle);
            info!(race_id = %self.race_id, client_id = %self.election.client_id(), "Host loop stopping");
        }
        // The loop task winds down on its own
        self.hosting = None;
    }

    /// Notice a loop that ended while we still think we host
    async fn check_local_loop(&mut self) {
        if !self.hosting.as_ref().is_some_and(|task| task.is_finished()) {
            return;
        }
        let Some(task) = self.hosting.take() else {
            return;
        };
        match task.await {
            Ok(exit) => warn!(race_id = %self.race_id, reason = ?exit.reason, tick = exit.state.tick, "Host loop ended"),
            Err(e) => warn!(race_id = %self.race_id, error = %e, "Host loop task failed"),
        }
        let actions = self.election.on_host_halted(self.clock.now_ms());
        self.execute(actions);
    }
}
