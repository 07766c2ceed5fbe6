//! Fixed-rate host loop driving a race engine

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{BoatInput, RaceBus};
use crate::race::events::{Frame, RaceEvent};
use crate::race::state::RaceState;
use crate::util::rate_limit::InputRateLimiters;
use crate::util::time::{tick_period, LoopClock};

use super::control::{ControlCommand, ControlError};
use super::engine::RaceEngine;

/// Messages into a running loop
#[derive(Debug)]
pub enum HostMsg {
    Input(BoatInput),
    Control {
        command: ControlCommand,
        reply: oneshot::Sender<Result<Vec<RaceEvent>, ControlError>>,
    },
}

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Asked to stop (step-down, shutdown)
    Stopped,
    /// Too many failed ticks
    Halted,
}

/// Final word from a loop
#[derive(Debug, Clone)]
pub struct LoopExit {
    pub reason: ExitReason,
    pub state: Arc<RaceState>,
}

/// Handle to a running host loop
#[derive(Clone)]
pub struct HostHandle {
    pub race_id: Uuid,
    msg_tx: mpsc::Sender<HostMsg>,
    frames: watch::Receiver<Arc<Frame>>,
    stop_tx: Arc<watch::Sender<bool>>,
    boat_count: Arc<AtomicUsize>,
}

impl HostHandle {
    /// Queue an input for the next tick
    pub async fn send_input(&self, input: BoatInput) -> bool {
        self.msg_tx.send(HostMsg::Input(input)).await.is_ok()
    }

    /// Apply a control command at the next tick boundary
    pub async fn control(&self, command: ControlCommand) -> Result<Vec<RaceEvent>, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.msg_tx
            .send(HostMsg::Control { command, reply })
            .await
            .map_err(|_| ControlError::LoopStopped)?;
        rx.await.map_err(|_| ControlError::LoopStopped)?
    }

    /// Latest published frame
    pub fn latest(&self) -> Arc<Frame> {
        self.frames.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Frame>> {
        self.frames.clone()
    }

    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        !self.msg_tx.is_closed()
    }

    pub fn boat_count(&self) -> usize {
        self.boat_count.load(Ordering::Relaxed)
    }

    /// Both handles drive the same loop
    pub fn same_loop(&self, other: &HostHandle) -> bool {
        self.msg_tx.same_channel(&other.msg_tx)
    }
}

/// The task that owns a race engine
pub struct HostLoop {
    engine: RaceEngine,
    clock: LoopClock,
    msg_rx: mpsc::Receiver<HostMsg>,
    bus: Option<RaceBus>,
    bus_inputs: Option<broadcast::Receiver<BoatInput>>,
    limiters: InputRateLimiters,
    frame_tx: watch::Sender<Arc<Frame>>,
    stop_rx: watch::Receiver<bool>,
    boat_count: Arc<AtomicUsize>,
}

impl HostLoop {
    /// Wrap an engine. With a bus, inputs are read from it and every frame
    /// is published on it.
    pub fn new(engine: RaceEngine, clock: LoopClock, bus: Option<RaceBus>) -> (Self, HostHandle) {
        let (msg_tx, msg_rx) = mpsc::channel(256);
        let initial = Arc::new(Frame::new(engine.state(), Vec::new()));
        let (frame_tx, frames) = watch::channel(initial);
        let (stop_tx, stop_rx) = watch::channel(false);
        let boat_count = Arc::new(AtomicUsize::new(engine.state().boats.len()));
        let limiters = InputRateLimiters::new(engine.context().config.input_rate_limit);

        let handle = HostHandle {
            race_id: engine.race_id(),
            msg_tx,
            frames,
            stop_tx: Arc::new(stop_tx),
            boat_count: boat_count.clone(),
        };
        let bus_inputs = bus.as_ref().map(|b| b.subscribe_inputs());
        let host_loop = Self {
            engine,
            clock,
            msg_rx,
            bus,
            bus_inputs,
            limiters,
            frame_tx,
            stop_rx,
            boat_count,
        };
        (host_loop, handle)
    }

    /// Run the authoritative tick loop until stopped or halted
    pub async fn run(mut self) -> LoopExit {
        let race_id = self.engine.race_id();
        let tick_rate = self.engine.context().config.tick_rate;
        info!(race_id = %race_id, tick_rate, "Host loop started");

        let mut tick_interval = interval(tick_period(tick_rate));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            tokio::select! {
                _ = tick_interval.tick() => {}
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        break ExitReason::Stopped;
                    }
                    continue;
                }
            }
            let now = self.clock.now_ms();

            // Drain input and control queues
            self.process_messages(now);
            self.drain_bus_inputs();

            match self.engine.tick_at(now) {
                Ok(frame) => {
                    self.boat_count.store(frame.state.boats.len(), Ordering::Relaxed);
                    if let Some(bus) = &self.bus {
                        bus.publish_frame(frame.clone());
                    }
                    self.frame_tx.send_replace(frame);
                }
                Err(_) if self.engine.is_halted() => break ExitReason::Halted,
                // Already logged; the published state did not move
                Err(_) => {}
            }
        };

        info!(race_id = %race_id, reason = ?reason, "Host loop stopped");
        LoopExit {
            reason,
            state: self.engine.state(),
        }
    }

    fn process_messages(&mut self, now: u64) {
        while let Ok(msg) = self.msg_rx.try_recv() {
            match msg {
                HostMsg::Input(input) => self.accept_input(&input),
                HostMsg::Control { command, reply } => {
                    let leaving = match &command {
                        ControlCommand::LeaveBoat { id } => Some(*id),
                        _ => None,
                    };
                    let result = self.engine.apply_control(command, now);
                    match &result {
                        Ok(_) => {
                            if let Some(id) = leaving {
                                self.limiters.forget(&id);
                            }
                        }
                        Err(e) => warn!(race_id = %self.engine.race_id(), error = %e, "Control command rejected"),
                    }
                    let _ = reply.send(result);
                }
            }
        }
    }

    fn drain_bus_inputs(&mut self) {
        let mut received = Vec::new();
        if let Some(rx) = self.bus_inputs.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(input) => received.push(input),
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        warn!(skipped = n, "Input channel lagged");
                    }
                    Err(_) => break,
                }
            }
        }
        for input in received {
            self.accept_input(&input);
        }
    }

    fn accept_input(&mut self, input: &BoatInput) {
        if !self.engine.state().boats.contains_key(&input.boat_id) {
            debug!(boat_id = %input.boat_id, "Input for a boat not in this race");
            return;
        }
        if !self.limiters.check(input.boat_id) {
            warn!(boat_id = %input.boat_id, seq = input.seq, "Input rate limited");
            return;
        }
        self.engine.submit_input(input);
    }
}
