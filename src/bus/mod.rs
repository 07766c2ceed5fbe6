//! In-process race bus: presence, inputs and frames

pub mod protocol;

pub use protocol::{BoatInput, InputCommand, Presence, PresenceStatus};

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::race::Frame;

/// Default channel capacity
pub const BUS_CAPACITY: usize = 256;

struct BusInner {
    /// Last presence per client
    retained: DashMap<Uuid, Presence>,
    presence_tx: broadcast::Sender<Presence>,
    input_tx: broadcast::Sender<BoatInput>,
    frame_tx: broadcast::Sender<Arc<Frame>>,
}

/// Shared pub/sub channel between the clients of one race
#[derive(Clone)]
pub struct RaceBus {
    inner: Arc<BusInner>,
}

impl RaceBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (presence_tx, _) = broadcast::channel(capacity);
        let (input_tx, _) = broadcast::channel(capacity);
        let (frame_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(BusInner {
                retained: DashMap::new(),
                presence_tx,
                input_tx,
                frame_tx,
            }),
        }
    }

    /// Publish a heartbeat. Retained until the client goes offline.
    pub fn publish_presence(&self, presence: Presence) {
        if presence.status == PresenceStatus::Offline {
            self.inner.retained.remove(&presence.client_id);
        } else {
            self.inner.retained.insert(presence.client_id, presence.clone());
        }
        let _ = self.inner.presence_tx.send(presence);
    }

    /// Retained presence, ordered by client id
    pub fn retained_presence(&self) -> Vec<Presence> {
        let mut all: Vec<Presence> = self
            .inner
            .retained
            .iter()
            .map(|e| e.value().clone())
            .collect();
        all.sort_by_key(|p| p.client_id);
        all
    }

    pub fn subscribe_presence(&self) -> broadcast::Receiver<Presence> {
        self.inner.presence_tx.subscribe()
    }

    pub fn publish_input(&self, input: BoatInput) {
        if self.inner.input_tx.send(input).is_err() {
            debug!("Input published with no host listening");
        }
    }

    pub fn subscribe_inputs(&self) -> broadcast::Receiver<BoatInput> {
        self.inner.input_tx.subscribe()
    }

    pub fn publish_frame(&self, frame: Arc<Frame>) {
        let _ = self.inner.frame_tx.send(frame);
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<Arc<Frame>> {
        self.inner.frame_tx.subscribe()
    }
}

impl Default for RaceBus {
    fn default() -> Self {
        Self::new(BUS_CAPACITY)
    }
}
