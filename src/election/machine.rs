//! Synchronous election state machine
//!
//! Fed presence messages and clock ticks, answers with actions for the
//! driver to carry out. Holds no channels and never sleeps, so every
//! transition is testable with plain millisecond timestamps.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{Presence, PresenceStatus};
use crate::config::ElectionConfig;

use super::role::Role;

/// Work for the driver after an event
#[derive(Debug, Clone, PartialEq)]
pub enum ElectionAction {
    Publish(Presence),
    /// Run the host loop under this epoch, resuming from the last frame seen
    StartHosting { epoch: u64 },
    StopHosting,
}

#[derive(Debug, Clone, Copy)]
struct HostClaim {
    client_id: Uuid,
    epoch: u64,
    last_seen_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Peer {
    status: PresenceStatus,
    last_seen_ms: u64,
}

/// `a` wins over `b`: newer epoch, then smaller client id
fn outranks(a: (u64, Uuid), b: (u64, Uuid)) -> bool {
    a.0 > b.0 || (a.0 == b.0 && a.1 < b.1)
}

/// One client's view of who hosts the race
pub struct Election {
    config: ElectionConfig,
    role: Role,
    /// May self-promote
    eligible: bool,
    /// Our claim while host
    epoch: u64,
    highest_epoch: u64,
    host: Option<HostClaim>,
    peers: BTreeMap<Uuid, Peer>,
    discovery_deadline_ms: Option<u64>,
    promotion_at_ms: Option<u64>,
    last_heartbeat_ms: Option<u64>,
    jitter: ChaCha8Rng,
}

impl Election {
    pub fn new(config: ElectionConfig) -> Self {
        let (hi, lo) = config.client_id.as_u64_pair();
        Self {
            role: Role::Unassigned,
            eligible: !config.spectator,
            epoch: 0,
            highest_epoch: 0,
            host: None,
            peers: BTreeMap::new(),
            discovery_deadline_ms: None,
            promotion_at_ms: None,
            last_heartbeat_ms: None,
            jitter: ChaCha8Rng::seed_from_u64(hi ^ lo),
            config,
        }
    }

    pub fn client_id(&self) -> Uuid {
        self.config.client_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Epoch of the host we follow, or our own while hosting
    pub fn host_epoch(&self) -> u64 {
        match (self.role, self.host) {
            (Role::Host, _) => self.epoch,
            (_, Some(host)) => host.epoch,
            _ => self.highest_epoch,
        }
    }

    pub fn highest_epoch(&self) -> u64 {
        self.highest_epoch
    }

    pub fn host_id(&self) -> Option<Uuid> {
        if self.role == Role::Host {
            Some(self.config.client_id)
        } else {
            self.host.map(|h| h.client_id)
        }
    }

    pub fn heartbeat_ms(&self) -> u64 {
        self.config.heartbeat_ms
    }

    /// Join: announce and wait for a host heartbeat
    pub fn start(&mut self, now_ms: u64) -> Vec<ElectionAction> {
        if !self.eligible {
            self.role = Role::Spectator;
        }
        self.discovery_deadline_ms = Some(now_ms + self.config.discovery_timeout_ms);
        info!(client_id = %self.config.client_id, role = ?self.role, "Joined race");
        vec![self.heartbeat(now_ms)]
    }

    /// Leave: stop hosting and go offline
    pub fn leave(&mut self, now_ms: u64) -> Vec<ElectionAction> {
        let mut actions = Vec::new();
        if self.role == Role::Host {
            actions.push(ElectionAction::StopHosting);
        }
        self.role = Role::Unassigned;
        self.host = None;
        self.promotion_at_ms = None;
        actions.push(ElectionAction::Publish(Presence {
            client_id: self.config.client_id,
            status: PresenceStatus::Offline,
            epoch: self.highest_epoch,
            sent_at_ms: now_ms,
        }));
        actions
    }

    /// The local host loop gave up. Step down and stay out of later
    /// promotions.
    pub fn on_host_halted(&mut self, now_ms: u64) -> Vec<ElectionAction> {
        if self.role != Role::Host {
            return Vec::new();
        }
        warn!(client_id = %self.config.client_id, epoch = self.epoch, "Stepping down after loop halt");
        self.eligible = false;
        self.role = Role::Spectator;
        vec![ElectionAction::StopHosting, self.heartbeat(now_ms)]
    }

    pub fn on_presence(&mut self, presence: &Presence, now_ms: u64) -> Vec<ElectionAction> {
        let mut actions = Vec::new();
        let id = presence.client_id;
        if id == self.config.client_id {
            return actions;
        }
        let was_host = self.role != Role::Host && self.host.map(|h| h.client_id) == Some(id);

        if presence.status == PresenceStatus::Offline {
            self.peers.remove(&id);
            if was_host {
                info!(host = %id, "Host went offline");
                self.host = None;
                self.schedule_promotion(now_ms, true);
            }
            return actions;
        }

        self.peers.insert(
            id,
            Peer {
                status: presence.status,
                last_seen_ms: now_ms,
            },
        );

        if presence.status != PresenceStatus::Host {
            self.highest_epoch = self.highest_epoch.max(presence.epoch);
            if was_host {
                info!(host = %id, "Host stepped down");
                self.host = None;
                self.schedule_promotion(now_ms, true);
            }
            return actions;
        }

        self.on_host_claim(presence, now_ms, &mut actions);
        actions
    }

    fn on_host_claim(&mut self, claim: &Presence, now_ms: u64, actions: &mut Vec<ElectionAction>) {
        let me = self.config.client_id;
        if self.role == Role::Host {
            if outranks((claim.epoch, claim.client_id), (self.epoch, me)) {
                info!(
                    winner = %claim.client_id,
                    epoch = claim.epoch,
                    our_epoch = self.epoch,
                    "Stepping down for a winning host claim"
                );
                self.role = self.follower_role();
                self.accept_host(claim, now_ms);
                actions.push(ElectionAction::StopHosting);
                actions.push(self.heartbeat(now_ms));
            } else {
                warn!(
                    claimant = %claim.client_id,
                    epoch = claim.epoch,
                    our_epoch = self.epoch,
                    "Rejected host claim"
                );
                // Reassert so the loser steps down
                actions.push(self.heartbeat(now_ms));
            }
            return;
        }

        if claim.epoch < self.highest_epoch {
            warn!(
                claimant = %claim.client_id,
                epoch = claim.epoch,
                highest = self.highest_epoch,
                "Rejected stale host claim"
            );
            return;
        }
        if let Some(current) = self.host {
            if current.client_id != claim.client_id
                && !outranks((claim.epoch, claim.client_id), (current.epoch, current.client_id))
            {
                debug!(claimant = %claim.client_id, host = %current.client_id, "Ignoring losing host claim");
                return;
            }
        }

        let role_before = self.role;
        if self.role == Role::Unassigned {
            self.role = self.follower_role();
        }
        self.accept_host(claim, now_ms);
        if self.role != role_before {
            actions.push(self.heartbeat(now_ms));
        }
    }

    fn accept_host(&mut self, claim: &Presence, now_ms: u64) {
        if self.host.map(|h| h.client_id) != Some(claim.client_id) {
            info!(host = %claim.client_id, epoch = claim.epoch, "Following host");
        }
        self.host = Some(HostClaim {
            client_id: claim.client_id,
            epoch: claim.epoch,
            last_seen_ms: now_ms,
        });
        self.highest_epoch = self.highest_epoch.max(claim.epoch);
        self.promotion_at_ms = None;
        self.discovery_deadline_ms = None;
    }

    /// Advance timers: staleness, discovery, promotion and heartbeats
    pub fn on_tick(&mut self, now_ms: u64) -> Vec<ElectionAction> {
        let mut actions = Vec::new();
        let stale_ms = self.config.host_stale_ms;
        self.peers
            .retain(|_, p| now_ms.saturating_sub(p.last_seen_ms) <= stale_ms);

        if self.role != Role::Host {
            if let Some(host) = self.host {
                let silent_ms = now_ms.saturating_sub(host.last_seen_ms);
                if silent_ms > stale_ms {
                    warn!(host = %host.client_id, silent_ms, "Host heartbeat stale");
                    self.host = None;
                    self.schedule_promotion(now_ms, true);
                }
            } else if let Some(deadline) = self.discovery_deadline_ms {
                if now_ms >= deadline {
                    self.discovery_deadline_ms = None;
                    info!(client_id = %self.config.client_id, "No host found");
                    self.schedule_promotion(now_ms, false);
                }
            }

            if let Some(at) = self.promotion_at_ms {
                if now_ms >= at {
                    self.promote(now_ms, &mut actions);
                }
            }
        }

        let due = self
            .last_heartbeat_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= self.config.heartbeat_ms);
        if due {
            actions.push(self.heartbeat(now_ms));
        }
        actions
    }

    /// Smaller eligible ids go first; each rank waits one stale window.
    /// After a failure (not on first discovery) a jitter spreads out
    /// clients that saw the host vanish at the same moment.
    fn schedule_promotion(&mut self, now_ms: u64, after_failure: bool) {
        if !self.eligible || self.promotion_at_ms.is_some() {
            return;
        }
        let rank = self.rank(now_ms) as u64;
        let mut delay_ms = rank * self.config.host_stale_ms;
        if after_failure {
            delay_ms += self.jitter.gen_range(0..=self.config.promotion_jitter_ms);
        }
        self.promotion_at_ms = Some(now_ms + delay_ms);
        debug!(client_id = %self.config.client_id, rank, delay_ms, "Promotion scheduled");
    }

    /// Fresh, eligible peers with a smaller id
    fn rank(&self, now_ms: u64) -> usize {
        let me = self.config.client_id;
        self.peers
            .iter()
            .filter(|(id, p)| {
                **id < me
                    && matches!(p.status, PresenceStatus::Online | PresenceStatus::Player)
                    && now_ms.saturating_sub(p.last_seen_ms) <= self.config.host_stale_ms
            })
            .count()
    }

    fn promote(&mut self, now_ms: u64, actions: &mut Vec<ElectionAction>) {
        self.promotion_at_ms = None;
        self.discovery_deadline_ms = None;
        self.epoch = self.highest_epoch + 1;
        self.highest_epoch = self.epoch;
        self.role = Role::Host;
        self.host = None;
        info!(client_id = %self.config.client_id, epoch = self.epoch, "Promoted to host");
        actions.push(ElectionAction::StartHosting { epoch: self.epoch });
        actions.push(self.heartbeat(now_ms));
    }

    fn follower_role(&self) -> Role {
        if self.config.spectator || !self.eligible {
            Role::Spectator
        } else {
            Role::Player
        }
    }

    fn heartbeat(&mut self, now_ms: u64) -> ElectionAction {
        self.last_heartbeat_ms = Some(now_ms);
        let epoch = if self.role == Role::Host {
            self.epoch
        } else {
            self.highest_epoch
        };
        ElectionAction::Publish(Presence {
            client_id: self.config.client_id,
            status: self.role.presence_status(),
            epoch,
            sent_at_ms: now_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(n: u128) -> Election {
        Election::new(ElectionConfig::for_client(Uuid::from_u128(n)))
    }

    fn published(actions: &[ElectionAction]) -> Presence {
        actions
            .iter()
            .find_map(|a| match a {
                ElectionAction::Publish(p) => Some(p.clone()),
                _ => None,
            })
            .expect("no presence published")
    }

    fn started(actions: &[ElectionAction]) -> Option<u64> {
        actions.iter().find_map(|a| match a {
            ElectionAction::StartHosting { epoch } => Some(*epoch),
            _ => None,
        })
    }

    fn claim(n: u128, epoch: u64) -> Presence {
        Presence {
            client_id: Uuid::from_u128(n),
            status: PresenceStatus::Host,
            epoch,
            sent_at_ms: 0,
        }
    }

    /// A hosts at epoch 1, B follows
    fn hosted_pair() -> (Election, Election) {
        let mut a = client(1);
        let mut b = client(2);
        let hello_a = published(&a.start(0));
        let hello_b = published(&b.start(0));
        a.on_presence(&hello_b, 0);
        b.on_presence(&hello_a, 0);

        let a_actions = a.on_tick(2500);
        assert_eq!(started(&a_actions), Some(1));
        assert_eq!(started(&b.on_tick(2500)), None);

        b.on_presence(&published(&a_actions), 2500);
        (a, b)
    }

    #[test]
    fn smallest_online_id_promotes_after_discovery() {
        let (a, b) = hosted_pair();
        assert_eq!(a.role(), Role::Host);
        assert_eq!(b.role(), Role::Player);
        assert_eq!(b.host_id(), Some(a.client_id()));
        assert_eq!(b.host_epoch(), 1);
    }

    #[test]
    fn stale_host_is_replaced_under_a_higher_epoch() {
        let (_a, mut b) = hosted_pair();
        assert_eq!(started(&b.on_tick(4000)), None);

        let mut epoch = None;
        for now in (6501..=7300).step_by(50) {
            if let Some(e) = started(&b.on_tick(now)) {
                epoch = Some(e);
                break;
            }
        }
        assert_eq!(epoch, Some(2));
        assert_eq!(b.role(), Role::Host);
    }

    #[test]
    fn lower_epoch_claims_are_rejected() {
        let (mut a, mut b) = hosted_pair();
        for now in (6501..=7300).step_by(50) {
            b.on_tick(now);
        }
        assert_eq!(b.role(), Role::Host);

        // Old host resurfaces still claiming epoch 1
        let actions = b.on_presence(&claim(1, 1), 7400);
        assert!(!actions.contains(&ElectionAction::StopHosting));
        let reassert = published(&actions);
        assert_eq!(reassert.status, PresenceStatus::Host);
        assert_eq!(reassert.epoch, 2);

        // and yields once it hears the epoch 2 claim
        let actions = a.on_presence(&reassert, 7400);
        assert!(actions.contains(&ElectionAction::StopHosting));
        assert_eq!(a.role(), Role::Player);
        assert_eq!(a.host_id(), Some(b.client_id()));
    }

    #[test]
    fn equal_epochs_resolve_to_the_smaller_id() {
        // Partitioned: neither sees the other before discovery ends
        let mut a = client(1);
        let mut b = client(2);
        a.start(0);
        b.start(0);
        assert_eq!(started(&a.on_tick(2500)), Some(1));
        assert_eq!(started(&b.on_tick(2500)), Some(1));

        let a_actions = a.on_presence(&claim(2, 1), 2600);
        assert!(!a_actions.contains(&ElectionAction::StopHosting));
        assert_eq!(a.role(), Role::Host);

        let b_actions = b.on_presence(&claim(1, 1), 2600);
        assert!(b_actions.contains(&ElectionAction::StopHosting));
        assert_eq!(b.role(), Role::Player);
        assert_eq!(b.host_id(), Some(a.client_id()));
    }

    #[test]
    fn followers_ignore_a_losing_claim() {
        let (_a, mut b) = hosted_pair();
        b.on_presence(&claim(3, 1), 2600);
        assert_eq!(b.host_id(), Some(Uuid::from_u128(1)));
    }

    #[test]
    fn spectators_never_promote() {
        let mut config = ElectionConfig::for_client(Uuid::from_u128(1));
        config.spectator = true;
        let mut s = Election::new(config);
        let hello = published(&s.start(0));
        assert_eq!(hello.status, PresenceStatus::Spectator);
        for now in (0..20_000).step_by(500) {
            assert_eq!(started(&s.on_tick(now)), None);
        }
        assert_eq!(s.role(), Role::Spectator);
    }

    #[test]
    fn halted_host_steps_down_for_good() {
        let (mut a, mut b) = hosted_pair();
        let actions = a.on_host_halted(3000);
        assert!(actions.contains(&ElectionAction::StopHosting));
        let notice = published(&actions);
        assert_eq!(notice.status, PresenceStatus::Spectator);

        // B takes over without waiting out a rank for A
        b.on_presence(&notice, 3000);
        let mut b_epoch = None;
        for now in (3000..=3800).step_by(50) {
            if let Some(e) = started(&b.on_tick(now)) {
                b_epoch = Some(e);
            }
            assert_eq!(started(&a.on_tick(now)), None);
        }
        assert_eq!(b_epoch, Some(2));
    }
}
