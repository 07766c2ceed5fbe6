//! Discrete race events and published frames

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::rules::RuleId;
use super::state::RaceState;

/// What an event is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Penalty,
    SpinStarted,
    PenaltyCleared,
    MarkRounded,
    LapCompleted,
    Finished,
    OcsFlagged,
    OcsCleared,
    StartSignal,
    GeneralRecall,
    CountdownArmed,
    RaceTimeout,
    RaceReset,
    RaceFinished,
    BoatJoined,
    BoatLeft,
}

/// Entry in the event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceEvent {
    pub event_id: u64,
    /// Race clock when the event happened
    pub t: f32,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<RuleId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boats: Vec<Uuid>,
    pub message: String,
}

impl RaceEvent {
    /// New event stamped with the next id and the current race clock
    pub fn next(state: &mut RaceState, kind: EventKind, message: impl Into<String>) -> Self {
        let event_id = state.next_event_id;
        state.next_event_id += 1;
        Self {
            event_id,
            t: state.t,
            kind,
            rule_id: None,
            boats: Vec::new(),
            message: message.into(),
        }
    }

    pub fn with_rule(mut self, rule: RuleId) -> Self {
        self.rule_id = Some(rule);
        self
    }

    pub fn with_boats(mut self, boats: impl IntoIterator<Item = Uuid>) -> Self {
        self.boats = boats.into_iter().collect();
        self
    }
}

/// Immutable state plus the events produced by the tick that made it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub tick: u64,
    pub state: Arc<RaceState>,
    pub events: Vec<RaceEvent>,
}

impl Frame {
    pub fn new(state: Arc<RaceState>, events: Vec<RaceEvent>) -> Self {
        Self {
            tick: state.tick,
            state,
            events,
        }
    }
}

/// Compact per-second record kept for the persistence collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub tick: u64,
    pub t: f32,
    pub positions: Vec<(Uuid, Vec2)>,
    pub leaderboard: Vec<Uuid>,
}

impl FrameSummary {
    pub fn of(state: &RaceState) -> Self {
        Self {
            tick: state.tick,
            t: state.t,
            positions: state.boats.values().map(|b| (b.id, b.pos)).collect(),
            leaderboard: state.leaderboard.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::course::Course;
    use crate::race::state::Wind;

    #[test]
    fn event_ids_are_sequential() {
        let mut state = RaceState::new(
            Uuid::new_v4(),
            1,
            Course::windward_leeward(0.0, 1, 400.0),
            Wind {
                direction_deg: 0.0,
                speed_kts: 10.0,
            },
            30.0,
        );
        let a = RaceEvent::next(&mut state, EventKind::CountdownArmed, "armed");
        let b = RaceEvent::next(&mut state, EventKind::StartSignal, "go").with_rule(RuleId::OppositeTack);
        assert_eq!(a.event_id + 1, b.event_id);
        assert_eq!(a.t, -30.0);
        assert_eq!(b.rule_id, Some(RuleId::OppositeTack));

        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["kind"], "countdown_armed");
        assert!(json.get("rule_id").is_none());
    }
}
