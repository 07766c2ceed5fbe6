//! Callbacks into external collaborators

use tracing::{error, info, trace, warn};
use uuid::Uuid;

use crate::race::bots::SailingFeatures;
use crate::race::events::FrameSummary;
use crate::race::state::RaceState;

use super::engine::TickError;

/// Side effects the host loop hands off. Called after a tick is published,
/// never from inside one; implementations must not block.
pub trait RaceHooks: Send + Sync {
    /// Race clock ran past the duration limit. Called once per race.
    fn on_timeout(&self, state: &RaceState);

    /// Every boat finished
    fn on_finished(&self, state: &RaceState, history: &[FrameSummary]);

    /// Loop stopped after too many failed ticks
    fn on_halted(&self, race_id: Uuid, error: &TickError);

    /// One observation row per racing boat, at every history sample
    fn on_sample(&self, _state: &RaceState, _rows: &[(Uuid, SailingFeatures)]) {}
}

/// Default hooks: log and move on
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHooks;

impl RaceHooks for LoggingHooks {
    fn on_timeout(&self, state: &RaceState) {
        warn!(race_id = %state.race_id, t = state.t, "Race timed out");
    }

    fn on_finished(&self, state: &RaceState, history: &[FrameSummary]) {
        let standings: Vec<serde_json::Value> = state
            .leaderboard
            .iter()
            .enumerate()
            .filter_map(|(i, id)| {
                let boat = state.boats.get(id)?;
                Some(serde_json::json!({
                    "place": i + 1,
                    "boat_id": boat.id,
                    "name": boat.name,
                    "finish_time": boat.finish_time,
                    "penalties": boat.penalties,
                }))
            })
            .collect();
        match serde_json::to_string(&standings) {
            Ok(json) => info!(
                race_id = %state.race_id,
                frames = history.len(),
                standings = %json,
                "Race finished"
            ),
            Err(e) => error!(race_id = %state.race_id, error = %e, "Failed to encode standings"),
        }
    }

    fn on_halted(&self, race_id: Uuid, error: &TickError) {
        error!(race_id = %race_id, error = %error, "Host loop halted");
    }

    fn on_sample(&self, state: &RaceState, rows: &[(Uuid, SailingFeatures)]) {
        for (boat_id, features) in rows {
            trace!(race_id = %state.race_id, boat_id = %boat_id, t = state.t, row = ?features.to_row(), "Observation");
        }
    }
}
