//! Races hosted by this process

use dashmap::DashMap;
use uuid::Uuid;

use super::host_loop::HostHandle;

/// Registry of running host loops
pub struct RaceRegistry {
    races: DashMap<Uuid, HostHandle>,
}

impl RaceRegistry {
    pub fn new() -> Self {
        Self {
            races: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<HostHandle> {
        self.races.get(id).map(|r| r.value().clone())
    }

    /// Register a loop; replaces a stopped one for the same race
    pub fn insert(&self, handle: HostHandle) {
        if let Some(old) = self.races.insert(handle.race_id, handle) {
            old.stop();
        }
    }

    pub fn remove(&self, id: &Uuid) -> Option<HostHandle> {
        self.races.remove(id).map(|(_, h)| h)
    }

    /// Remove only if `handle` is still the registered loop
    pub fn remove_handle(&self, handle: &HostHandle) -> bool {
        self.races
            .remove_if(&handle.race_id, |_, h| h.same_loop(handle))
            .is_some()
    }

    pub fn active_races(&self) -> usize {
        self.races.iter().filter(|r| r.value().is_running()).count()
    }

    pub fn total_boats(&self) -> usize {
        self.races.iter().map(|r| r.value().boat_count()).sum()
    }

    /// Stop every loop and forget them
    pub fn stop_all(&self) {
        for entry in self.races.iter() {
            entry.value().stop();
        }
        self.races.clear();
    }
}

impl Default for RaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
