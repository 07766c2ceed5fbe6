//! Bounded frame history for the persistence collaborator

use std::collections::VecDeque;

use crate::race::events::FrameSummary;
use crate::race::state::RaceState;

/// Samples one summary every `interval_ticks` into a ring
pub struct FrameHistory {
    /// Ticks since the last sample
    ticks_since_sample: u32,
    interval_ticks: u32,
    capacity: usize,
    frames: VecDeque<FrameSummary>,
}

impl FrameHistory {
    pub fn new(interval_ticks: u32, capacity: usize) -> Self {
        let interval_ticks = interval_ticks.max(1);
        Self {
            // First tick is always sampled
            ticks_since_sample: interval_ticks - 1,
            interval_ticks,
            capacity: capacity.max(1),
            frames: VecDeque::with_capacity(capacity.clamp(1, 4096)),
        }
    }

    /// Check if it's time to sample
    pub fn should_sample(&mut self) -> bool {
        self.ticks_since_sample += 1;
        if self.ticks_since_sample >= self.interval_ticks {
            self.ticks_since_sample = 0;
            true
        } else {
            false
        }
    }

    /// Sample on the next check (finish, timeout)
    pub fn force_next(&mut self) {
        self.ticks_since_sample = self.interval_ticks;
    }

    pub fn record(&mut self, state: &RaceState) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(FrameSummary::of(state));
    }

    /// Oldest first
    pub fn summaries(&self) -> Vec<FrameSummary> {
        self.frames.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.ticks_since_sample = self.interval_ticks - 1;
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::course::Course;
    use crate::race::state::Wind;
    use uuid::Uuid;

    #[test]
    fn samples_on_interval_and_drops_oldest() {
        let mut state = RaceState::new(
            Uuid::new_v4(),
            1,
            Course::windward_leeward(0.0, 1, 400.0),
            Wind {
                direction_deg: 0.0,
                speed_kts: 10.0,
            },
            10.0,
        );
        let mut history = FrameHistory::new(3, 2);
        let mut sampled = Vec::new();
        for tick in 1..=7u64 {
            state.tick = tick;
            if history.should_sample() {
                history.record(&state);
                sampled.push(tick);
            }
        }
        assert_eq!(sampled, vec![1, 4, 7]);
        let kept: Vec<u64> = history.summaries().iter().map(|s| s.tick).collect();
        assert_eq!(kept, vec![4, 7]);

        history.force_next();
        assert!(history.should_sample());
    }
}
