//! Virtual occupancy sensor: read-only, driven by [`VirtualSensor::set`].

use buildhub_domain::reading::{Occupancy, OccupancyState};
use buildhub_domain::time::Timestamp;
use tokio::sync::watch;

/// A simulated presence sensor. Starts in [`OccupancyState::Unknown`].
#[derive(Debug)]
pub struct VirtualSensor {
    state: watch::Sender<Occupancy>,
}

impl Default for VirtualSensor {
    fn default() -> Self {
        Self {
            state: watch::channel(Occupancy::default()).0,
        }
    }
}

impl VirtualSensor {
    #[must_use]
    pub fn occupancy(&self) -> Occupancy {
        self.state.borrow().clone()
    }

    /// Report `state` as of `at`.
    ///
    /// `state_changed_at` only moves when the state actually changes, and
    /// subscribers are only notified then.
    pub fn set(&self, state: OccupancyState, at: Timestamp) -> bool {
        self.state.send_if_modified(|current| {
            if current.state == state {
                return false;
            }
            *current = Occupancy {
                state,
                state_changed_at: Some(at),
                people_count: current.people_count,
            };
            true
        })
    }

    pub fn set_people_count(&self, count: u32) {
        self.state
            .send_modify(|current| current.people_count = Some(count));
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Occupancy> {
        self.state.subscribe()
    }
}
