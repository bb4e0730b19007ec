//! Virtual dimmable light.

use std::sync::atomic::{AtomicUsize, Ordering};

use buildhub_domain::reading::Brightness;
use tokio::sync::watch;

/// A simulated light holding a brightness level. Starts off.
#[derive(Debug)]
pub struct VirtualLight {
    state: watch::Sender<Brightness>,
    writes: AtomicUsize,
}

impl Default for VirtualLight {
    fn default() -> Self {
        Self {
            state: watch::channel(Brightness::off()).0,
            writes: AtomicUsize::new(0),
        }
    }
}

impl VirtualLight {
    #[must_use]
    pub fn brightness(&self) -> Brightness {
        *self.state.borrow()
    }

    /// Apply a write and return the level the light now reports.
    pub fn set(&self, brightness: Brightness) -> Brightness {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.state.send_replace(brightness);
        brightness
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Brightness> {
        self.state.subscribe()
    }

    /// Number of writes received so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}
