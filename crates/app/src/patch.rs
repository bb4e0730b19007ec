//! Patches — the unit of state mutation.
//!
//! Fetcher tasks never touch the snapshot directly. They send patches to the
//! merger, which is the only place a snapshot is ever mutated.

use std::fmt;

/// A single state transition, applied once by the merger.
pub struct Patch<S>(Box<dyn FnOnce(&mut S) + Send>);

impl<S> Patch<S> {
    pub fn new(f: impl FnOnce(&mut S) + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn apply(self, state: &mut S) {
        (self.0)(state);
    }
}

impl<S> fmt::Debug for Patch<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Patch")
    }
}
