//! Time and timestamp helpers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// UTC timestamp used for reading times, write times, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Source of "now" for decision logic.
///
/// Production code uses [`Clock::system`]; tests pin time with
/// [`Clock::fixed`] or drive it with [`Clock::from_fn`].
#[derive(Clone, Default)]
pub struct Clock(Option<Arc<dyn Fn() -> Timestamp + Send + Sync>>);

impl Clock {
    /// The wall clock.
    #[must_use]
    pub fn system() -> Self {
        Self(None)
    }

    /// A clock frozen at `at`.
    #[must_use]
    pub fn fixed(at: Timestamp) -> Self {
        Self(Some(Arc::new(move || at)))
    }

    /// A clock backed by an arbitrary function.
    pub fn from_fn(f: impl Fn() -> Timestamp + Send + Sync + 'static) -> Self {
        Self(Some(Arc::new(f)))
    }

    #[must_use]
    pub fn now(&self) -> Timestamp {
        match &self.0 {
            Some(f) => f(),
            None => now(),
        }
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Clock(custom)"),
            None => f.write_str("Clock(system)"),
        }
    }
}
