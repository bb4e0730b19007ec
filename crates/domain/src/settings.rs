//! Write-side settings shared by every automation.
//!
//! Every field has a default so an automation's config section may omit
//! them entirely. A zero duration means "disabled" for the optional
//! settings.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ValidationError;
use crate::time::Clock;

/// How an automation paces and deduplicates its device writes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WriteSettings {
    /// How long a recorded write suppresses identical writes. `0` never expires.
    pub write_cache_expiry_secs: u64,
    /// Delay before re-running a decision that failed.
    pub write_retry_delay_secs: u64,
    /// Upper bound on the time between two decisions. `0` disables it.
    pub write_every_secs: u64,
    /// A read newer than the last write by more than this replaces the
    /// recorded write, so the engine does not "write back" what it just read.
    pub read_propagation_secs: u64,
    /// Time source for decisions; overridden by tests.
    #[serde(skip)]
    pub clock: Clock,
}

impl WriteSettings {
    #[must_use]
    pub fn write_cache_expiry(&self) -> Option<Duration> {
        non_zero(self.write_cache_expiry_secs)
    }

    #[must_use]
    pub fn write_retry_delay(&self) -> Duration {
        Duration::from_secs(self.write_retry_delay_secs)
    }

    #[must_use]
    pub fn write_every(&self) -> Option<Duration> {
        non_zero(self.write_every_secs)
    }

    #[must_use]
    pub fn read_propagation_window(&self) -> Duration {
        Duration::from_secs(self.read_propagation_secs)
    }

    /// Check invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ZeroDuration`] when the retry delay is zero,
    /// which would turn a failing decision into a busy loop.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.write_retry_delay_secs == 0 {
            return Err(ValidationError::ZeroDuration {
                field: "write_retry_delay_secs",
            });
        }
        Ok(())
    }
}

impl Default for WriteSettings {
    fn default() -> Self {
        Self {
            write_cache_expiry_secs: 0,
            write_retry_delay_secs: 60,
            write_every_secs: 0,
            read_propagation_secs: 2,
            clock: Clock::system(),
        }
    }
}

fn non_zero(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
