//! TTL scheduler: the outer control loop of an automation.
//!
//! The scheduler is the only caller of the decision. It runs it on every
//! settled snapshot, and again against the last snapshot when the TTL the
//! decision asked for expires, when a failed run is due for a retry, or when
//! the `write_every` refresh interval elapses.

use std::time::Duration;

use buildhub_domain::error::HubError;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::actions::{Actions, CachedActions, CountingActions};
use crate::automation::{AutomationConfig, Decide};
use crate::pull::millis;
use crate::state::{ReadState, WriteState};

/// How long a decision stays valid. `None` asks for no re-run.
pub type Ttl = Option<Duration>;

/// Called after every decision with the state it saw, the write state it
/// left, the delay until the next scheduled run and the error it returned.
pub type ProcessHook<C> =
    Box<dyn FnMut(&ReadState<C>, &WriteState, Ttl, Option<&HubError>) + Send>;

/// Why a run was scheduled without new input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rerun {
    /// The decision's own TTL.
    Ttl,
    /// The `write_every` refresh interval.
    Refresh,
    /// Retry after a failed decision.
    Retry,
}

/// Next run for a successful decision, given the refresh interval.
fn schedule(ttl: Ttl, write_every: Option<Duration>) -> Option<(Duration, Rerun)> {
    let ttl = ttl.filter(|ttl| !ttl.is_zero());
    match (ttl, write_every) {
        (Some(ttl), Some(every)) if ttl > every => Some((every, Rerun::Refresh)),
        (Some(ttl), _) => Some((ttl, Rerun::Ttl)),
        (None, Some(every)) => Some((every, Rerun::Refresh)),
        (None, None) => None,
    }
}

/// When a re-run `delay` from now is due, or `None` past the clock's range.
fn deadline((delay, reason): (Duration, Rerun)) -> Option<(Instant, Rerun)> {
    let Some(at) = Instant::now().checked_add(delay) else {
        tracing::warn!(
            delay_secs = delay.as_secs(),
            "re-run delay out of range, not scheduling"
        );
        return None;
    };
    Some((at, reason))
}

/// Feeds snapshots to a decision and owns its write state.
pub struct Scheduler<C, D, A> {
    decision: D,
    actions: CachedActions<CountingActions<A>>,
    on_processed: Option<ProcessHook<C>>,
}

impl<C, D, A> Scheduler<C, D, A>
where
    C: AutomationConfig,
    D: Decide<C>,
    A: Actions,
{
    pub fn new(decision: D, actions: A) -> Self {
        Self {
            decision,
            actions: CachedActions::new(CountingActions::new(actions)),
            on_processed: None,
        }
    }

    #[must_use]
    pub fn on_processed(mut self, hook: ProcessHook<C>) -> Self {
        self.on_processed = Some(hook);
        self
    }

    /// Run until `cancel` fires or `states` is closed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Cancelled`] when `cancel` fires. Decision errors
    /// are retried, never returned.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        mut states: mpsc::Receiver<ReadState<C>>,
    ) -> Result<(), HubError> {
        let mut last: Option<ReadState<C>> = None;
        let mut next: Option<(Instant, Rerun)> = None;

        loop {
            let deadline = next.map(|(at, _)| at);
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(HubError::Cancelled),
                state = states.recv() => match state {
                    Some(state) => last = Some(state),
                    None => return Ok(()),
                },
                () = timer => {
                    if let Some((_, reason)) = next {
                        tracing::debug!(?reason, "re-running decision without new input");
                    }
                }
            }

            let Some(read) = last.as_ref() else {
                continue;
            };
            next = self.process(&cancel, read).await?.and_then(self::deadline);
        }
    }

    async fn process(
        &mut self,
        cancel: &CancellationToken,
        read: &ReadState<C>,
    ) -> Result<Option<(Duration, Rerun)>, HubError> {
        let settings = read.config.settings();
        self.actions.configure(settings);
        self.actions
            .state_mut()
            .refresh_from_reads(read, settings.read_propagation_window());

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HubError::Cancelled),
            result = self.decision.decide(read, &mut self.actions) => result,
        };

        let counts = self.actions.inner_mut().take_counts();
        if !counts.is_empty() {
            tracing::info!(
                writes = counts.writes,
                failures = counts.failures,
                changes = ?counts.changes,
                "decision wrote to devices"
            );
        }

        let (next, err) = match result {
            Ok(ttl) => {
                let next = schedule(ttl, settings.write_every());
                if let Some((delay, reason)) = next {
                    tracing::debug!(ttl_ms = millis(delay), ?reason, "decision scheduled re-run");
                } else {
                    tracing::debug!("decision needs no re-run");
                }
                (next, None)
            }
            Err(err) if err.is_cancelled() && cancel.is_cancelled() => {
                return Err(HubError::Cancelled);
            }
            Err(err) => {
                let delay = settings.write_retry_delay();
                tracing::warn!(%err, delay_ms = millis(delay), "decision failed, will retry");
                (Some((delay, Rerun::Retry)), Some(err))
            }
        };

        if let Some(hook) = self.on_processed.as_mut() {
            hook(
                read,
                self.actions.state(),
                next.map(|(delay, _)| delay),
                err.as_ref(),
            );
        }
        Ok(next)
    }
}
