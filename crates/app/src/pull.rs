//! Reliable fetcher: one resilient stream of values out of a flaky endpoint.
//!
//! [`changes`] subscribes with [`Fetcher::pull`] and keeps the subscription
//! alive with exponential backoff. If the endpoint answers
//! [`DeviceError::Unimplemented`] to the subscription, it switches for good
//! to periodic [`Fetcher::poll`] calls. Transport errors never leave this
//! module; callers only see cancellation, or a device that supports neither
//! operation.

use std::future::Future;
use std::time::Duration;

use buildhub_domain::error::DeviceError;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const PULL_BACKOFF_FACTOR: f64 = 2.0;
const POLL_BACKOFF_FACTOR: f64 = 1.2;

/// Subscribe-or-poll access to a single value stream.
pub trait Fetcher: Send + Sync {
    type Item: Send + 'static;

    /// Stream values into `tx` until the subscription ends.
    fn pull(
        &self,
        tx: mpsc::Sender<Self::Item>,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Send the current value into `tx` once.
    fn poll(
        &self,
        tx: mpsc::Sender<Self::Item>,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;
}

/// Timing knobs for [`changes`].
#[derive(Debug, Clone)]
pub struct PullOptions {
    /// First delay after a failed subscription. Doubles on each failure.
    pub pull_backoff_initial: Duration,
    pub pull_backoff_max: Duration,
    /// Delay between two successful polls.
    pub poll_interval: Duration,
    /// Upper bound for the poll delay, which grows ×1.2 per failure.
    pub poll_backoff_max: Duration,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            pull_backoff_initial: Duration::from_millis(100),
            pull_backoff_max: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            poll_backoff_max: Duration::from_secs(30),
        }
    }
}

/// Produce a continuous stream of values from `fetcher` into `tx`.
///
/// Runs until `cancel` fires or the receiving side of `tx` is dropped.
///
/// # Errors
///
/// Returns the [`DeviceError::Unimplemented`] answered by
/// [`Fetcher::poll`] when the endpoint supports neither subscribing nor
/// polling. Every other failure is retried internally.
pub async fn changes<F: Fetcher>(
    cancel: &CancellationToken,
    fetcher: &F,
    tx: mpsc::Sender<F::Item>,
    options: &PullOptions,
) -> Result<(), DeviceError> {
    match pull_loop(cancel, fetcher, &tx, options).await {
        PullExit::Stopped => Ok(()),
        PullExit::Unsupported(err) => {
            tracing::warn!(%err, "subscription not supported, falling back to polling");
            poll_loop(cancel, fetcher, &tx, options).await
        }
    }
}

enum PullExit {
    Stopped,
    Unsupported(DeviceError),
}

async fn pull_loop<F: Fetcher>(
    cancel: &CancellationToken,
    fetcher: &F,
    tx: &mpsc::Sender<F::Item>,
    options: &PullOptions,
) -> PullExit {
    let mut backoff = Backoff::new(
        options.pull_backoff_initial,
        options.pull_backoff_max,
        PULL_BACKOFF_FACTOR,
    );
    let mut failures: u32 = 0;

    loop {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return PullExit::Stopped,
            () = tx.closed() => return PullExit::Stopped,
            result = fetcher.pull(tx.clone()) => result,
        };

        match result {
            Err(err) if err.is_cancelled() => return PullExit::Stopped,
            Err(err) if err.is_unimplemented() => return PullExit::Unsupported(err),
            result => {
                if started.elapsed() > backoff.current() * 4 {
                    if failures > 0 {
                        tracing::info!(failures, "subscription recovered");
                    }
                    backoff.reset();
                    failures = 0;
                }
                failures += 1;
                let delay = backoff.next_delay();
                match result {
                    Ok(()) => tracing::debug!(
                        delay_ms = millis(delay),
                        "subscription ended, reconnecting"
                    ),
                    Err(err) => tracing::warn!(
                        %err,
                        failures,
                        delay_ms = millis(delay),
                        "subscription failed, retrying"
                    ),
                }
                if !sleep_or_cancel(cancel, delay).await {
                    return PullExit::Stopped;
                }
            }
        }
    }
}

async fn poll_loop<F: Fetcher>(
    cancel: &CancellationToken,
    fetcher: &F,
    tx: &mpsc::Sender<F::Item>,
    options: &PullOptions,
) -> Result<(), DeviceError> {
    let mut delay = options.poll_interval;
    let mut failures: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            () = tx.closed() => return Ok(()),
            result = fetcher.poll(tx.clone()) => result,
        };

        match result {
            Ok(()) => {
                if failures > 0 {
                    tracing::info!(failures, "polling recovered");
                }
                failures = 0;
                delay = options.poll_interval;
            }
            Err(err) if err.is_cancelled() => return Ok(()),
            Err(err) if err.is_unimplemented() => return Err(err),
            Err(err) => {
                failures += 1;
                delay = delay
                    .mul_f64(POLL_BACKOFF_FACTOR)
                    .min(options.poll_backoff_max);
                tracing::warn!(%err, failures, delay_ms = millis(delay), "poll failed");
            }
        }

        if !sleep_or_cancel(cancel, delay).await {
            return Ok(());
        }
    }
}

/// Sleep for `delay`, returning `false` if `cancel` fired first.
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Multiplicative backoff with a ceiling.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            current: initial,
        }
    }

    fn current(&self) -> Duration {
        self.current
    }

    /// Return the delay to wait now and grow the next one.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.factor).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}
