//! Actions — the writes a decision may issue.
//!
//! [`Actions`] has one method per writable capability. Implementations stack:
//!
//! - [`NodeActions`] reaches the devices through a [`Registry`]
//! - [`DryRunActions`] answers every write as if it succeeded
//! - [`CountingActions`] tallies what went through, for logging
//! - [`CachedActions`] suppresses writes that would not change anything
//!
//! The scheduler hands decisions a `CachedActions<CountingActions<A>>`, so
//! only writes that actually reach `A` are counted.

use std::fmt;
use std::future::Future;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use buildhub_domain::capability::Capability;
use buildhub_domain::error::DeviceError;
use buildhub_domain::reading::{AirTemperature, Brightness, Modes};
use buildhub_domain::settings::WriteSettings;
use buildhub_domain::time::Clock;
use buildhub_domain::value::WriteValue;

use crate::ports::DeviceNode;
use crate::registry::Registry;
use crate::state::{WriteKey, WriteState};

/// Writes a decision may issue, one per writable capability.
pub trait Actions: Send {
    fn update_brightness(
        &mut self,
        device: &str,
        brightness: Brightness,
    ) -> impl Future<Output = Result<Brightness, DeviceError>> + Send;

    /// Only the setpoint of `temperature` is written.
    fn update_air_temperature(
        &mut self,
        device: &str,
        temperature: AirTemperature,
    ) -> impl Future<Output = Result<AirTemperature, DeviceError>> + Send;

    /// Write the given mode keys, leaving the others untouched.
    fn update_modes(
        &mut self,
        device: &str,
        modes: Modes,
    ) -> impl Future<Output = Result<Modes, DeviceError>> + Send;
}

// ── Device writes ──────────────────────────────────────────────────

/// Writes through the node serving each device.
///
/// A device answering with values other than the ones requested yields
/// [`DeviceError::UnexpectedResponse`].
#[derive(Debug)]
pub struct NodeActions<N> {
    registry: Arc<Registry<N>>,
}

impl<N> NodeActions<N> {
    pub fn new(registry: Arc<Registry<N>>) -> Self {
        Self { registry }
    }
}

impl<N> Clone for NodeActions<N> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

fn unexpected(requested: &impl fmt::Display, actual: &impl fmt::Display) -> DeviceError {
    DeviceError::UnexpectedResponse {
        requested: requested.to_string(),
        actual: actual.to_string(),
    }
}

impl<N: DeviceNode> Actions for NodeActions<N> {
    async fn update_brightness(
        &mut self,
        device: &str,
        brightness: Brightness,
    ) -> Result<Brightness, DeviceError> {
        let node = self.registry.node(device)?;
        let actual = node.update_brightness(device, brightness).await?;
        let requested = WriteValue::Level(brightness.level_percent);
        if !requested.same_as(&WriteValue::Level(actual.level_percent)) {
            return Err(unexpected(&brightness, &actual));
        }
        Ok(actual)
    }

    async fn update_air_temperature(
        &mut self,
        device: &str,
        temperature: AirTemperature,
    ) -> Result<AirTemperature, DeviceError> {
        let node = self.registry.node(device)?;
        let actual = node.update_air_temperature(device, temperature).await?;
        if let Some(requested) = temperature.setpoint_celsius {
            let matches = actual.setpoint_celsius.is_some_and(|actual| {
                WriteValue::Setpoint(requested).same_as(&WriteValue::Setpoint(actual))
            });
            if !matches {
                return Err(unexpected(&temperature, &actual));
            }
        }
        Ok(actual)
    }

    async fn update_modes(&mut self, device: &str, modes: Modes) -> Result<Modes, DeviceError> {
        let node = self.registry.node(device)?;
        let actual = node.update_modes(device, modes.clone()).await?;
        let all_applied = modes
            .0
            .iter()
            .all(|(key, value)| actual.get(key) == Some(value.as_str()));
        if !all_applied {
            return Err(unexpected(&modes, &actual));
        }
        Ok(actual)
    }
}

// ── Dry run ────────────────────────────────────────────────────────

/// Performs no call and answers every write as if the device accepted it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunActions;

impl Actions for DryRunActions {
    async fn update_brightness(
        &mut self,
        device: &str,
        brightness: Brightness,
    ) -> Result<Brightness, DeviceError> {
        tracing::info!(device, %brightness, "dry run: brightness write skipped");
        Ok(brightness)
    }

    async fn update_air_temperature(
        &mut self,
        device: &str,
        temperature: AirTemperature,
    ) -> Result<AirTemperature, DeviceError> {
        tracing::info!(device, %temperature, "dry run: air temperature write skipped");
        Ok(temperature)
    }

    async fn update_modes(&mut self, device: &str, modes: Modes) -> Result<Modes, DeviceError> {
        tracing::info!(device, %modes, "dry run: modes write skipped");
        Ok(modes)
    }
}

// ── Counting ───────────────────────────────────────────────────────

/// Tally of writes since the last [`CountingActions::take_counts`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActionCounts {
    pub writes: u32,
    pub failures: u32,
    /// One `"<device> <value>"` entry per successful write.
    pub changes: Vec<String>,
}

impl ActionCounts {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes == 0
    }

    fn track<T>(
        &mut self,
        device: &str,
        result: &Result<T, DeviceError>,
        value: &impl fmt::Display,
    ) {
        self.writes += 1;
        match result {
            Ok(_) => self.changes.push(format!("{device} {value}")),
            Err(_) => self.failures += 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct CountingActions<A> {
    inner: A,
    counts: ActionCounts,
}

impl<A> CountingActions<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            counts: ActionCounts::default(),
        }
    }

    #[must_use]
    pub fn counts(&self) -> &ActionCounts {
        &self.counts
    }

    /// Return the tally and start a new one.
    pub fn take_counts(&mut self) -> ActionCounts {
        mem::take(&mut self.counts)
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: Actions> Actions for CountingActions<A> {
    async fn update_brightness(
        &mut self,
        device: &str,
        brightness: Brightness,
    ) -> Result<Brightness, DeviceError> {
        let result = self.inner.update_brightness(device, brightness).await;
        self.counts.track(device, &result, &brightness);
        result
    }

    async fn update_air_temperature(
        &mut self,
        device: &str,
        temperature: AirTemperature,
    ) -> Result<AirTemperature, DeviceError> {
        let result = self.inner.update_air_temperature(device, temperature).await;
        self.counts.track(device, &result, &temperature);
        result
    }

    async fn update_modes(&mut self, device: &str, modes: Modes) -> Result<Modes, DeviceError> {
        let result = self.inner.update_modes(device, modes.clone()).await;
        self.counts.track(device, &result, &modes);
        result
    }
}

// ── Write cache ────────────────────────────────────────────────────

/// Suppresses writes of values the device was already given.
///
/// A write reaches the inner actions only when its value differs from the
/// last recorded one for the same device (and mode key), or when that
/// record is older than the cache expiry. Every write that reaches the
/// device is recorded, failed ones included, and a hit on a failed record
/// answers the recorded error until the record expires.
#[derive(Debug)]
pub struct CachedActions<A> {
    inner: A,
    state: WriteState,
    expiry: Option<Duration>,
    clock: Clock,
}

impl<A> CachedActions<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            state: WriteState::new(),
            expiry: None,
            clock: Clock::system(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: &WriteSettings) -> Self {
        self.configure(settings);
        self
    }

    /// Pick up the cache expiry and clock of `settings`.
    pub fn configure(&mut self, settings: &WriteSettings) {
        self.expiry = settings.write_cache_expiry();
        self.clock = settings.clock.clone();
    }

    #[must_use]
    pub fn state(&self) -> &WriteState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut WriteState {
        &mut self.state
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut A {
        &mut self.inner
    }

    fn lookup(
        &mut self,
        key: &WriteKey,
        candidate: &WriteValue,
    ) -> Option<Result<(), DeviceError>> {
        let hit = self
            .state
            .lookup(key, candidate, self.clock.now(), self.expiry);
        if hit.is_some() {
            tracing::debug!(write = %key, value = %candidate, "write skipped, value cached");
        }
        hit
    }

    fn remember(&mut self, key: WriteKey, value: WriteValue, result: Result<(), DeviceError>) {
        match &result {
            Ok(()) => tracing::info!(write = %key, %value, "device written"),
            Err(err) if err.is_cancelled() => return,
            Err(err) => tracing::warn!(write = %key, %value, %err, "device write failed"),
        }
        self.state.record(key, value, self.clock.now(), result);
    }
}

fn outcome<T>(result: &Result<T, DeviceError>) -> Result<(), DeviceError> {
    result.as_ref().map(|_| ()).map_err(Clone::clone)
}

impl<A: Actions> Actions for CachedActions<A> {
    async fn update_brightness(
        &mut self,
        device: &str,
        brightness: Brightness,
    ) -> Result<Brightness, DeviceError> {
        let key = WriteKey::new(Capability::Brightness, device);
        let value = WriteValue::Level(brightness.level_percent);
        if let Some(cached) = self.lookup(&key, &value) {
            return cached.map(|()| brightness);
        }
        let result = self.inner.update_brightness(device, brightness).await;
        self.remember(key, value, outcome(&result));
        result
    }

    async fn update_air_temperature(
        &mut self,
        device: &str,
        temperature: AirTemperature,
    ) -> Result<AirTemperature, DeviceError> {
        let Some(setpoint) = temperature.setpoint_celsius else {
            return self.inner.update_air_temperature(device, temperature).await;
        };
        let key = WriteKey::new(Capability::AirTemperature, device);
        let value = WriteValue::Setpoint(setpoint);
        if let Some(cached) = self.lookup(&key, &value) {
            return cached.map(|()| temperature);
        }
        let result = self.inner.update_air_temperature(device, temperature).await;
        self.remember(key, value, outcome(&result));
        result
    }

    async fn update_modes(&mut self, device: &str, modes: Modes) -> Result<Modes, DeviceError> {
        let mut pending = Modes::default();
        let mut cached_err = None;
        for (mode, value) in &modes.0 {
            let key = WriteKey::mode(device, mode.as_str());
            match self.lookup(&key, &WriteValue::Mode(value.clone())) {
                Some(Ok(())) => {}
                Some(Err(err)) => {
                    cached_err.get_or_insert(err);
                }
                None => {
                    pending.0.insert(mode.clone(), value.clone());
                }
            }
        }

        if pending.is_empty() {
            return match cached_err {
                Some(err) => Err(err),
                None => Ok(modes),
            };
        }

        let result = self.inner.update_modes(device, pending.clone()).await;
        let written = outcome(&result);
        for (mode, value) in pending.0 {
            self.remember(
                WriteKey::mode(device, mode),
                WriteValue::Mode(value),
                written.clone(),
            );
        }
        result?;
        match cached_err {
            Some(err) => Err(err),
            None => Ok(modes),
        }
    }
}
