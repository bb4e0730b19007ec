//! Read-side and write-side state of one automation.
//!
//! [`ReadState`] is the merged snapshot of everything devices reported. It is
//! mutated only by the merger and handed to the scheduler as a clone. Entries
//! are `Arc`-shared and replaced whole, never mutated in place, so a clone is
//! a handful of reference count bumps per device.
//!
//! [`WriteState`] records the last value written per device/key. It is owned
//! by the scheduler task and never shared.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use buildhub_domain::capability::Capability;
use buildhub_domain::error::DeviceError;
use buildhub_domain::reading::{AirTemperature, Brightness, Modes, Occupancy};
use buildhub_domain::time::{Clock, Timestamp};
use buildhub_domain::value::{Value, WriteValue};
use chrono::TimeDelta;

use crate::automation::AutomationConfig;
use crate::reading::Reading;

/// Latest value per device name for one capability.
pub type Readings<T> = HashMap<String, Arc<Value<T>>>;

/// Merged snapshot of device readings plus the active configuration.
pub struct ReadState<C> {
    pub config: Arc<C>,
    pub occupancy: Readings<Occupancy>,
    pub brightness: Readings<Brightness>,
    pub air_temperature: Readings<AirTemperature>,
    pub modes: Readings<Modes>,
    clock: Clock,
}

impl<C: AutomationConfig> ReadState<C> {
    /// Empty snapshot for `config`, using the config's clock.
    #[must_use]
    pub fn new(config: Arc<C>) -> Self {
        let clock = config.settings().clock.clone();
        Self {
            config,
            occupancy: HashMap::new(),
            brightness: HashMap::new(),
            air_temperature: HashMap::new(),
            modes: HashMap::new(),
            clock,
        }
    }

    /// Replace the active configuration, keeping every reading.
    pub fn set_config(&mut self, config: Arc<C>) {
        self.clock = config.settings().clock.clone();
        self.config = config;
    }
}

impl<C> ReadState<C> {
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Record `value` as the latest reading of `device`.
    pub fn record<T: Reading>(&mut self, device: &str, value: T) {
        let at = self.now();
        T::slot_mut(self).insert(device.to_string(), Arc::new(Value::new(value, at)));
    }

    /// Forget every reading of `device` for `T`'s capability.
    pub fn clear<T: Reading>(&mut self, device: &str) {
        T::slot_mut(self).remove(device);
    }

    #[must_use]
    pub fn get<T: Reading>(&self, device: &str) -> Option<&Value<T>> {
        T::slot(self).get(device).map(Arc::as_ref)
    }

    /// Number of devices with a reading, across all capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.occupancy.len() + self.brightness.len() + self.air_temperature.len() + self.modes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C> Clone for ReadState<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            occupancy: self.occupancy.clone(),
            brightness: self.brightness.clone(),
            air_temperature: self.air_temperature.clone(),
            modes: self.modes.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<C> fmt::Debug for ReadState<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadState")
            .field("occupancy", &self.occupancy.len())
            .field("brightness", &self.brightness.len())
            .field("air_temperature", &self.air_temperature.len())
            .field("modes", &self.modes.len())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

// ── Write side ─────────────────────────────────────────────────────

/// Identifies one written value: a device, and the mode key for modes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriteKey {
    pub capability: Capability,
    pub device: String,
    pub key: Option<String>,
}

impl WriteKey {
    pub fn new(capability: Capability, device: impl Into<String>) -> Self {
        Self {
            capability,
            device: device.into(),
            key: None,
        }
    }

    pub fn mode(device: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            capability: Capability::Mode,
            device: device.into(),
            key: Some(key.into()),
        }
    }
}

impl fmt::Display for WriteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}/{}[{key}]", self.device, self.capability),
            None => write!(f, "{}/{}", self.device, self.capability),
        }
    }
}

/// Last written value per [`WriteKey`].
#[derive(Debug, Clone, Default)]
pub struct WriteState {
    records: HashMap<WriteKey, Value<WriteValue>>,
}

impl WriteState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &WriteKey) -> Option<&Value<WriteValue>> {
        self.records.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total cache hits across all keys.
    #[must_use]
    pub fn hit_count(&self) -> u64 {
        self.records.values().map(|v| v.hit_count).sum()
    }

    /// Record the outcome of a write that reached the device.
    pub fn record(
        &mut self,
        key: WriteKey,
        value: WriteValue,
        at: Timestamp,
        result: Result<(), DeviceError>,
    ) {
        let record = match result {
            Ok(()) => Value::new(value, at),
            Err(err) => Value::failed(value, at, err),
        };
        self.records.insert(key, record);
    }

    /// Look up a write of `candidate` to `key`.
    ///
    /// Answers the recorded outcome, counting a hit, when the recorded value
    /// matches `candidate` and is younger than `expiry` (`None` never
    /// expires). Answers `None` when the write must reach the device.
    pub fn lookup(
        &mut self,
        key: &WriteKey,
        candidate: &WriteValue,
        now: Timestamp,
        expiry: Option<Duration>,
    ) -> Option<Result<(), DeviceError>> {
        let record = self.records.get_mut(key)?;
        if !record.value.same_as(candidate) {
            return None;
        }
        if let Some(expiry) = expiry
            && now - record.at >= to_delta(expiry)
        {
            return None;
        }
        record.hit_count += 1;
        Some(match &record.err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        })
    }

    /// Replace recorded writes with readings taken more than `window` after
    /// them.
    ///
    /// A device changed from outside then differs from the record, so the
    /// next decision writes again instead of hitting a stale cache entry.
    pub fn refresh_from_reads<C>(&mut self, read: &ReadState<C>, window: Duration) {
        let window = to_delta(window);
        for (key, record) in &mut self.records {
            let observed = match key.capability {
                Capability::Brightness => read
                    .brightness
                    .get(&key.device)
                    .map(|v| (WriteValue::Level(v.value.level_percent), v.at)),
                Capability::AirTemperature => read.air_temperature.get(&key.device).and_then(|v| {
                    v.value
                        .setpoint_celsius
                        .map(|s| (WriteValue::Setpoint(s), v.at))
                }),
                Capability::Mode => read.modes.get(&key.device).and_then(|v| {
                    let mode_key = key.key.as_deref()?;
                    v.value
                        .get(mode_key)
                        .map(|m| (WriteValue::Mode(m.to_string()), v.at))
                }),
                Capability::Occupancy => None,
            };
            let Some((value, at)) = observed else {
                continue;
            };
            if at - record.at > window && !record.value.same_as(&value) {
                tracing::debug!(
                    write = %key,
                    written = %record.value,
                    read = %value,
                    "device changed since last write"
                );
                record.value = value;
                record.at = at;
                record.err = None;
            }
        }
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
