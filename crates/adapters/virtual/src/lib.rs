//! # buildhub-adapter-virtual
//!
//! Virtual device node that simulates devices in memory for testing and
//! demonstration purposes.
//!
//! ## Provided devices
//!
//! | Kind | Capabilities | Behaviour |
//! |------|--------------|-----------|
//! | `light` | brightness | `pull` / `get` / `update`, counts writes |
//! | `occupancy_sensor` | occupancy | `pull` / `get`, driven by [`VirtualNode::set_occupancy`] |
//! | `thermostat` | air temperature, modes | `get` / `update` only (poll-only) |
//!
//! Any device can be marked unreachable with [`VirtualNode::set_available`];
//! it then answers every call with [`DeviceError::Unavailable`].
//!
//! ## Dependency rule
//!
//! Depends on `buildhub-app` (port traits) and `buildhub-domain` only.

pub mod config;
mod devices;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, Ordering};

use buildhub_app::ports::DeviceNode;
use buildhub_domain::capability::Capability;
use buildhub_domain::error::{DeviceError, ValidationError};
use buildhub_domain::reading::{AirTemperature, Brightness, Modes, Occupancy, OccupancyState};
use buildhub_domain::time::Clock;
use tokio::sync::{mpsc, watch};

pub use config::{DeviceKind, VirtualConfig, VirtualDeviceConfig};
use devices::{VirtualDevice, VirtualLight, forward};

#[derive(Debug)]
struct Slot {
    device: VirtualDevice,
    available: AtomicBool,
}

/// Device node serving a fixed set of simulated devices.
#[derive(Debug, Default)]
pub struct VirtualNode {
    devices: HashMap<String, Slot>,
    clock: Clock,
}

impl VirtualNode {
    /// Build a node from configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if a device name is empty or repeated.
    pub fn from_config(config: &VirtualConfig) -> Result<Self, ValidationError> {
        let mut node = Self::default();
        for device in &config.devices {
            node.insert(&device.name, device.kind)?;
            if device.unavailable {
                node.set_available(&device.name, false).ok();
            }
        }
        Ok(node)
    }

    /// Add a device of the given kind.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if `name` is empty or already taken.
    pub fn insert(&mut self, name: &str, kind: DeviceKind) -> Result<(), ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        match self.devices.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ValidationError::DuplicateDevice {
                capability: kind.capability(),
                name: name.to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(Slot {
                    device: VirtualDevice::new(kind),
                    available: AtomicBool::new(true),
                });
                Ok(())
            }
        }
    }

    /// Stamp simulated readings with `clock` instead of the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Builder-style [`insert`](Self::insert) for tests and demos.
    ///
    /// # Errors
    ///
    /// Same as [`insert`](Self::insert).
    pub fn with_device(mut self, name: &str, kind: DeviceKind) -> Result<Self, ValidationError> {
        self.insert(name, kind)?;
        Ok(self)
    }

    /// Names of every simulated device, sorted.
    #[must_use]
    pub fn device_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    // ── Simulation controls ──────────────────────────────────────────

    /// Mark a device reachable or not.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::UnknownDevice`] if `device` is not simulated.
    pub fn set_available(&self, device: &str, available: bool) -> Result<(), DeviceError> {
        self.lookup(device)?
            .available
            .store(available, Ordering::Relaxed);
        tracing::debug!(device, available, "virtual device availability changed");
        Ok(())
    }

    /// Make an occupancy sensor report `state` now.
    ///
    /// # Errors
    ///
    /// Returns an error if `device` is unknown or not an occupancy sensor.
    pub fn set_occupancy(&self, device: &str, state: OccupancyState) -> Result<(), DeviceError> {
        let sensor = self.lookup(device)?.device.sensor("set")?;
        if sensor.set(state, self.clock.now()) {
            tracing::debug!(device, %state, "virtual occupancy changed");
        }
        Ok(())
    }

    /// Simulate a new ambient temperature on a thermostat.
    ///
    /// # Errors
    ///
    /// Returns an error if `device` is unknown or not a thermostat.
    pub fn set_ambient(&self, device: &str, celsius: f64) -> Result<(), DeviceError> {
        self.lookup(device)?
            .device
            .thermostat(Capability::AirTemperature, "set")?
            .set_ambient(celsius);
        Ok(())
    }

    // ── Observers ────────────────────────────────────────────────────

    /// Current level of a light.
    #[must_use]
    pub fn brightness(&self, device: &str) -> Option<Brightness> {
        let slot = self.devices.get(device)?;
        slot.device.light("get").ok().map(VirtualLight::brightness)
    }

    /// Follow the level of a light.
    #[must_use]
    pub fn watch_brightness(&self, device: &str) -> Option<watch::Receiver<Brightness>> {
        let slot = self.devices.get(device)?;
        slot.device.light("pull").ok().map(VirtualLight::subscribe)
    }

    #[must_use]
    pub fn air_temperature(&self, device: &str) -> Option<AirTemperature> {
        let slot = self.devices.get(device)?;
        slot.device
            .thermostat(Capability::AirTemperature, "get")
            .ok()
            .map(|thermostat| thermostat.air_temperature())
    }

    #[must_use]
    pub fn modes(&self, device: &str) -> Option<Modes> {
        let slot = self.devices.get(device)?;
        slot.device
            .thermostat(Capability::Mode, "get")
            .ok()
            .map(|thermostat| thermostat.modes())
    }

    /// Number of writes a light or thermostat has received.
    #[must_use]
    pub fn writes(&self, device: &str) -> usize {
        match self.devices.get(device).map(|slot| &slot.device) {
            Some(VirtualDevice::Light(light)) => light.writes(),
            Some(VirtualDevice::Thermostat(thermostat)) => thermostat.writes(),
            _ => 0,
        }
    }

    fn lookup(&self, device: &str) -> Result<&Slot, DeviceError> {
        self.devices
            .get(device)
            .ok_or_else(|| DeviceError::UnknownDevice {
                name: device.to_string(),
            })
    }

    /// Look up a device for a node call, failing if it is unreachable.
    fn reachable(&self, device: &str) -> Result<&VirtualDevice, DeviceError> {
        let slot = self.lookup(device)?;
        if !slot.available.load(Ordering::Relaxed) {
            return Err(DeviceError::Unavailable {
                name: device.to_string(),
            });
        }
        Ok(&slot.device)
    }
}

impl DeviceNode for VirtualNode {
    fn name(&self) -> &'static str {
        "virtual"
    }

    async fn pull_occupancy(
        &self,
        device: &str,
        tx: mpsc::Sender<Occupancy>,
    ) -> Result<(), DeviceError> {
        let rx = self.reachable(device)?.sensor("pull")?.subscribe();
        forward(rx, tx).await
    }

    async fn get_occupancy(&self, device: &str) -> Result<Occupancy, DeviceError> {
        Ok(self.reachable(device)?.sensor("get")?.occupancy())
    }

    async fn pull_brightness(
        &self,
        device: &str,
        tx: mpsc::Sender<Brightness>,
    ) -> Result<(), DeviceError> {
        let rx = self.reachable(device)?.light("pull")?.subscribe();
        forward(rx, tx).await
    }

    async fn get_brightness(&self, device: &str) -> Result<Brightness, DeviceError> {
        Ok(self.reachable(device)?.light("get")?.brightness())
    }

    async fn update_brightness(
        &self,
        device: &str,
        brightness: Brightness,
    ) -> Result<Brightness, DeviceError> {
        let reported = self.reachable(device)?.light("update")?.set(brightness);
        tracing::debug!(device, brightness = %reported, "virtual light set");
        Ok(reported)
    }

    async fn get_air_temperature(&self, device: &str) -> Result<AirTemperature, DeviceError> {
        let thermostat = self
            .reachable(device)?
            .thermostat(Capability::AirTemperature, "get")?;
        Ok(thermostat.air_temperature())
    }

    async fn update_air_temperature(
        &self,
        device: &str,
        temperature: AirTemperature,
    ) -> Result<AirTemperature, DeviceError> {
        let thermostat = self
            .reachable(device)?
            .thermostat(Capability::AirTemperature, "update")?;
        let reported = thermostat.set_air_temperature(temperature);
        tracing::debug!(device, temperature = %reported, "virtual thermostat set");
        Ok(reported)
    }

    async fn get_modes(&self, device: &str) -> Result<Modes, DeviceError> {
        let thermostat = self.reachable(device)?.thermostat(Capability::Mode, "get")?;
        Ok(thermostat.modes())
    }

    async fn update_modes(&self, device: &str, modes: Modes) -> Result<Modes, DeviceError> {
        let thermostat = self
            .reachable(device)?
            .thermostat(Capability::Mode, "update")?;
        let reported = thermostat.set_modes(modes);
        tracing::debug!(device, modes = %reported, "virtual modes set");
        Ok(reported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> VirtualNode {
        VirtualNode::default()
            .with_device("pir-1", DeviceKind::OccupancySensor)
            .unwrap()
            .with_device("light-1", DeviceKind::Light)
            .unwrap()
            .with_device("ahu-1", DeviceKind::Thermostat)
            .unwrap()
    }

    #[test]
    fn should_return_virtual_as_name() {
        assert_eq!(node().name(), "virtual");
    }

    #[test]
    fn should_list_devices_sorted() {
        assert_eq!(node().device_names(), vec!["ahu-1", "light-1", "pir-1"]);
    }

    #[test]
    fn should_reject_duplicate_and_empty_names() {
        let err = node()
            .with_device("light-1", DeviceKind::Light)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateDevice {
                capability: Capability::Brightness,
                name: "light-1".to_string(),
            }
        );
        let err = node().with_device("", DeviceKind::Light).unwrap_err();
        assert_eq!(err, ValidationError::EmptyName);
    }

    #[test]
    fn should_build_from_config() {
        let config = VirtualConfig {
            devices: vec![
                VirtualDeviceConfig {
                    name: "light-1".to_string(),
                    kind: DeviceKind::Light,
                    unavailable: false,
                },
                VirtualDeviceConfig {
                    name: "light-2".to_string(),
                    kind: DeviceKind::Light,
                    unavailable: true,
                },
            ],
        };
        let node = VirtualNode::from_config(&config).unwrap();
        assert_eq!(node.device_names(), vec!["light-1", "light-2"]);
        assert!(matches!(
            node.reachable("light-2"),
            Err(DeviceError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn should_update_light_and_count_writes() {
        let node = node();
        let level = Brightness::new(60.0).unwrap();

        let reported = node.update_brightness("light-1", level).await.unwrap();

        assert_eq!(reported, level);
        assert_eq!(node.get_brightness("light-1").await.unwrap(), level);
        assert_eq!(node.brightness("light-1"), Some(level));
        assert_eq!(node.writes("light-1"), 1);
    }

    #[tokio::test]
    async fn should_stream_occupancy_changes() {
        let node = std::sync::Arc::new(node());
        let (tx, mut rx) = mpsc::channel(4);
        let puller = {
            let node = node.clone();
            tokio::spawn(async move { node.pull_occupancy("pir-1", tx).await })
        };

        assert_eq!(rx.recv().await.unwrap().state, OccupancyState::Unknown);
        node.set_occupancy("pir-1", OccupancyState::Occupied)
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().state, OccupancyState::Occupied);

        drop(rx);
        assert!(puller.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn should_leave_thermostat_poll_only() {
        let node = node();
        let (tx, _rx) = mpsc::channel(1);

        let err = node.pull_air_temperature("ahu-1", tx).await.unwrap_err();
        assert!(err.is_unimplemented());

        node.set_ambient("ahu-1", 19.0).unwrap();
        let reading = node.get_air_temperature("ahu-1").await.unwrap();
        assert_eq!(reading.ambient_celsius, Some(19.0));
    }

    #[tokio::test]
    async fn should_write_thermostat_setpoint_and_modes() {
        let node = node();

        node.update_air_temperature("ahu-1", AirTemperature::setpoint(16.0))
            .await
            .unwrap();
        let modes = node
            .update_modes("ahu-1", Modes::one("occupancy", "unoccupied"))
            .await
            .unwrap();

        assert_eq!(modes.get("occupancy"), Some("unoccupied"));
        assert_eq!(
            node.air_temperature("ahu-1").unwrap().setpoint_celsius,
            Some(16.0)
        );
        assert_eq!(node.modes("ahu-1"), Some(modes));
        assert_eq!(node.writes("ahu-1"), 2);
    }

    #[tokio::test]
    async fn should_answer_unimplemented_for_wrong_capability() {
        let node = node();
        let err = node
            .update_brightness("pir-1", Brightness::off())
            .await
            .unwrap_err();
        assert!(err.is_unimplemented());
    }

    #[tokio::test]
    async fn should_return_unknown_device() {
        let node = node();
        let err = node.get_occupancy("pir-9").await.unwrap_err();
        assert!(matches!(err, DeviceError::UnknownDevice { name } if name == "pir-9"));
    }

    #[tokio::test]
    async fn should_answer_unavailable_when_unreachable() {
        let node = node();
        node.set_available("light-1", false).unwrap();

        let err = node.get_brightness("light-1").await.unwrap_err();
        assert!(matches!(err, DeviceError::Unavailable { .. }));

        node.set_available("light-1", true).unwrap();
        assert!(node.get_brightness("light-1").await.is_ok());
    }
}
