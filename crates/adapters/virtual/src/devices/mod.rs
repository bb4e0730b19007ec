//! Virtual device implementations — light, occupancy sensor, thermostat.
//!
//! Lights and sensors keep their state in a [`watch`] channel so `pull_*`
//! subscriptions see every change. Thermostats only answer `get`/`update`,
//! which makes them exercise the polling fallback.

mod light;
mod sensor;
mod thermostat;

pub use light::VirtualLight;
pub use sensor::VirtualSensor;
pub use thermostat::VirtualThermostat;

use buildhub_domain::capability::Capability;
use buildhub_domain::error::DeviceError;
use tokio::sync::{mpsc, watch};

use crate::config::DeviceKind;

/// Wrapper enum for the concrete virtual device types.
#[derive(Debug)]
pub enum VirtualDevice {
    Light(VirtualLight),
    Sensor(VirtualSensor),
    Thermostat(VirtualThermostat),
}

impl VirtualDevice {
    /// Create a device of the given kind in its initial state.
    #[must_use]
    pub fn new(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Light => Self::Light(VirtualLight::default()),
            DeviceKind::OccupancySensor => Self::Sensor(VirtualSensor::default()),
            DeviceKind::Thermostat => Self::Thermostat(VirtualThermostat::default()),
        }
    }

    /// The device as a light, or `Unimplemented` for `operation`.
    pub(crate) fn light(&self, operation: &'static str) -> Result<&VirtualLight, DeviceError> {
        match self {
            Self::Light(light) => Ok(light),
            _ => Err(DeviceError::unimplemented(
                Capability::Brightness,
                operation,
            )),
        }
    }

    pub(crate) fn sensor(&self, operation: &'static str) -> Result<&VirtualSensor, DeviceError> {
        match self {
            Self::Sensor(sensor) => Ok(sensor),
            _ => Err(DeviceError::unimplemented(Capability::Occupancy, operation)),
        }
    }

    pub(crate) fn thermostat(
        &self,
        capability: Capability,
        operation: &'static str,
    ) -> Result<&VirtualThermostat, DeviceError> {
        match self {
            Self::Thermostat(thermostat) => Ok(thermostat),
            _ => Err(DeviceError::unimplemented(capability, operation)),
        }
    }
}

/// Stream the current value of `rx`, then every change, into `tx`.
///
/// Returns once `tx` is closed.
pub(crate) async fn forward<T>(
    mut rx: watch::Receiver<T>,
    tx: mpsc::Sender<T>,
) -> Result<(), DeviceError>
where
    T: Clone + Send + Sync,
{
    loop {
        let value = rx.borrow_and_update().clone();
        if tx.send(value).await.is_err() {
            return Ok(());
        }
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            () = tx.closed() => return Ok(()),
        }
    }
}
