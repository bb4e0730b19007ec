//! Device node port — the RPC surface a device transport exposes.
//!
//! A node bridges an external protocol (virtual, BACnet, vendor gateway, …)
//! into buildhub. It answers, per capability, three kinds of calls:
//!
//! - `pull_*`: long-lived subscription. Sends the current value, then every
//!   change, into `tx` until the stream ends or `tx` is closed.
//! - `get_*`: one-shot query of the current value.
//! - `update_*`: write a value and return what the device now reports.
//!
//! Every method has a default answering [`DeviceError::Unimplemented`], so
//! a node only implements what its devices support. The kernel reacts to
//! an unimplemented `pull_*` by switching to periodic `get_*` calls.

use std::future::Future;

use buildhub_domain::capability::Capability;
use buildhub_domain::error::DeviceError;
use buildhub_domain::reading::{AirTemperature, Brightness, Modes, Occupancy};
use tokio::sync::mpsc;

/// A transport serving one or more named devices.
///
/// Implementations must be safe for concurrent use: many automations call
/// the same node from many tasks.
pub trait DeviceNode: Send + Sync + 'static {
    /// Unique name identifying this node (e.g. `"virtual"`).
    fn name(&self) -> &'static str;

    fn pull_occupancy(
        &self,
        _device: &str,
        _tx: mpsc::Sender<Occupancy>,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send {
        async { Err(DeviceError::unimplemented(Capability::Occupancy, "pull")) }
    }

    fn get_occupancy(
        &self,
        _device: &str,
    ) -> impl Future<Output = Result<Occupancy, DeviceError>> + Send {
        async { Err(DeviceError::unimplemented(Capability::Occupancy, "get")) }
    }

    fn pull_brightness(
        &self,
        _device: &str,
        _tx: mpsc::Sender<Brightness>,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send {
        async { Err(DeviceError::unimplemented(Capability::Brightness, "pull")) }
    }

    fn get_brightness(
        &self,
        _device: &str,
    ) -> impl Future<Output = Result<Brightness, DeviceError>> + Send {
        async { Err(DeviceError::unimplemented(Capability::Brightness, "get")) }
    }

    fn update_brightness(
        &self,
        _device: &str,
        _brightness: Brightness,
    ) -> impl Future<Output = Result<Brightness, DeviceError>> + Send {
        async { Err(DeviceError::unimplemented(Capability::Brightness, "update")) }
    }

    fn pull_air_temperature(
        &self,
        _device: &str,
        _tx: mpsc::Sender<AirTemperature>,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send {
        async {
            Err(DeviceError::unimplemented(
                Capability::AirTemperature,
                "pull",
            ))
        }
    }

    fn get_air_temperature(
        &self,
        _device: &str,
    ) -> impl Future<Output = Result<AirTemperature, DeviceError>> + Send {
        async {
            Err(DeviceError::unimplemented(
                Capability::AirTemperature,
                "get",
            ))
        }
    }

    fn update_air_temperature(
        &self,
        _device: &str,
        _temperature: AirTemperature,
    ) -> impl Future<Output = Result<AirTemperature, DeviceError>> + Send {
        async {
            Err(DeviceError::unimplemented(
                Capability::AirTemperature,
                "update",
            ))
        }
    }

    fn pull_modes(
        &self,
        _device: &str,
        _tx: mpsc::Sender<Modes>,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send {
        async { Err(DeviceError::unimplemented(Capability::Mode, "pull")) }
    }

    fn get_modes(&self, _device: &str) -> impl Future<Output = Result<Modes, DeviceError>> + Send {
        async { Err(DeviceError::unimplemented(Capability::Mode, "get")) }
    }

    /// Write the given mode keys. Keys absent from `modes` are left untouched.
    fn update_modes(
        &self,
        _device: &str,
        _modes: Modes,
    ) -> impl Future<Output = Result<Modes, DeviceError>> + Send {
        async { Err(DeviceError::unimplemented(Capability::Mode, "update")) }
    }
}
