//! Ties each reading type to its capability, its node operations and its
//! slot in [`ReadState`].
//!
//! Generic kernel code (fetchers, sources, patches) is written once against
//! [`Reading`] instead of once per capability.

use std::future::Future;

use buildhub_domain::capability::Capability;
use buildhub_domain::error::DeviceError;
use buildhub_domain::reading::{AirTemperature, Brightness, Modes, Occupancy};
use tokio::sync::mpsc;

use crate::ports::DeviceNode;
use crate::state::{ReadState, Readings};

pub trait Reading: Clone + Send + Sync + 'static {
    const CAPABILITY: Capability;

    fn slot<C>(state: &ReadState<C>) -> &Readings<Self>;

    fn slot_mut<C>(state: &mut ReadState<C>) -> &mut Readings<Self>;

    fn pull<N: DeviceNode>(
        node: &N,
        device: &str,
        tx: mpsc::Sender<Self>,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;

    fn get<N: DeviceNode>(
        node: &N,
        device: &str,
    ) -> impl Future<Output = Result<Self, DeviceError>> + Send;
}

impl Reading for Occupancy {
    const CAPABILITY: Capability = Capability::Occupancy;

    fn slot<C>(state: &ReadState<C>) -> &Readings<Self> {
        &state.occupancy
    }

    fn slot_mut<C>(state: &mut ReadState<C>) -> &mut Readings<Self> {
        &mut state.occupancy
    }

    fn pull<N: DeviceNode>(
        node: &N,
        device: &str,
        tx: mpsc::Sender<Self>,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send {
        node.pull_occupancy(device, tx)
    }

    fn get<N: DeviceNode>(
        node: &N,
        device: &str,
    ) -> impl Future<Output = Result<Self, DeviceError>> + Send {
        node.get_occupancy(device)
    }
}

impl Reading for Brightness {
    const CAPABILITY: Capability = Capability::Brightness;

    fn slot<C>(state: &ReadState<C>) -> &Readings<Self> {
        &state.brightness
    }

    fn slot_mut<C>(state: &mut ReadState<C>) -> &mut Readings<Self> {
        &mut state.brightness
    }

    fn pull<N: DeviceNode>(
        node: &N,
        device: &str,
        tx: mpsc::Sender<Self>,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send {
        node.pull_brightness(device, tx)
    }

    fn get<N: DeviceNode>(
        node: &N,
        device: &str,
    ) -> impl Future<Output = Result<Self, DeviceError>> + Send {
        node.get_brightness(device)
    }
}

impl Reading for AirTemperature {
    const CAPABILITY: Capability = Capability::AirTemperature;

    fn slot<C>(state: &ReadState<C>) -> &Readings<Self> {
        &state.air_temperature
    }

    fn slot_mut<C>(state: &mut ReadState<C>) -> &mut Readings<Self> {
        &mut state.air_temperature
    }

    fn pull<N: DeviceNode>(
        node: &N,
        device: &str,
        tx: mpsc::Sender<Self>,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send {
        node.pull_air_temperature(device, tx)
    }

    fn get<N: DeviceNode>(
        node: &N,
        device: &str,
    ) -> impl Future<Output = Result<Self, DeviceError>> + Send {
        node.get_air_temperature(device)
    }
}

impl Reading for Modes {
    const CAPABILITY: Capability = Capability::Mode;

    fn slot<C>(state: &ReadState<C>) -> &Readings<Self> {
        &state.modes
    }

    fn slot_mut<C>(state: &mut ReadState<C>) -> &mut Readings<Self> {
        &mut state.modes
    }

    fn pull<N: DeviceNode>(
        node: &N,
        device: &str,
        tx: mpsc::Sender<Self>,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send {
        node.pull_modes(device, tx)
    }

    fn get<N: DeviceNode>(
        node: &N,
        device: &str,
    ) -> impl Future<Output = Result<Self, DeviceError>> + Send {
        node.get_modes(device)
    }
}
