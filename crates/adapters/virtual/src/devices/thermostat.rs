//! Virtual thermostat: poll-only air temperature and modes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use buildhub_domain::reading::{AirTemperature, Modes};

const INITIAL_AMBIENT_CELSIUS: f64 = 21.5;
const INITIAL_SETPOINT_CELSIUS: f64 = 21.0;

#[derive(Debug)]
struct State {
    temperature: AirTemperature,
    modes: Modes,
}

/// A simulated thermostat.
///
/// Only the setpoint is writable; a write carrying an ambient value keeps
/// the measured ambient temperature.
#[derive(Debug)]
pub struct VirtualThermostat {
    state: Mutex<State>,
    writes: AtomicUsize,
}

impl Default for VirtualThermostat {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                temperature: AirTemperature {
                    ambient_celsius: Some(INITIAL_AMBIENT_CELSIUS),
                    setpoint_celsius: Some(INITIAL_SETPOINT_CELSIUS),
                },
                modes: Modes::default(),
            }),
            writes: AtomicUsize::new(0),
        }
    }
}

impl VirtualThermostat {
    #[must_use]
    pub fn air_temperature(&self) -> AirTemperature {
        self.lock().temperature
    }

    #[must_use]
    pub fn modes(&self) -> Modes {
        self.lock().modes.clone()
    }

    /// Write the setpoint and return the full reading.
    pub fn set_air_temperature(&self, temperature: AirTemperature) -> AirTemperature {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        if let Some(setpoint) = temperature.setpoint_celsius {
            state.temperature.setpoint_celsius = Some(setpoint);
        }
        state.temperature
    }

    /// Merge `modes` into the current modes and return the full set.
    pub fn set_modes(&self, modes: Modes) -> Modes {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        state.modes.0.extend(modes.0);
        state.modes.clone()
    }

    /// Simulate a new ambient measurement.
    pub fn set_ambient(&self, celsius: f64) {
        self.lock().temperature.ambient_celsius = Some(celsius);
    }

    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
