//! Common error types used across the workspace.
//!
//! Each layer defines typed errors and converts into [`HubError`] via
//! `#[from]`. [`DeviceError`] is `Clone` because the write cache hands a
//! recorded failure back out on every cache hit.

use std::error::Error as StdError;
use std::sync::Arc;

use crate::capability::Capability;

/// Failure reported by (or about) a single device endpoint.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    /// The endpoint does not implement the requested operation.
    #[error("{capability} {operation} is not supported by the device")]
    Unimplemented {
        capability: Capability,
        operation: &'static str,
    },

    /// No node in the registry serves the named device.
    #[error("no device node serves {name:?}")]
    UnknownDevice { name: String },

    /// The device exists but could not be reached.
    #[error("device {name:?} is unavailable")]
    Unavailable { name: String },

    /// The device answered a write with values that differ from the request.
    #[error("unexpected response: requested {requested}, got {actual}")]
    UnexpectedResponse { requested: String, actual: String },

    /// The operation was abandoned because its caller was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Any other transport failure.
    #[error("transport error")]
    Transport(#[source] Arc<dyn StdError + Send + Sync>),
}

impl DeviceError {
    /// Shorthand for [`DeviceError::Unimplemented`].
    #[must_use]
    pub fn unimplemented(capability: Capability, operation: &'static str) -> Self {
        Self::Unimplemented {
            capability,
            operation,
        }
    }

    /// Wrap an arbitrary transport error.
    pub fn transport(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::Transport(Arc::new(err))
    }

    #[must_use]
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, Self::Unimplemented { .. })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Domain invariant violations, mostly raised while validating configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("device {name:?} is listed more than once for {capability}")]
    DuplicateDevice {
        capability: Capability,
        name: String,
    },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("level {value} is outside 0..=100")]
    LevelOutOfRange { value: f32 },
}

/// Top-level error for the reconciliation engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The owning automation was stopped.
    #[error("automation cancelled")]
    Cancelled,
}

impl HubError {
    /// Whether this error only reports cancellation, at any level.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Device(err) => err.is_cancelled(),
            Self::Validation(_) => false,
        }
    }
}
