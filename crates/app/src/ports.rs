//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the reconciliation kernel and the
//! outside world. They are defined here (in `app`) so that both the kernel
//! and the adapter layer can depend on them without creating circular
//! dependencies.

pub mod device;

pub use device::DeviceNode;
