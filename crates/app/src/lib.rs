//! # buildhub-app
//!
//! Application layer — the reconciliation kernel and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement:
//!   - `DeviceNode`: pull, get and update operations per capability
//! - Provide the **reconciliation kernel** every automation is built from:
//!   - [`pull`]: resilient subscribe-or-poll fetch primitive
//!   - [`merger`]: patch application with drain-then-notify coalescing
//!   - [`sources`]: converge running subscriptions to the configured devices
//!   - [`scheduler`]: TTL-driven re-evaluation of decisions
//!   - [`actions`]: write cache, dry-run and counting action layers
//! - Provide an explicit [`registry`] mapping device names to nodes
//! - Ship example [`automations`] built on the kernel
//!
//! ## Dependency rule
//! Depends on `buildhub-domain` only (plus `tokio` and `tokio-util` for
//! channels, timers and cancellation). Never imports adapter crates.
//! Adapters depend on *this* crate, not the reverse.

pub mod actions;
pub mod automation;
pub mod automations;
pub mod merger;
pub mod patch;
pub mod ports;
pub mod pull;
pub mod reading;
pub mod registry;
pub mod scheduler;
pub mod sources;
pub mod state;
