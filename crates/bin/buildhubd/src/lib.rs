//! # buildhubd — buildhub daemon
//!
//! Composition root that wires device nodes and automations together.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars), see [`config`]
//! - Construct the device nodes and the registry mapping devices to them
//! - Spawn the configured automations and keep them in line with the
//!   configuration on reload, see [`fleet`]
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer: no domain logic belongs here.

pub mod config;
pub mod fleet;
