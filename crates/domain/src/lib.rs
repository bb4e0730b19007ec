//! # buildhub-domain
//!
//! Pure domain model for the buildhub control plane.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps and
//!   an overridable [`Clock`](time::Clock)
//! - Define **capabilities** (occupancy, brightness, air temperature, modes)
//!   and the typed **readings** devices report for each of them
//! - Define **write values** and the recorded [`Value`](value::Value) shape
//!   shared by the read and write sides of the engine
//! - Define the **write settings** every automation carries in its config
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod capability;
pub mod reading;
pub mod settings;
pub mod value;
