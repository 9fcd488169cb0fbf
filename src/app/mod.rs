//! Application core: the feeder service and its port boundary.
//!
//! The service wires the cooperative scheduler to the schedule engine,
//! the feeding arbiter and the time sync engine. All interaction with
//! hardware happens through **port traits** defined in [`ports`], keeping
//! this layer fully testable without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
