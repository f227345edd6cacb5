//! Testing utilities and mock implementations
//!
//! Lets the connection supervisor and publisher run without an MQTT broker.

pub mod mocks;

pub use mocks::*;
