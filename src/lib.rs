//! Flic button to home-automation switch bridge.
//!
//! Raw button edges from the Flic daemon are classified into press gestures;
//! a single press toggles a switch that a home-automation bridge can read,
//! write and observe.

pub mod accessory;
pub mod domain;
pub mod infrastructure;
