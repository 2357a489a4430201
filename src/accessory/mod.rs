//! Home-automation bridge surface.
//!
//! Each configured Flic button is exposed as a switch accessory through the
//! narrow [`SwitchAccessory`] contract. The bridge reads and writes state
//! through it and is told about gesture-driven changes via [`StateChange`].

pub mod adapter;
pub mod server;

use serde::{Deserialize, Serialize};

pub use adapter::{AccessoryAdapter, AccessoryRegistry};
pub use server::BridgeServer;

pub const MANUFACTURER: &str = "Flic.";
pub const MODEL: &str = "FlicButton";

/// Static metadata published when an accessory is registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryInfo {
    pub manufacturer: String,
    pub model: String,
    /// Bluetooth address of the button
    pub serial: String,
    pub name: String,
    pub protocol: String,
}

/// Pushed to the bridge whenever a gesture changes a switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub serial: String,
    pub on: bool,
}

/// What the bridge can do with a switch. None of these can fail.
pub trait SwitchAccessory: Send + Sync {
    fn info(&self) -> &AccessoryInfo;
    fn get_state(&self) -> bool;
    fn set_state(&self, on: bool);
    fn identify(&self);
}
