//! Bluetooth Module
//!
//! Button edges reach us through the Flic daemon (flicd), which owns the
//! Bluetooth radio, pairing and reconnection. This module talks to it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               ButtonClient trait             │
//! │   get_device_list()   connect(addr) -> edges │
//! └──────────────────────┬───────────────────────┘
//!                        │
//!                        ▼
//!              ┌───────────────────┐     ┌──────────┐
//!              │    FlicClient     │────▶│ Protocol │
//!              │ - TCP to flicd    │     │ - framing│
//!              │ - channel routing │     │ - codec  │
//!              └───────────────────┘     └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - flicd packet framing, commands and event decoding
//! - [`connection`] - TCP client routing events to per-button channels

pub mod connection;
pub mod protocol;

use crate::domain::models::{BdAddr, EdgeEvent, LatencyMode};
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;

pub use connection::FlicClient;

/// Raw edges of one button; ends when the transport drops the channel
pub type EdgeStream = mpsc::UnboundedReceiver<EdgeEvent>;

#[derive(Debug, Error)]
pub enum FlicError {
    #[error("flicd transport unavailable: {0}")]
    TransportUnavailable(#[source] std::io::Error),
    #[error("malformed flicd packet: {0}")]
    Protocol(String),
    #[error("connection channel for {addr} rejected with error code {code}")]
    ChannelRejected { addr: BdAddr, code: u8 },
    #[error("flicd connection closed")]
    Closed,
}

/// Upstream source of button edges
pub trait ButtonClient: Send + Sync {
    /// Addresses of buttons the daemon has verified
    fn get_device_list(&self) -> impl Future<Output = Result<Vec<BdAddr>, FlicError>> + Send;

    /// Open a channel for one button
    fn connect(
        &self,
        addr: BdAddr,
        latency_mode: LatencyMode,
    ) -> impl Future<Output = Result<EdgeStream, FlicError>> + Send;
}
