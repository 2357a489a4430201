//! Flic daemon (flicd) wire protocol
//!
//! flicd speaks a small binary protocol over TCP. Every packet in either
//! direction is framed as:
//!
//! ```text
//! [0-1]   : Length of the rest of the packet (u16 little-endian)
//! [2]     : Opcode
//! [3..]   : Payload, all integers little-endian
//! ```
//!
//! Bluetooth addresses travel as 6 bytes, least significant byte first.
//! Only the subset of opcodes needed for up/down edge delivery is modelled;
//! other events are surfaced as [`Event::Unhandled`].

use crate::domain::models::{BdAddr, EdgeEvent, LatencyMode};
use crate::infrastructure::bluetooth::FlicError;

/// Default flicd TCP port
pub const DEFAULT_PORT: u16 = 5551;

/// `auto_disconnect_time` value that disables auto disconnect
pub const AUTO_DISCONNECT_DISABLED: i16 = 511;

/// Size of the length prefix in front of every packet
pub const HEADER_LEN: usize = 2;

mod opcode {
    pub const CMD_GET_INFO: u8 = 0;
    pub const CMD_CREATE_CONNECTION_CHANNEL: u8 = 3;
    pub const CMD_REMOVE_CONNECTION_CHANNEL: u8 = 4;

    pub const EVT_CREATE_CONNECTION_CHANNEL_RESPONSE: u8 = 1;
    pub const EVT_CONNECTION_STATUS_CHANGED: u8 = 2;
    pub const EVT_CONNECTION_CHANNEL_REMOVED: u8 = 3;
    pub const EVT_BUTTON_UP_OR_DOWN: u8 = 4;
    pub const EVT_GET_INFO_RESPONSE: u8 = 9;
}

/// Commands sent to flicd
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask for daemon info, including the verified button list
    GetInfo,
    /// Open a logical channel delivering events for one button
    CreateConnectionChannel {
        conn_id: u32,
        bd_addr: BdAddr,
        latency_mode: LatencyMode,
        auto_disconnect_time: i16,
    },
    RemoveConnectionChannel {
        conn_id: u32,
    },
}

impl Command {
    fn opcode(&self) -> u8 {
        match self {
            Self::GetInfo => opcode::CMD_GET_INFO,
            Self::CreateConnectionChannel { .. } => opcode::CMD_CREATE_CONNECTION_CHANNEL,
            Self::RemoveConnectionChannel { .. } => opcode::CMD_REMOVE_CONNECTION_CHANNEL,
        }
    }

    /// Encode into a complete framed packet
    pub fn encode(&self) -> Vec<u8> {
        let mut body = vec![self.opcode()];
        match self {
            Self::GetInfo => {}
            Self::CreateConnectionChannel {
                conn_id,
                bd_addr,
                latency_mode,
                auto_disconnect_time,
            } => {
                body.extend_from_slice(&conn_id.to_le_bytes());
                body.extend_from_slice(&encode_bd_addr(bd_addr));
                body.push(latency_mode_byte(*latency_mode));
                body.extend_from_slice(&auto_disconnect_time.to_le_bytes());
            }
            Self::RemoveConnectionChannel { conn_id } => {
                body.extend_from_slice(&conn_id.to_le_bytes());
            }
        }

        let mut packet = Vec::with_capacity(HEADER_LEN + body.len());
        packet.extend_from_slice(&(body.len() as u16).to_le_bytes());
        packet.extend_from_slice(&body);
        packet
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Ready,
    Unknown(u8),
}

impl From<u8> for ConnectionStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connected,
            2 => Self::Ready,
            other => Self::Unknown(other),
        }
    }
}

/// Events received from flicd
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CreateConnectionChannelResponse {
        conn_id: u32,
        /// 0 means success
        error: u8,
        status: ConnectionStatus,
    },
    ConnectionStatusChanged {
        conn_id: u32,
        status: ConnectionStatus,
        disconnect_reason: u8,
    },
    ConnectionChannelRemoved {
        conn_id: u32,
        reason: u8,
    },
    ButtonUpOrDown {
        conn_id: u32,
        edge: EdgeEvent,
        was_queued: bool,
        /// Seconds since the event happened, for queued events
        time_diff: i32,
    },
    GetInfoResponse {
        my_bd_addr: BdAddr,
        max_pending_connections: u8,
        max_concurrently_connected_buttons: i16,
        verified_buttons: Vec<BdAddr>,
    },
    Unhandled(u8),
}

pub fn latency_mode_byte(mode: LatencyMode) -> u8 {
    match mode {
        LatencyMode::NormalLatency => 0,
        LatencyMode::LowLatency => 1,
        LatencyMode::HighLatency => 2,
    }
}

pub fn encode_bd_addr(addr: &BdAddr) -> [u8; 6] {
    let mut bytes = addr.0;
    bytes.reverse();
    bytes
}

/// Read the length prefix of a packet
pub fn decode_length(header: [u8; HEADER_LEN]) -> usize {
    u16::from_le_bytes(header) as usize
}

/// Bounds-checked little-endian cursor over a packet body
struct PayloadReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], FlicError> {
        let end = self.pos + N;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| {
            FlicError::Protocol(format!(
                "packet truncated: need {} bytes at offset {}, have {}",
                N,
                self.pos,
                self.bytes.len()
            ))
        })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, FlicError> {
        Ok(self.take::<1>()?[0])
    }

    fn bool(&mut self) -> Result<bool, FlicError> {
        Ok(self.u8()? != 0)
    }

    fn u16(&mut self) -> Result<u16, FlicError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn i16(&mut self) -> Result<i16, FlicError> {
        Ok(i16::from_le_bytes(self.take()?))
    }

    fn u32(&mut self) -> Result<u32, FlicError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn i32(&mut self) -> Result<i32, FlicError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn bd_addr(&mut self) -> Result<BdAddr, FlicError> {
        let mut bytes: [u8; 6] = self.take()?;
        bytes.reverse();
        Ok(BdAddr(bytes))
    }
}

/// Decode a packet body (opcode + payload, without the length prefix)
pub fn decode_event(body: &[u8]) -> Result<Event, FlicError> {
    let mut reader = PayloadReader::new(body);
    let opcode = reader.u8()?;

    let event = match opcode {
        opcode::EVT_CREATE_CONNECTION_CHANNEL_RESPONSE => Event::CreateConnectionChannelResponse {
            conn_id: reader.u32()?,
            error: reader.u8()?,
            status: reader.u8()?.into(),
        },
        opcode::EVT_CONNECTION_STATUS_CHANGED => Event::ConnectionStatusChanged {
            conn_id: reader.u32()?,
            status: reader.u8()?.into(),
            disconnect_reason: reader.u8()?,
        },
        opcode::EVT_CONNECTION_CHANNEL_REMOVED => Event::ConnectionChannelRemoved {
            conn_id: reader.u32()?,
            reason: reader.u8()?,
        },
        opcode::EVT_BUTTON_UP_OR_DOWN => {
            let conn_id = reader.u32()?;
            let edge = match reader.u8()? {
                0 => EdgeEvent::Down,
                1 => EdgeEvent::Up,
                other => {
                    return Err(FlicError::Protocol(format!(
                        "unexpected click type {} in up/down event",
                        other
                    )))
                }
            };
            Event::ButtonUpOrDown {
                conn_id,
                edge,
                was_queued: reader.bool()?,
                time_diff: reader.i32()?,
            }
        }
        opcode::EVT_GET_INFO_RESPONSE => {
            let _controller_state = reader.u8()?;
            let my_bd_addr = reader.bd_addr()?;
            let _my_bd_addr_type = reader.u8()?;
            let max_pending_connections = reader.u8()?;
            let max_concurrently_connected_buttons = reader.i16()?;
            let _current_pending_connections = reader.u8()?;
            let _no_space_for_new_connection = reader.bool()?;
            let count = reader.u16()?;
            let verified_buttons = (0..count)
                .map(|_| reader.bd_addr())
                .collect::<Result<Vec<_>, _>>()?;
            Event::GetInfoResponse {
                my_bd_addr,
                max_pending_connections,
                max_concurrently_connected_buttons,
                verified_buttons,
            }
        }
        other => Event::Unhandled(other),
    };

    Ok(event)
}
