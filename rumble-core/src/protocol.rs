//! Application protocols spoken over a channel, and the errors their framing raises.

use std::fmt;
use std::io;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channel::Session;
use crate::command::Command;
use crate::link::InboundStream;

/// Beacon protocol version. Beacons from other versions are ignored.
pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolKind {
    /// Binary status dissemination over unicast links.
    Rumble,
    /// JSON chat over UDP multicast.
    Firechat,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Rumble => "rumble",
            ProtocolKind::Firechat => "firechat",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Framing and dispatch failures. Only stream-level I/O errors are fatal to a
/// channel; everything else drops the offending frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferMismatch { expected: usize, actual: usize },
    #[error("unknown block type {0:#04x}")]
    UnknownBlockType(u8),
    #[error("unknown subtype {0:#04x}")]
    UnknownSubtype(u8),
    #[error("declared payload of {0} bytes exceeds limit")]
    TooLarge(u32),
    #[error("{field} is {len} bytes, limit is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("storage rejected message: {0}")]
    Storage(String),
    #[error("stream error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// True when the underlying stream is unusable and the channel must end.
    pub fn is_fatal(&self) -> bool {
        match self {
            ProtocolError::Io(e) => e.kind() != io::ErrorKind::InvalidData,
            _ => false,
        }
    }
}

/// Per-application logic run by a [`ProtocolChannel`](crate::channel::ProtocolChannel).
///
/// `read_unit` runs on the receive path without the channel lock and must only
/// do framing. `on_unit_received` and `on_command_received` run under the
/// channel lock and may touch the output stream and statistics.
#[async_trait]
pub trait ChannelProtocol: Send + Sync + 'static {
    /// One decoded network unit (a block, a chat line).
    type Unit: Send;

    fn protocol_kind(&self) -> ProtocolKind;

    /// Read one unit; returns it with the number of bytes consumed.
    async fn read_unit(
        &self,
        input: &mut (dyn InboundStream + '_),
    ) -> Result<(Self::Unit, usize), ProtocolError>;

    async fn on_unit_received(
        &self,
        unit: Self::Unit,
        session: &mut Session,
    ) -> Result<(), ProtocolError>;

    /// Returns whether the command was carried out. Commands the protocol does
    /// not handle return `Ok(false)`.
    async fn on_command_received(
        &self,
        command: &Command,
        session: &mut Session,
    ) -> Result<bool, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_stream_errors_are_fatal() {
        assert!(!ProtocolError::MalformedPacket("short".into()).is_fatal());
        assert!(!ProtocolError::UnknownSubtype(9).is_fatal());
        assert!(!ProtocolError::Io(io::Error::new(io::ErrorKind::InvalidData, "x")).is_fatal());
        assert!(ProtocolError::Io(io::ErrorKind::UnexpectedEof.into()).is_fatal());
        assert!(ProtocolError::Io(io::ErrorKind::BrokenPipe.into()).is_fatal());
    }
}
