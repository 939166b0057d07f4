//! Connection-level error taxonomy.
//!
//! Every variant except [`StpError::ChecksumMismatch`] is fatal: the engine
//! that produced it tears the connection down (best-effort RESET to the peer)
//! and hands the error to the driving application.  A checksum mismatch is
//! recovered locally by dropping the datagram; it only appears here so the
//! codec's errors convert cleanly.

use std::io;

use thiserror::Error;

use crate::packet::PacketError;
use crate::state::ConnectionState;

#[derive(Error, Debug)]
pub enum StpError {
    /// Datagram too short to hold a header.
    #[error("malformed packet: {0}")]
    Malformed(PacketError),

    /// Recomputed checksum differs from the one on the wire.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Wrong segment type for the current state, or a sequence number outside
    /// the admissible range.
    #[error("protocol violation in {state}: {reason}")]
    ProtocolViolation {
        state: ConnectionState,
        reason: String,
    },

    /// The peer sent data beyond the advertised receive window.
    #[error("flow control violation: {0}")]
    FlowControl(String),

    /// The retry budget for one outstanding packet is spent.
    #[error("no acknowledgement for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },

    /// The peer reset the connection.
    #[error("connection reset by peer")]
    PeerReset,

    /// Operation not valid in the connection's current state.
    #[error("operation not permitted in state {0}")]
    BadState(ConnectionState),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StpError {
    pub(crate) fn violation(state: ConnectionState, reason: impl Into<String>) -> Self {
        StpError::ProtocolViolation {
            state,
            reason: reason.into(),
        }
    }
}

impl From<PacketError> for StpError {
    fn from(err: PacketError) -> Self {
        match err {
            PacketError::ChecksumMismatch => StpError::ChecksumMismatch,
            other => StpError::Malformed(other),
        }
    }
}

pub type Result<T, E = StpError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_mismatch_keeps_its_own_variant() {
        let err = StpError::from(PacketError::ChecksumMismatch);
        assert!(matches!(err, StpError::ChecksumMismatch));
    }

    #[test]
    fn short_buffer_maps_to_malformed() {
        let err = StpError::from(PacketError::BufferTooShort(2));
        assert!(matches!(err, StpError::Malformed(PacketError::BufferTooShort(2))));
    }

    #[test]
    fn violation_message_names_state() {
        let err = StpError::violation(ConnectionState::Listen, "expected SYN");
        assert_eq!(err.to_string(), "protocol violation in LISTEN: expected SYN");
    }
}
