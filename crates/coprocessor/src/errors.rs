use framebus::FrameBusError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Why a client session ended. Every variant is local to one connection.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("peer closed the connection")]
    Disconnected,

    #[error("no traffic from peer within {0:?}")]
    Watchdog(Duration),

    #[error("unrecognized opcode {0:#06x}")]
    UnknownOpcode(u16),

    #[error("{field} of {len} does not fit a 16-bit wire field")]
    Oversized { field: &'static str, len: usize },

    #[error("{opcode} expects a {expected}-byte payload, got {len}")]
    PayloadLength {
        opcode: &'static str,
        expected: usize,
        len: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame bus error: {0}")]
    Bus(#[from] FrameBusError),

    #[error("server shutting down")]
    Shutdown,
}

impl SessionError {
    /// Map a socket error, folding the "peer went away" kinds into `Disconnected`.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => SessionError::Disconnected,
            _ => SessionError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        assert_eq!(
            SessionError::UnknownOpcode(0x0077).to_string(),
            "unrecognized opcode 0x0077"
        );
        assert_eq!(
            SessionError::Watchdog(Duration::from_secs(10)).to_string(),
            "no traffic from peer within 10s"
        );
        assert_eq!(
            SessionError::Oversized {
                field: "frame length",
                len: 70_000
            }
            .to_string(),
            "frame length of 70000 does not fit a 16-bit wire field"
        );
        assert_eq!(
            SessionError::PayloadLength {
                opcode: "m_focus",
                expected: 4,
                len: 1
            }
            .to_string(),
            "m_focus expects a 4-byte payload, got 1"
        );
        assert_eq!(
            SessionError::Bus(FrameBusError::Closed).to_string(),
            "Frame bus error: frame bus closed"
        );
    }

    #[test]
    fn test_from_io_classifies_peer_close() {
        for kind in [
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
        ] {
            assert!(matches!(
                SessionError::from_io(io::Error::from(kind)),
                SessionError::Disconnected
            ));
        }

        match SessionError::from_io(io::Error::from(io::ErrorKind::BrokenPipe)) {
            SessionError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("Expected Io variant, got {other:?}"),
        }
    }
}
