//! Error kinds surfaced by the client, the server loops, and the CLI.

use std::io;

use thiserror::Error;

use crate::socket::TransportError;

#[derive(Error, Debug)]
pub enum PpcbError {
    /// Bad port, bad mode string, or an empty payload.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("could not resolve address {0}")]
    AddressResolution(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("peer closed the connection")]
    PeerClosed,
    /// Waits expired with no progress; `retransmits` resends were attempted.
    #[error("timed out (after {retransmits} retransmission(s))")]
    Timeout { retransmits: u32 },
    /// Wrong session id, wrong pack id, unexpected or malformed package.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl PpcbError {
    pub(crate) fn violation(msg: impl Into<String>) -> Self {
        PpcbError::ProtocolViolation(msg.into())
    }
}

impl From<TransportError> for PpcbError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io(e) => PpcbError::Io(e),
            TransportError::Timeout => PpcbError::Timeout { retransmits: 0 },
            TransportError::Closed => PpcbError::PeerClosed,
            TransportError::Packet(e) => PpcbError::ProtocolViolation(format!("malformed package: {e}")),
        }
    }
}
