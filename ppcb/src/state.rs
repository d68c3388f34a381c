//! Finite-state-machine types for both ends of a transfer.
//!
//! State transitions are *not* implemented here.  Client transitions live in
//! [`crate::client`], server transitions in [`crate::session`].

use std::fmt;
use std::str::FromStr;

use crate::packet::protocol;

/// Transport mode chosen by the operator at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Mode {
    /// Plain UDP: chunks are fired and forgotten.
    Udp,
    /// UDP with per-chunk ACC and retransmission.
    Udpr,
    /// TCP: the transport guarantees ordered delivery.
    Tcp,
}

impl Mode {
    /// Value of the CONN `protocol` byte for this mode.
    pub fn protocol(self) -> u8 {
        match self {
            Mode::Udp => protocol::UDP,
            Mode::Udpr => protocol::UDPR,
            Mode::Tcp => protocol::TCP,
        }
    }

    /// `true` only for UDPR.
    pub fn retransmits(self) -> bool {
        self == Mode::Udpr
    }

    /// `true` for the datagram modes.
    pub fn is_datagram(self) -> bool {
        matches!(self, Mode::Udp | Mode::Udpr)
    }

    /// Map a CONN `protocol` byte to a mode, given what kind of listener
    /// received it.  Returns `None` for values the listener does not serve.
    pub fn from_protocol(value: u8, datagram: bool) -> Option<Self> {
        match (value, datagram) {
            (protocol::UDP, true) => Some(Mode::Udp),
            (protocol::UDPR, true) => Some(Mode::Udpr),
            (protocol::TCP, false) => Some(Mode::Tcp),
            _ => None,
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "udp" => Ok(Mode::Udp),
            "udpr" => Ok(Mode::Udpr),
            "tcp" => Ok(Mode::Tcp),
            _ => Err(format!("unknown transport mode: {s} (expected udp, udpr or tcp)")),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Udp => "udp",
            Mode::Udpr => "udpr",
            Mode::Tcp => "tcp",
        })
    }
}

/// Client-side transfer states.
///
/// ```text
///  Idle ──CONN──▶ AwaitingConnAck ──CONNACC──▶ Sending ──last DATA──▶ AwaitingReceived ──RCVD──▶ Done
///                     │                          │                          │
///                     └──────────────────────────┴───── error ─────────────┴──▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// CONN sent; waiting for CONNACC or CONNRJT.
    AwaitingConnAck,
    /// Sending DATA chunks (and, on UDPR, collecting their ACCs).
    Sending,
    /// All chunks sent; waiting for RCVD.
    AwaitingReceived,
    /// RCVD received, or the server refused with CONNRJT/RJT.
    Done,
    /// Timeout, I/O error or protocol violation.
    Failed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
