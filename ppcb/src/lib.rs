//! `ppcb` — move one byte stream from a client to a server over UDP, UDP
//! with retransmission (UDPR), or TCP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐                          ┌──────────────┐
//!  │ Transfer │  chunks, session id      │ ServerState  │  session slot
//!  └────┬─────┘                          └──────┬───────┘
//!       │                                       │ replies
//!  ┌────▼─────┐   CONN / DATA ──────────▶  ┌────▼───────────────┐
//!  │  Client  │                            │ UdpServer/TcpServer│──▶ sink
//!  └────┬─────┘  ◀──── CONNACC / ACC / RCVD└────┬───────────────┘
//!       │                                       │
//!  ┌────▼──────────────┐                  ┌─────▼─────────┐
//!  │ Transport         │                  │ Socket/Stream │
//!  │ (Socket | Stream) │                  └───────────────┘
//!  └───────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]    — wire format (serialise / deserialise)
//! - [`socket`]    — async UDP socket speaking packages
//! - [`stream`]    — TCP framing (read-exact / write-exact)
//! - [`transport`] — client view over either of the above
//! - [`timer`]     — wait window and retransmission budget
//! - [`state`]     — transport modes and client states
//! - [`sender`]    — chunking and send-side transfer state
//! - [`client`]    — client session state machine
//! - [`session`]   — server session state machine
//! - [`server`]    — datagram and stream accept loops
//! - [`error`]     — error kinds

pub mod client;
pub mod error;
pub mod packet;
pub mod sender;
pub mod server;
pub mod session;
pub mod socket;
pub mod state;
pub mod stream;
pub mod timer;
pub mod transport;

pub use client::{send_payload, Client, Outcome, Rejection};
pub use error::PpcbError;
pub use packet::{Package, PacketError, MAX_CHUNK};
pub use sender::Transfer;
pub use server::{TcpServer, UdpServer};
pub use session::ServerState;
pub use state::Mode;
pub use timer::RetransmitConfig;
