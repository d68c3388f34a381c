//! Server-side session state machine.
//!
//! [`ServerState`] holds the server's single session slot and decides, for
//! every inbound package or expired wait, what to write to the output sink
//! and which packages to send back.  It does **not** touch the socket; the
//! loops in [`crate::server`] feed it and deliver its [`Reply`]s.
//!
//! # Session contract
//! - At most one session is active; a CONN is accepted only into an empty slot.
//! - A session is pinned to the address its CONN came from.
//! - DATA is accepted strictly in `pack_id` order.  On UDPR a DATA already
//!   accepted is re-acknowledged without touching the sink; anything else
//!   out of order is answered with RJT and ends the session.
//! - RCVD goes out once `remaining_bytes` reaches zero, and ends the session.

use std::io::Write;
use std::net::SocketAddr;

use crate::packet::{Package, PacketError};
use crate::state::Mode;
use crate::timer::{RetransmitConfig, Retransmitter, Retry};

/// A package the caller must send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub to: SocketAddr,
    pub package: Package,
}

/// Result of feeding one event to [`ServerState`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Step {
    /// Packages to send, in order.
    pub replies: Vec<Reply>,
    /// The active session's wait window must restart: a session was created,
    /// a chunk was accepted, or an acknowledgement was retransmitted.
    pub rearm: bool,
}

impl Step {
    fn reply(to: SocketAddr, package: Package) -> Self {
        Self {
            replies: vec![Reply { to, package }],
            rearm: false,
        }
    }

    fn rearmed(mut self) -> Self {
        self.rearm = true;
        self
    }
}

/// Record of the one in-progress transfer.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: u64,
    /// Bytes announced in CONN and not yet received.
    pub remaining_bytes: u64,
    pub next_pack_id: u64,
    pub mode: Mode,
    pub peer: SocketAddr,
    retries: Retransmitter,
}

impl Session {
    /// Consecutive expired waits since the last accepted chunk.
    pub fn retry_count(&self) -> u32 {
        self.retries.timeouts()
    }

    /// Acknowledgement resent when the client goes quiet: CONNACC before the
    /// first chunk, ACC of the last accepted chunk afterwards.
    fn last_acknowledgement(&self) -> Package {
        match self.next_pack_id.checked_sub(1) {
            None => Package::ConnAcc {
                session_id: self.session_id,
            },
            Some(pack_id) => Package::Acc {
                session_id: self.session_id,
                pack_id,
            },
        }
    }

    fn owns(&self, session_id: u64, from: SocketAddr) -> bool {
        self.session_id == session_id && self.peer == from
    }
}

/// The server's session slot.
#[derive(Debug, Clone, Default)]
pub enum Slot {
    #[default]
    NoSession,
    Active(Session),
}

/// Server state for one listener.
#[derive(Debug)]
pub struct ServerState {
    slot: Slot,
    /// `true` behind a UDP socket, `false` behind a TCP connection.  Decides
    /// how the CONN protocol byte is read.
    datagram: bool,
    config: RetransmitConfig,
}

impl ServerState {
    pub fn new(datagram: bool, config: RetransmitConfig) -> Self {
        Self {
            slot: Slot::NoSession,
            datagram,
            config,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.slot {
            Slot::Active(session) => Some(session),
            Slot::NoSession => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.slot, Slot::Active(_))
    }

    /// Handle one decoded package from `from`, writing accepted payload to
    /// `sink`.
    pub fn on_package<W: Write>(&mut self, package: Package, from: SocketAddr, sink: &mut W) -> Step {
        match package {
            Package::Conn {
                session_id,
                protocol,
                length,
            } => self.on_conn(session_id, protocol, length, from),
            Package::Data {
                session_id,
                pack_id,
                payload,
            } => self.on_data(session_id, pack_id, &payload, from, sink),
            other => self.on_unexpected(&other, from),
        }
    }

    /// Handle bytes from `from` that did not decode.
    pub fn on_malformed(&mut self, from: SocketAddr, err: &PacketError) -> Step {
        match &self.slot {
            Slot::Active(s) if s.peer == from => {
                log::warn!("[server] malformed package from session {} ({err}); ending session", s.session_id);
                self.teardown();
            }
            _ => log::debug!("[server] dropping malformed package from {from}: {err}"),
        }
        Step::default()
    }

    /// The wait window expired with nothing from the active peer.
    pub fn on_timeout(&mut self) -> Step {
        let Slot::Active(s) = &mut self.slot else {
            return Step::default();
        };
        match s.retries.on_timeout() {
            Retry::Retransmit => {
                let package = s.last_acknowledgement();
                log::debug!(
                    "[server] timeout #{} for session {}; resending {}",
                    s.retries.timeouts(),
                    s.session_id,
                    package.name()
                );
                Step::reply(s.peer, package).rearmed()
            }
            Retry::GiveUp => {
                log::warn!("[server] session {} timed out; ending session", s.session_id);
                self.teardown();
                Step::default()
            }
        }
    }

    /// The connection or socket failed under the active session.
    pub fn on_disconnect(&mut self) {
        if let Slot::Active(s) = &self.slot {
            log::warn!("[server] I/O failure; ending session {}", s.session_id);
        }
        self.teardown();
    }

    fn on_conn(&mut self, session_id: u64, protocol: u8, length: u64, from: SocketAddr) -> Step {
        let reject = Package::ConnRjt { session_id };
        match &self.slot {
            Slot::NoSession => {
                let Some(mode) = Mode::from_protocol(protocol, self.datagram) else {
                    log::warn!("[server] CONN from {from} with unsupported protocol {protocol}");
                    return Step::reply(from, reject);
                };
                if length == 0 {
                    log::warn!("[server] CONN from {from} announces an empty transfer");
                    return Step::reply(from, reject);
                }
                log::info!("[server] ← CONN session={session_id} mode={mode} length={length} from {from}");
                self.slot = Slot::Active(Session {
                    session_id,
                    remaining_bytes: length,
                    next_pack_id: 0,
                    mode,
                    peer: from,
                    retries: Retransmitter::new(&self.config, mode.retransmits()),
                });
                Step::reply(from, Package::ConnAcc { session_id }).rearmed()
            }
            Slot::Active(s) if s.owns(session_id, from) => {
                if s.mode.retransmits() {
                    log::debug!("[server] ← repeated CONN session={session_id}; resending CONNACC");
                    Step::reply(from, Package::ConnAcc { session_id })
                } else {
                    log::warn!("[server] session {session_id} sent a second CONN; ending session");
                    self.teardown();
                    Step::reply(from, reject)
                }
            }
            Slot::Active(s) => {
                log::info!(
                    "[server] busy with session {}; refusing session {session_id} from {from}",
                    s.session_id
                );
                Step::reply(from, reject)
            }
        }
    }

    fn on_data<W: Write>(
        &mut self,
        session_id: u64,
        pack_id: u64,
        payload: &[u8],
        from: SocketAddr,
        sink: &mut W,
    ) -> Step {
        let s = match &mut self.slot {
            Slot::Active(s) if s.owns(session_id, from) => s,
            _ => {
                log::debug!("[server] ignoring DATA session={session_id} pack_id={pack_id} from {from}");
                return Step::default();
            }
        };

        let expected = s.next_pack_id;
        let len = payload.len() as u64;

        if pack_id < expected && s.mode.retransmits() {
            log::debug!("[server] ← duplicate DATA pack_id={pack_id}; resending ACC");
            return Step::reply(from, Package::Acc { session_id, pack_id });
        }

        if pack_id != expected || len > s.remaining_bytes {
            log::warn!(
                "[server] session {session_id}: DATA pack_id={pack_id} len={len} but expected pack_id={expected} with {} byte(s) left; rejecting",
                s.remaining_bytes
            );
            self.teardown();
            return Step::reply(from, Package::Rjt { session_id, pack_id });
        }

        if let Err(e) = sink.write_all(payload).and_then(|()| sink.flush()) {
            log::warn!("[server] output write failed ({e}); ending session {session_id}");
            self.teardown();
            return Step::default();
        }

        s.remaining_bytes -= len;
        s.next_pack_id += 1;
        s.retries.on_progress();
        log::debug!(
            "[server] ← DATA pack_id={pack_id} len={len} remaining={}",
            s.remaining_bytes
        );

        let mut step = Step::default().rearmed();
        if s.mode.retransmits() {
            step.replies.push(Reply {
                to: from,
                package: Package::Acc { session_id, pack_id },
            });
        }
        if s.remaining_bytes == 0 {
            log::info!("[server] session {session_id} complete");
            step.replies.push(Reply {
                to: from,
                package: Package::Rcvd { session_id },
            });
            self.teardown();
        }
        step
    }

    fn on_unexpected(&mut self, package: &Package, from: SocketAddr) -> Step {
        match &self.slot {
            Slot::Active(s) if s.owns(package.session_id(), from) => {
                log::warn!(
                    "[server] session {} sent unexpected {}; ending session",
                    s.session_id,
                    package.name()
                );
                self.teardown();
            }
            _ => log::debug!("[server] ignoring {} from {from}", package.name()),
        }
        Step::default()
    }

    fn teardown(&mut self) {
        self.slot = Slot::NoSession;
    }
}
