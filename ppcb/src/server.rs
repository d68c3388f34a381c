//! Server accept loops.
//!
//! [`UdpServer`] serves UDP and UDPR clients from one datagram socket;
//! [`TcpServer`] accepts TCP connections one after another.  Both feed a
//! [`ServerState`] and deliver the replies it asks for, and both write
//! accepted payload to a caller-supplied sink.  Neither ever stops because
//! of a single client: failures end the session (or the connection) and the
//! loop carries on.

use std::io::Write;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::time::Instant;

use crate::error::PpcbError;
use crate::packet::Package;
use crate::session::{ServerState, Step};
use crate::socket::{Socket, TransportError};
use crate::stream::Stream;
use crate::timer::RetransmitConfig;

// ---------------------------------------------------------------------------
// Datagram server
// ---------------------------------------------------------------------------

pub struct UdpServer {
    socket: Socket,
    state: ServerState,
    config: RetransmitConfig,
    /// End of the active session's wait window; `None` without a session,
    /// in which case receives block indefinitely.
    deadline: Option<Instant>,
}

impl UdpServer {
    pub async fn bind(addr: SocketAddr, config: RetransmitConfig) -> Result<Self, PpcbError> {
        let socket = Socket::bind(addr).await?;
        log::info!("[server] listening for datagrams on {}", socket.local_addr);
        Ok(Self {
            socket,
            state: ServerState::new(true, config),
            config,
            deadline: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Serve forever.
    pub async fn run<W: Write>(&mut self, sink: &mut W) {
        loop {
            self.step(sink).await;
        }
    }

    /// Handle exactly one event: a datagram, or the expiry of the wait window.
    pub async fn step<W: Write>(&mut self, sink: &mut W) {
        let received = match self.deadline {
            Some(deadline) => self.socket.recv_raw_until(deadline).await,
            None => self.socket.recv_raw().await,
        };

        let step = match received {
            Ok((bytes, from)) => match Package::decode(&bytes) {
                Ok(package) => self.state.on_package(package, from, sink),
                Err(e) => self.state.on_malformed(from, &e),
            },
            Err(TransportError::Timeout) => self.state.on_timeout(),
            Err(e) => {
                log::warn!("[server] receive failed: {e}");
                self.state.on_disconnect();
                Step::default()
            }
        };

        let rearm = step.rearm;
        self.deliver(step).await;

        self.deadline = if !self.state.is_active() {
            None
        } else if rearm || self.deadline.is_none() {
            Some(self.config.deadline())
        } else {
            self.deadline
        };
    }

    async fn deliver(&mut self, step: Step) {
        for reply in step.replies {
            log::debug!("[server] → {} to {}", reply.package.name(), reply.to);
            if let Err(e) = self.socket.send_to(&reply.package, reply.to).await {
                log::warn!("[server] sending {} to {} failed: {e}", reply.package.name(), reply.to);
                if self.state.session().is_some_and(|s| s.peer == reply.to) {
                    self.state.on_disconnect();
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stream server
// ---------------------------------------------------------------------------

pub struct TcpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: RetransmitConfig,
}

impl TcpServer {
    pub async fn bind(addr: SocketAddr, config: RetransmitConfig) -> Result<Self, PpcbError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("[server] listening for connections on {local_addr}");
        Ok(Self {
            listener,
            local_addr,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and serve connections one at a time, forever.
    pub async fn run<W: Write>(&mut self, sink: &mut W) {
        loop {
            if let Err(e) = self.accept_one(sink).await {
                log::warn!("[server] accept failed: {e}");
            }
        }
    }

    /// Accept the next connection and serve it to completion.
    pub async fn accept_one<W: Write>(&mut self, sink: &mut W) -> Result<(), PpcbError> {
        let (tcp, addr) = self.listener.accept().await?;
        log::info!("[server] connection from {addr}");
        let mut stream = Stream::new(tcp)?;
        self.serve(&mut stream, sink).await;
        if let Err(e) = stream.shutdown().await {
            log::debug!("[server] closing connection to {addr}: {e}");
        }
        Ok(())
    }

    async fn serve<W: Write>(&self, stream: &mut Stream, sink: &mut W) {
        let peer = stream.peer;
        let mut state = ServerState::new(false, self.config);
        let mut deadline = self.config.deadline();

        loop {
            let step = match stream.recv_until(deadline).await {
                Ok(package) => state.on_package(package, peer, sink),
                Err(TransportError::Timeout) => {
                    log::warn!("[server] connection from {peer} went quiet");
                    state.on_timeout();
                    return;
                }
                Err(TransportError::Packet(e)) => {
                    state.on_malformed(peer, &e);
                    return;
                }
                Err(e) => {
                    log::warn!("[server] connection from {peer} failed: {e}");
                    state.on_disconnect();
                    return;
                }
            };

            for reply in &step.replies {
                log::debug!("[server] → {}", reply.package.name());
                if let Err(e) = stream.send(&reply.package).await {
                    log::warn!("[server] sending {} failed: {e}", reply.package.name());
                    state.on_disconnect();
                    return;
                }
            }

            if !state.is_active() {
                return;
            }
            if step.rearm {
                deadline = self.config.deadline();
            }
        }
    }
}
