//! Uniform client-side transport over a datagram socket or a TCP stream.
//!
//! The client state machine only needs "send a package" and "receive a
//! package before a deadline"; [`Transport`] hides which half of the adapter
//! does the work.  On the datagram path the peer address is pinned: packages
//! from any other source are logged and dropped.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::time::Instant;

use crate::error::PpcbError;
use crate::packet::Package;
use crate::socket::{Socket, TransportError};
use crate::state::Mode;
use crate::stream::Stream;
use crate::timer::RetransmitConfig;

pub enum Transport {
    Datagram { socket: Socket, peer: SocketAddr },
    Stream(Stream),
}

impl Transport {
    /// Open the transport `mode` calls for towards `peer`.
    ///
    /// For TCP this performs the connection handshake, bounded by the wait
    /// window.  For UDP and UDPR it only binds an ephemeral local socket.
    pub async fn open(
        mode: Mode,
        peer: SocketAddr,
        config: &RetransmitConfig,
    ) -> Result<Self, TransportError> {
        match mode {
            Mode::Udp | Mode::Udpr => {
                let local = if peer.is_ipv4() {
                    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
                };
                let socket = Socket::bind(local).await?;
                Ok(Transport::Datagram { socket, peer })
            }
            Mode::Tcp => Ok(Transport::Stream(
                Stream::connect(peer, config.max_wait).await?,
            )),
        }
    }

    pub async fn send(&mut self, package: &Package) -> Result<(), TransportError> {
        match self {
            Transport::Datagram { socket, peer } => socket.send_to(package, *peer).await,
            Transport::Stream(stream) => stream.send(package).await,
        }
    }

    /// Receive the next package from the peer, or [`TransportError::Timeout`]
    /// once `deadline` passes.
    pub async fn recv_until(&mut self, deadline: Instant) -> Result<Package, TransportError> {
        match self {
            Transport::Datagram { socket, peer } => loop {
                let (bytes, from) = socket.recv_raw_until(deadline).await?;
                if from != *peer {
                    log::debug!("[transport] dropping {} byte(s) from stranger {from}", bytes.len());
                    continue;
                }
                return Ok(Package::decode(&bytes)?);
            },
            Transport::Stream(stream) => stream.recv_until(deadline).await,
        }
    }
}

/// Resolve `host` and `port` to a concrete socket address, preferring IPv4.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, PpcbError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| PpcbError::AddressResolution(format!("{host}:{port}: {e}")))?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| PpcbError::AddressResolution(format!("{host}:{port}: no addresses")))
}
