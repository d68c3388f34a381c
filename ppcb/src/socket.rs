//! Datagram half of the transport adapter.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Package`] instead of raw bytes.  One send is exactly one
//! datagram and one receive is exactly one datagram.  All protocol logic
//! lives elsewhere; this module owns only byte I/O and the receive timeout.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::packet::{Package, PacketError, MAX_PACKAGE_LEN};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from transport operations, datagram or stream.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Underlying I/O error from the OS.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    /// Nothing arrived within the wait window.
    #[error("receive timed out")]
    Timeout,
    /// The stream peer closed the connection (read or write of zero bytes).
    #[error("peer closed the connection")]
    Closed,
    /// The received bytes could not be decoded as a valid package.
    #[error("package decode error: {0}")]
    Packet(#[from] PacketError),
}

impl TransportError {
    /// `true` for the one recoverable condition.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, package-oriented UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, TransportError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `package` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, package: &Package, dest: SocketAddr) -> Result<(), TransportError> {
        let bytes = package.encode()?;
        let sent = self.inner.send_to(&bytes, dest).await?;
        if sent != bytes.len() {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("{} sent incompletely ({sent} of {} bytes)", package.name(), bytes.len()),
            )));
        }
        Ok(())
    }

    /// Receive the next datagram and return its raw bytes with the sender.
    ///
    /// Blocks indefinitely; decoding is left to the caller so that a
    /// malformed datagram can still be attributed to its source address.
    pub async fn recv_raw(&self) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let mut buf = vec![0u8; MAX_PACKAGE_LEN + 1];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }

    /// Receive the next datagram and decode it into a [`Package`].
    ///
    /// Returns `(package, sender_address)`.  Datagrams that fail to decode are
    /// returned as `Err`; the caller decides whether to keep waiting.
    pub async fn recv_from(&self) -> Result<(Package, SocketAddr), TransportError> {
        let (bytes, addr) = self.recv_raw().await?;
        Ok((Package::decode(&bytes)?, addr))
    }

    /// Like [`Socket::recv_from`] but gives up with [`TransportError::Timeout`]
    /// once `wait` has elapsed.
    pub async fn recv_from_timeout(
        &self,
        wait: Duration,
    ) -> Result<(Package, SocketAddr), TransportError> {
        self.recv_from_until(Instant::now() + wait).await
    }

    /// Receive until `deadline`, then fail with [`TransportError::Timeout`].
    pub async fn recv_from_until(
        &self,
        deadline: Instant,
    ) -> Result<(Package, SocketAddr), TransportError> {
        match tokio::time::timeout_at(deadline, self.recv_from()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(TransportError::Timeout),
        }
    }

    /// Receive raw bytes until `deadline`, then fail with
    /// [`TransportError::Timeout`].
    pub async fn recv_raw_until(
        &self,
        deadline: Instant,
    ) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        match tokio::time::timeout_at(deadline, self.recv_raw()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(TransportError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn one_package_per_datagram() {
        let a = loopback().await;
        let b = loopback().await;

        a.send_to(&Package::ConnAcc { session_id: 9 }, b.local_addr)
            .await
            .unwrap();
        a.send_to(&Package::Rcvd { session_id: 9 }, b.local_addr)
            .await
            .unwrap();

        let (first, from) = b.recv_from_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(first, Package::ConnAcc { session_id: 9 });
        assert_eq!(from, a.local_addr);
        let (second, _) = b.recv_from_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(second, Package::Rcvd { session_id: 9 });
    }

    #[tokio::test]
    async fn silence_is_a_timeout_not_an_error() {
        let a = loopback().await;
        let err = a
            .recv_from_timeout(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "got {err:?}");
    }

    #[tokio::test]
    async fn garbage_datagram_is_a_packet_error() {
        let a = loopback().await;
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(&[42, 1, 2], a.local_addr).await.unwrap();

        let err = a.recv_from_timeout(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Packet(PacketError::UnknownVariant(42))
        ));
    }
}
