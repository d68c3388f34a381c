//! Stream half of the transport adapter.
//!
//! TCP has no message boundaries, so [`Stream`] delimits packages itself: it
//! reads the id byte, then exactly the fixed remainder for that variant, and
//! for DATA exactly `byte_len` more payload bytes.  Writes loop until every
//! byte is on the wire.  A read or write that makes no progress means the
//! peer closed the connection and is fatal to it.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use crate::packet::{self, ids, Package, PacketError};
use crate::socket::TransportError;

/// A package-oriented TCP connection.
#[derive(Debug)]
pub struct Stream {
    /// Address of the remote end.
    pub peer: SocketAddr,
    inner: TcpStream,
}

impl Stream {
    /// Wrap an already-connected or accepted [`TcpStream`].
    pub fn new(inner: TcpStream) -> Result<Self, TransportError> {
        let peer = inner.peer_addr()?;
        inner.set_nodelay(true)?;
        Ok(Self { peer, inner })
    }

    /// Open a connection to `peer`, failing with [`TransportError::Timeout`]
    /// if the handshake does not finish within `wait`.
    pub async fn connect(peer: SocketAddr, wait: Duration) -> Result<Self, TransportError> {
        let inner = match timeout(wait, TcpStream::connect(peer)).await {
            Ok(result) => result?,
            Err(_elapsed) => return Err(TransportError::Timeout),
        };
        Self::new(inner)
    }

    /// Encode `package` and write all of it.
    pub async fn send(&mut self, package: &Package) -> Result<(), TransportError> {
        let bytes = package.encode()?;
        self.write_exact(&bytes).await
    }

    /// Read the next whole package, blocking indefinitely.
    pub async fn recv(&mut self) -> Result<Package, TransportError> {
        let mut id = [0u8; 1];
        self.read_exact(&mut id).await?;

        let fixed = packet::fixed_len(id[0]).ok_or(PacketError::UnknownVariant(id[0]))?;
        let mut buf = vec![0u8; fixed];
        buf[0] = id[0];
        self.read_exact(&mut buf[1..]).await?;

        if id[0] == ids::DATA {
            let byte_len = packet::data_byte_len(&buf)?;
            buf.resize(fixed + byte_len, 0);
            self.read_exact(&mut buf[fixed..]).await?;
        }

        Ok(Package::decode(&buf)?)
    }

    /// Read the next whole package, giving up at `deadline`.
    ///
    /// A timeout mid-package leaves the stream desynchronised; callers treat
    /// it as fatal to the connection.
    pub async fn recv_until(&mut self, deadline: Instant) -> Result<Package, TransportError> {
        match tokio::time::timeout_at(deadline, self.recv()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(TransportError::Timeout),
        }
    }

    /// Close the write half so the peer sees end-of-stream.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    async fn write_exact(&mut self, mut data: &[u8]) -> Result<(), TransportError> {
        while !data.is_empty() {
            let n = self.inner.write(data).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            data = &data[n..];
        }
        self.inner.flush().await?;
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            filled += n;
        }
        Ok(())
    }
}
