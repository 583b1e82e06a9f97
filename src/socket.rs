//! Async datagram channel abstraction.
//!
//! The protocol drivers in [`crate::connection`] talk to the network only
//! through the [`Datagram`] trait: send bytes to an address, and receive the
//! next datagram with an optional deadline.  [`Socket`] is the production
//! implementation, a thin wrapper around `tokio::net::UdpSocket`;
//! [`crate::simulator::Simulator`] wraps any channel with fault injection.
//!
//! All protocol logic lives elsewhere; this module owns only byte I/O.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;

/// Largest datagram accepted from the OS.
const MAX_DATAGRAM: usize = 65_535;

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Binding the local address failed.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A best-effort, unordered datagram channel.
///
/// Implementations must never block past the deadline handed to
/// [`recv_from`](Datagram::recv_from).
#[allow(async_fn_in_trait)]
pub trait Datagram {
    /// Address this channel receives on.
    fn local_addr(&self) -> SocketAddr;

    /// Send `bytes` as a single datagram to `dest`.
    async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError>;

    /// Receive the next datagram.
    ///
    /// Returns `Ok(None)` when `timeout` elapses first.  A `timeout` of
    /// `None` waits without bound.
    async fn recv_from(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>, SocketError>;
}

/// A UDP socket speaking raw datagrams.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr)
            .await
            .map_err(|source| SocketError::Bind {
                addr: local_addr,
                source,
            })?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Bind an ephemeral port in the same address family as `peer`.
    pub async fn bind_for(peer: SocketAddr) -> Result<Self, SocketError> {
        let any: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        Self::bind(any).await
    }
}

impl Datagram for Socket {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    async fn recv_from(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>, SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.inner.recv_from(&mut buf)).await {
                Ok(res) => res?,
                Err(_elapsed) => return Ok(None),
            },
            None => self.inner.recv_from(&mut buf).await?,
        };
        let (n, addr) = received;
        buf.truncate(n);
        Ok(Some((buf, addr)))
    }
}
