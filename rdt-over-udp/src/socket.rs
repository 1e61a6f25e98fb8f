//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Packet`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O and the bounded-timeout receive
//! both endpoints block on.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::{Packet, PacketError};

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
const MAX_DATAGRAM: usize = 65_535;

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The datagram could not be encoded, or a received one could not be decoded.
    #[error("malformed packet: {0}")]
    Packet(#[from] PacketError),
    /// Nothing arrived within the receive timeout.
    #[error("no datagram within {0:?}")]
    Timeout(Duration),
}

/// An async, packet-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks behind
/// an `Arc`.
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
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `packet` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        let bytes = packet.encode()?;
        self.inner.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Packet`].
    ///
    /// Returns `(packet, sender_address)`.  Datagrams that fail to decode are
    /// returned as `Err(SocketError::Packet)`; the caller decides whether to
    /// keep receiving.
    pub async fn recv_from(&self) -> Result<(Packet, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        let packet = Packet::decode(&buf[..n])?;
        Ok((packet, addr))
    }

    /// [`recv_from`](Self::recv_from) bounded by `limit`.
    ///
    /// Returns [`SocketError::Timeout`] when nothing arrives in time.
    pub async fn recv_timeout(
        &self,
        limit: Duration,
    ) -> Result<(Packet, SocketAddr), SocketError> {
        match tokio::time::timeout(limit, self.recv_from()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(SocketError::Timeout(limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn packets_cross_loopback() {
        let a = loopback().await;
        let b = loopback().await;

        let pkt = Packet::data(5, b"payload".to_vec()).unwrap();
        a.send_to(&pkt, b.local_addr).await.unwrap();

        let (got, from) = b.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(got, pkt);
        assert_eq!(from, a.local_addr);
    }

    #[tokio::test]
    async fn recv_timeout_expires_when_silent() {
        let a = loopback().await;
        let err = a.recv_timeout(Duration::from_millis(30)).await.unwrap_err();
        assert!(matches!(err, SocketError::Timeout(d) if d == Duration::from_millis(30)));
    }

    #[tokio::test]
    async fn short_datagram_surfaces_as_packet_error() {
        let a = loopback().await;
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(&[PacketType::Data.to_u8(), 0, 1], a.local_addr)
            .await
            .unwrap();

        let err = a.recv_timeout(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(
            err,
            SocketError::Packet(PacketError::BufferTooShort(3))
        ));
    }
}
