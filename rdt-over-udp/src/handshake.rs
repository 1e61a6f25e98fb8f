//! Three-message connection establishment.
//!
//! ```text
//!  client                         server
//!    │ ── SYN     seq=0 ─────────────▶ │
//!    │ ◀──────── SYN-ACK seq=0 ack=1 ─ │  (connection state created)
//!    │ ── ACK     seq=1 ack=1 ───────▶ │
//! ```
//!
//! The client makes a single attempt by default: one SYN, one receive
//! timeout, then failure.  [`crate::config::ClientConfig::handshake_attempts`]
//! layers extra attempts on top without changing what one attempt does.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::packet::{Header, Packet, PacketType};
use crate::socket::{Socket, SocketError};

/// Sequence number the client places in its SYN.
pub const CLIENT_ISN: u16 = 0;

/// Sequence number the server places in its SYN-ACK.
pub const SERVER_ISN: u16 = 0;

#[derive(Debug, Error)]
pub enum HandshakeError {
    /// No SYN-ACK arrived within the timeout on any attempt.
    #[error("no SYN-ACK after {attempts} attempt(s) of {timeout:?}")]
    Timeout { attempts: u32, timeout: Duration },
    /// Something other than a matching SYN-ACK came back.
    #[error("unexpected handshake reply: {kind:?} ack={ack}")]
    UnexpectedReply { kind: PacketType, ack: u16 },
    #[error(transparent)]
    Socket(SocketError),
}

/// Perform the client side of the handshake against `peer`.
///
/// Each attempt sends one SYN and blocks for at most `timeout`.  A reply that
/// is not a SYN-ACK acknowledging [`CLIENT_ISN`] fails immediately.
pub async fn connect(
    socket: &Socket,
    peer: SocketAddr,
    timeout: Duration,
    attempts: u32,
) -> Result<(), HandshakeError> {
    let syn = Packet::control(PacketType::Syn, CLIENT_ISN, 0);

    for attempt in 1..=attempts {
        socket
            .send_to(&syn, peer)
            .await
            .map_err(HandshakeError::Socket)?;
        log::debug!("[handshake] → SYN seq={CLIENT_ISN} (attempt {attempt}/{attempts})");

        let reply = match socket.recv_timeout(timeout).await {
            Ok((pkt, _from)) => pkt,
            Err(SocketError::Timeout(_)) => {
                log::debug!("[handshake] no SYN-ACK within {timeout:?}");
                continue;
            }
            Err(e) => return Err(HandshakeError::Socket(e)),
        };

        let h = &reply.header;
        if h.kind != PacketType::SynAck || h.ack != CLIENT_ISN.wrapping_add(1) {
            return Err(HandshakeError::UnexpectedReply {
                kind: h.kind,
                ack: h.ack,
            });
        }

        let ack = Packet::control(PacketType::Ack, h.ack, h.seq.wrapping_add(1));
        socket
            .send_to(&ack, peer)
            .await
            .map_err(HandshakeError::Socket)?;
        log::info!("[handshake] connection established with {peer}");
        return Ok(());
    }

    Err(HandshakeError::Timeout { attempts, timeout })
}

/// Server reply to a SYN: acknowledges the client's sequence number + 1.
pub fn syn_ack(syn: &Header) -> Packet {
    Packet::control(PacketType::SynAck, SERVER_ISN, syn.seq.wrapping_add(1))
}
