//! Server-side per-connection receive state.
//!
//! [`Connection`] implements the receiver half of the protocol:
//!
//! - Only **in-order** segments (seq == `expected_seq`) advance state; each
//!   one is ACKed with its own sequence number.
//! - The first out-of-order segment after an in-order one triggers a single
//!   **duplicate ACK** of `last_ack`.  Further out-of-order segments are
//!   suppressed until the next in-order arrival re-arms it.
//! - Payload bytes are not buffered; only sequence state is tracked.
//!
//! This module only manages state; loss simulation, locking and socket I/O
//! belong to [`crate::server`].

/// Lifecycle of a server-side connection.  There is no teardown path, so
/// the only state is the one entered on SYN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Connected,
}

/// What the server should send in reply to a DATA packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveAction {
    /// In-order: ACK this sequence number.
    Ack(u16),
    /// First out-of-order arrival: repeat the last in-order ACK.
    DuplicateAck(u16),
    /// Out-of-order while a duplicate ACK is already outstanding: stay silent.
    Suppressed,
}

impl ReceiveAction {
    /// Number to place in both `seq` and `ack` of the reply, if any.
    pub fn ack_number(self) -> Option<u16> {
        match self {
            ReceiveAction::Ack(n) | ReceiveAction::DuplicateAck(n) => Some(n),
            ReceiveAction::Suppressed => None,
        }
    }
}

/// Receive state for one client address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub status: ConnectionStatus,
    /// Next in-order sequence number.
    pub expected_seq: u16,
    /// Sequence number of the most recent in-order segment (0 before any).
    pub last_ack: u16,
    /// Set once a duplicate ACK has gone out for the current gap.
    pub duplicate_ack_sent: bool,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// Fresh state as created by a SYN.
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Connected,
            expected_seq: 1,
            last_ack: 0,
            duplicate_ack_sent: false,
        }
    }

    /// Apply a DATA segment that survived loss simulation.
    pub fn on_data(&mut self, seq: u16) -> ReceiveAction {
        if seq == self.expected_seq {
            self.expected_seq = self.expected_seq.wrapping_add(1);
            self.last_ack = seq;
            self.duplicate_ack_sent = false;
            ReceiveAction::Ack(seq)
        } else if !self.duplicate_ack_sent {
            self.duplicate_ack_sent = true;
            ReceiveAction::DuplicateAck(self.last_ack)
        } else {
            ReceiveAction::Suppressed
        }
    }
}
