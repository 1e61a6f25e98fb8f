//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between client and server is a [`Packet`].  This
//! module is responsible for:
//! - Defining the on-wire binary layout (type, seq, ack, length, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |        Sequence Number        |  Ack Number   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  (Ack cont.)  |        Payload Length         |  Payload ...  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 7 bytes.
//! type(1) + seq(2) + ack(2) + length(2)

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 7;

// Byte offsets of each field within the serialised header.
const OFF_TYPE: usize = 0;
const OFF_SEQ: usize = 1;
const OFF_ACK: usize = 3;
const OFF_LEN: usize = 5;

/// Packet type carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Client opens a connection.
    Syn,
    /// Server accepts a connection.
    SynAck,
    /// Acknowledgement (handshake completion or data ACK).
    Ack,
    /// Data segment.
    Data,
    /// Any other type byte; decoded so the caller can choose to ignore it.
    Unknown(u8),
}

impl PacketType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PacketType::Syn,
            2 => PacketType::SynAck,
            3 => PacketType::Ack,
            4 => PacketType::Data,
            other => PacketType::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            PacketType::Syn => 1,
            PacketType::SynAck => 2,
            PacketType::Ack => 3,
            PacketType::Data => 4,
            PacketType::Unknown(v) => v,
        }
    }
}

/// Fixed-size protocol header.
///
/// Fields are in host byte order; [`Packet::encode`] converts to big-endian
/// on the wire and [`Packet::decode`] converts back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub kind: PacketType,
    /// Sequence number; meaning depends on `kind`.
    pub seq: u16,
    /// Acknowledgement number.
    pub ack: u16,
    /// Length of the payload in bytes.  Must equal `payload.len()` on encode.
    pub length: u16,
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a payload-less control packet (SYN, SYN-ACK, ACK).
    pub fn control(kind: PacketType, seq: u16, ack: u16) -> Self {
        Packet {
            header: Header {
                kind,
                seq,
                ack,
                length: 0,
            },
            payload: Vec::new(),
        }
    }

    /// Build a DATA packet carrying `payload`.
    ///
    /// Fails with [`PacketError::PayloadTooLarge`] when the payload does not
    /// fit the 16-bit length field.
    pub fn data(seq: u16, payload: Vec<u8>) -> Result<Self, PacketError> {
        let length =
            u16::try_from(payload.len()).map_err(|_| PacketError::PayloadTooLarge(payload.len()))?;
        Ok(Packet {
            header: Header {
                kind: PacketType::Data,
                seq,
                ack: 0,
                length,
            },
            payload,
        })
    }

    /// ACK as emitted by the server: `seq` and `ack` both carry `num`.
    pub fn ack(num: u16) -> Self {
        Self::control(PacketType::Ack, num, num)
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// Returns [`PacketError::LengthMismatch`] if `header.length` disagrees
    /// with the actual payload size.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if usize::from(self.header.length) != self.payload.len() {
            return Err(PacketError::LengthMismatch {
                declared: self.header.length,
                actual: self.payload.len(),
            });
        }

        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];
        buf[OFF_TYPE] = self.header.kind.to_u8();
        buf[OFF_SEQ..OFF_SEQ + 2].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 2].copy_from_slice(&self.header.ack.to_be_bytes());
        buf[OFF_LEN..OFF_LEN + 2].copy_from_slice(&self.header.length.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if `buf` is shorter than [`HEADER_LEN`] or the declared
    /// `length` runs past the end of `buf`.  Bytes beyond the declared payload
    /// are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }

        let kind = PacketType::from_u8(buf[OFF_TYPE]);
        let seq = u16::from_be_bytes([buf[OFF_SEQ], buf[OFF_SEQ + 1]]);
        let ack = u16::from_be_bytes([buf[OFF_ACK], buf[OFF_ACK + 1]]);
        let length = u16::from_be_bytes([buf[OFF_LEN], buf[OFF_LEN + 1]]);

        let available = buf.len() - HEADER_LEN;
        if usize::from(length) > available {
            return Err(PacketError::PayloadTruncated {
                declared: length,
                available,
            });
        }

        Ok(Packet {
            header: Header {
                kind,
                seq,
                ack,
                length,
            },
            payload: buf[HEADER_LEN..HEADER_LEN + usize::from(length)].to_vec(),
        })
    }
}

/// Errors that can arise when encoding or parsing a datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer of {0} bytes is too short to contain a header")]
    BufferTooShort(usize),
    #[error("header declares {declared} payload bytes but only {available} follow")]
    PayloadTruncated { declared: u16, available: usize },
    #[error("header length {declared} does not match payload of {actual} bytes")]
    LengthMismatch { declared: u16, actual: usize },
    #[error("payload of {0} bytes does not fit the length field")]
    PayloadTooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_packet_layout_is_big_endian() {
        let pkt = Packet::data(0x0102, b"hi".to_vec()).unwrap();
        let bytes = pkt.encode().unwrap();
        assert_eq!(bytes, vec![4, 0x01, 0x02, 0x00, 0x00, 0x00, 0x02, b'h', b'i']);
    }

    #[test]
    fn control_packet_is_header_only() {
        let bytes = Packet::control(PacketType::SynAck, 0, 1).encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(bytes, vec![2, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn server_ack_mirrors_number_in_seq_and_ack() {
        let pkt = Packet::ack(7);
        assert_eq!(pkt.header.kind, PacketType::Ack);
        assert_eq!(pkt.header.seq, 7);
        assert_eq!(pkt.header.ack, 7);
    }

    #[test]
    fn decode_recovers_encoded_fields() {
        let pkt = Packet::data(513, vec![9u8; 60]).unwrap();
        let decoded = Packet::decode(&pkt.encode().unwrap()).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn encode_rejects_inconsistent_length() {
        let mut pkt = Packet::data(1, b"abc".to_vec()).unwrap();
        pkt.header.length = 5;
        assert_eq!(
            pkt.encode(),
            Err(PacketError::LengthMismatch {
                declared: 5,
                actual: 3
            })
        );
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Packet::decode(&[]), Err(PacketError::BufferTooShort(0)));
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Packet::decode(&[0u8; HEADER_LEN - 1]),
            Err(PacketError::BufferTooShort(HEADER_LEN - 1))
        );
    }

    #[test]
    fn decode_truncated_payload_returns_error() {
        let mut bytes = Packet::data(1, b"data".to_vec()).unwrap().encode().unwrap();
        bytes.pop(); // length still claims 4 bytes
        assert_eq!(
            Packet::decode(&bytes),
            Err(PacketError::PayloadTruncated {
                declared: 4,
                available: 3
            })
        );
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let mut bytes = Packet::data(3, b"ok".to_vec()).unwrap().encode().unwrap();
        bytes.extend_from_slice(b"junk");
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, b"ok");
        assert_eq!(decoded.header.length, 2);
    }

    #[test]
    fn unknown_type_byte_is_preserved() {
        let decoded = Packet::decode(&[9, 0, 1, 0, 2, 0, 0]).unwrap();
        assert_eq!(decoded.header.kind, PacketType::Unknown(9));
        assert_eq!(decoded.header.kind.to_u8(), 9);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let err = Packet::data(1, vec![0u8; usize::from(u16::MAX) + 1]).unwrap_err();
        assert_eq!(err, PacketError::PayloadTooLarge(usize::from(u16::MAX) + 1));
    }
}
