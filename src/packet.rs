//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between sender and receiver is a [`Packet`].  This
//! module is responsible for:
//! - Defining the on-wire binary layout (fixed header, optional payload).
//! - Serialising a packet into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a header and payload, returning
//!   errors for malformed or truncated input.
//! - Computing and verifying the integrity checksum.
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
//! |                             Type                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload Length                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Checksum                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 16 bytes.
//!
//! The checksum is CRC-32 (IEEE) over the header with the checksum field
//! zeroed, followed by the payload.

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 16;

/// Largest DATA payload; keeps a full datagram under a 1500-byte path MTU.
pub const MAX_PAYLOAD: usize = 1472;

// Byte offsets of each field within the serialised header.
const OFF_TYPE: usize = 0;
const OFF_SEQ: usize = 4;
const OFF_LENGTH: usize = 8;
const OFF_CHECKSUM: usize = 12;

/// The four packet kinds carried in the `type` header field.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Opens a connection; always sequence 0.
    Start = 0,
    /// Closes a connection; carries the sequence after the last chunk.
    End = 1,
    /// One chunk of the message.
    Data = 2,
    /// Cumulative acknowledgement; `seq` is the next sequence expected.
    Ack = 3,
}

impl PacketType {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => PacketType::Start,
            1 => PacketType::End,
            2 => PacketType::Data,
            3 => PacketType::Ack,
            _ => return None,
        })
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PacketType::Start => "START",
            PacketType::End => "END",
            PacketType::Data => "DATA",
            PacketType::Ack => "ACK",
        };
        f.write_str(name)
    }
}

/// Fixed-size protocol header, in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: PacketType,
    pub seq: u32,
    /// Length of the payload in bytes.
    ///
    /// On encode this is computed from the actual payload length.
    /// On decode this is validated against the remaining buffer bytes.
    pub length: u32,
    /// CRC-32 over the header (this field zeroed) and the payload.
    pub checksum: u32,
}

impl Header {
    /// Serialise the header as it appears on the wire.
    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[OFF_TYPE..OFF_TYPE + 4].copy_from_slice(&self.kind.to_u32().to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_LENGTH..OFF_LENGTH + 4].copy_from_slice(&self.length.to_be_bytes());
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }
}

/// Errors that can arise when parsing a raw datagram.
///
/// Every variant means the same thing to the protocol engines: the datagram
/// is dropped as if the network had lost it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer too short to contain a header ({0} bytes)")]
    BufferTooShort(usize),
    /// `length` field claims more bytes than the datagram carries.
    #[error("length field {claimed} exceeds the {available} bytes after the header")]
    LengthMismatch { claimed: u32, available: usize },
    /// `type` field is not one of START, END, DATA, ACK.
    #[error("unknown packet type {0}")]
    UnknownType(u32),
    /// Recomputed checksum differs from the transmitted one.
    #[error("checksum mismatch")]
    ChecksumMismatch,
}

/// Build the wire bytes for one packet.
///
/// The header's `length` is taken from `payload` and the checksum is
/// computed last, with its own field zeroed.
pub fn encode(kind: PacketType, seq: u32, payload: &[u8]) -> Vec<u8> {
    let header = Header {
        kind,
        seq,
        length: payload.len() as u32,
        checksum: 0,
    };
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(payload);

    let csum = checksum(&buf[..HEADER_LEN], payload);
    buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&csum.to_be_bytes());
    buf
}

/// Split a datagram into its header and payload.
///
/// The checksum is *not* checked here; see [`verify`].  Bytes after the
/// `length`-sized payload are ignored.
pub fn decode(buf: &[u8]) -> Result<(Header, &[u8]), PacketError> {
    if buf.len() < HEADER_LEN {
        return Err(PacketError::BufferTooShort(buf.len()));
    }

    let raw_type = read_u32(buf, OFF_TYPE);
    let seq = read_u32(buf, OFF_SEQ);
    let length = read_u32(buf, OFF_LENGTH);
    let checksum = read_u32(buf, OFF_CHECKSUM);

    let available = buf.len() - HEADER_LEN;
    if length as usize > available {
        return Err(PacketError::LengthMismatch {
            claimed: length,
            available,
        });
    }
    let kind = PacketType::from_u32(raw_type).ok_or(PacketError::UnknownType(raw_type))?;

    let header = Header {
        kind,
        seq,
        length,
        checksum,
    };
    Ok((header, &buf[HEADER_LEN..HEADER_LEN + length as usize]))
}

/// Recompute the checksum with the header's checksum field zeroed and
/// compare it to the stored value.
pub fn verify(header: &Header, payload: &[u8]) -> bool {
    let zeroed = Header {
        checksum: 0,
        ..*header
    };
    checksum(&zeroed.to_bytes(), payload) == header.checksum
}

fn checksum(header: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    hasher.finalize()
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// An owned, validated packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn start() -> Self {
        Self::control(PacketType::Start, 0)
    }

    pub fn end(seq: u32) -> Self {
        Self::control(PacketType::End, seq)
    }

    pub fn ack(seq: u32) -> Self {
        Self::control(PacketType::Ack, seq)
    }

    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: PacketType::Data,
            seq,
            payload,
        }
    }

    fn control(kind: PacketType, seq: u32) -> Self {
        Self {
            kind,
            seq,
            payload: Vec::new(),
        }
    }

    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        encode(self.kind, self.seq, &self.payload)
    }

    /// Decode and verify a datagram in one step.
    ///
    /// Returns [`PacketError::ChecksumMismatch`] when the bytes decode but
    /// fail integrity verification.
    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        let (header, payload) = decode(buf)?;
        if !verify(&header, payload) {
            return Err(PacketError::ChecksumMismatch);
        }
        Ok(Self {
            kind: header.kind,
            seq: header.seq,
            payload: payload.to_vec(),
        })
    }
}
