//! Wire-format definitions for STP segments.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (fixed header, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`].
//! - Verifying the additive checksum.
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
//! |             Type              |        Advertised Window      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Sequence Number        |   Checksum    |  Payload ...  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 7 bytes.
//!
//! The checksum is the modulo-256 sum of the six header bytes preceding it
//! and every payload byte.  Any single-bit flip changes the sum, but two
//! compensating flips do not; that is a known limit of an additive checksum.

use std::fmt;

/// Largest datagram either peer sends.
pub const MTU: usize = 300;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 7;

/// Largest payload that fits in one segment.
pub const MSS: usize = MTU - HEADER_LEN;

// Byte offsets of each field within the serialised header.
const OFF_TYPE: usize = 0;
const OFF_WINDOW: usize = 2;
const OFF_SEQ: usize = 4;
const OFF_CHECKSUM: usize = 6;

/// Segment types.  Exactly one bit is set on the wire.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Data = 0x01,
    Ack = 0x02,
    Syn = 0x04,
    Fin = 0x08,
    Reset = 0x10,
}

impl PacketType {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x01 => PacketType::Data,
            0x02 => PacketType::Ack,
            0x04 => PacketType::Syn,
            0x08 => PacketType::Fin,
            0x10 => PacketType::Reset,
            _ => return None,
        })
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Short tag used in trace lines.
    pub fn tag(self) -> &'static str {
        match self {
            PacketType::Data => "dat",
            PacketType::Ack => "ack",
            PacketType::Syn => "syn",
            PacketType::Fin => "fin",
            PacketType::Reset => "reset",
        }
    }
}

/// Fixed-size protocol header.
///
/// `kind` is kept as the raw wire value so that a corrupted type field is
/// rejected by [`Packet::verify`] rather than by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Raw type field; see [`PacketType`].
    pub kind: u16,
    /// Advertised receive window in bytes.
    pub window: u16,
    /// Sequence number of the first payload byte (or of the control segment).
    pub seq: u16,
    /// Additive checksum as read from (or written to) the wire.
    pub checksum: u8,
}

impl Header {
    /// The decoded segment type, or `None` for an unknown value.
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u16(self.kind)
    }
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet with a correct checksum.
    pub fn new(kind: PacketType, window: u16, seq: u16, payload: Vec<u8>) -> Self {
        let checksum = checksum(kind.to_u16(), window, seq, &payload);
        Self {
            header: Header {
                kind: kind.to_u16(),
                window,
                seq,
                checksum,
            },
            payload,
        }
    }

    /// A payload-free control segment (ACK, SYN, FIN, RESET).
    pub fn control(kind: PacketType, window: u16, seq: u16) -> Self {
        Self::new(kind, window, seq, Vec::new())
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        self.header.packet_type()
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// The checksum is recomputed from the other fields; any value already
    /// stored in `header.checksum` is ignored.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if self.payload.len() > MSS {
            return Err(PacketError::PayloadTooLarge(self.payload.len()));
        }
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        buf[OFF_TYPE..OFF_TYPE + 2].copy_from_slice(&self.header.kind.to_be_bytes());
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.header.window.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 2].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_CHECKSUM] = checksum(
            self.header.kind,
            self.header.window,
            self.header.seq,
            &self.payload,
        );
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw byte slice without checking the checksum.
    ///
    /// The only failure is a buffer shorter than [`HEADER_LEN`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }

        let kind = u16::from_be_bytes([buf[OFF_TYPE], buf[OFF_TYPE + 1]]);
        let window = u16::from_be_bytes([buf[OFF_WINDOW], buf[OFF_WINDOW + 1]]);
        let seq = u16::from_be_bytes([buf[OFF_SEQ], buf[OFF_SEQ + 1]]);

        Ok(Packet {
            header: Header {
                kind,
                window,
                seq,
                checksum: buf[OFF_CHECKSUM],
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// Recompute the checksum and compare it with the stored one.
    pub fn verify(&self) -> bool {
        let h = &self.header;
        checksum(h.kind, h.window, h.seq, &self.payload) == h.checksum
    }

    /// [`decode`](Self::decode) followed by [`verify`](Self::verify).
    ///
    /// This is what the engines use: a short buffer is fatal, a checksum
    /// mismatch is a silent drop, and the two must be told apart.
    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        let packet = Self::decode(buf)?;
        if !packet.verify() {
            return Err(PacketError::ChecksumMismatch);
        }
        Ok(packet)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.packet_type().map_or("???", PacketType::tag);
        write!(
            f,
            "{} seq {} win {} len {}",
            tag,
            self.header.seq,
            self.header.window,
            HEADER_LEN + self.payload.len()
        )
    }
}

/// Errors that can arise when building or parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    BufferTooShort(usize),
    /// Payload exceeds [`MSS`].
    PayloadTooLarge(usize),
    /// Checksum did not match the recomputed value.
    ChecksumMismatch,
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::BufferTooShort(n) => {
                write!(f, "{n}-byte datagram is too short to contain a header")
            }
            PacketError::PayloadTooLarge(n) => {
                write!(f, "{n}-byte payload exceeds the {MSS}-byte segment limit")
            }
            PacketError::ChecksumMismatch => write!(f, "checksum verification failed"),
        }
    }
}

impl std::error::Error for PacketError {}

/// Modulo-256 sum of the header fields' bytes and every payload byte.
fn checksum(kind: u16, window: u16, seq: u16, payload: &[u8]) -> u8 {
    let header = [kind.to_be_bytes(), window.to_be_bytes(), seq.to_be_bytes()];
    header
        .iter()
        .flatten()
        .chain(payload)
        .fold(0u8, |sum, b| sum.wrapping_add(*b))
}
