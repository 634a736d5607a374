//! Serial Link Protocol
//!
//! Implements the Garmin device serial-link packet protocol.
//!
//! Every packet travels as a byte-stuffed frame:
//! `DLE, type, size, payload.., checksum, DLE, ETX`, where any data byte equal
//! to DLE is sent twice and the checksum is the two's complement of the sum of
//! the type, size and payload bytes.

mod checksum;
pub mod codec;
mod decoder;
mod error;
mod link;
mod packet;
pub mod serial;
pub mod transport;

pub use checksum::Checksum;
pub use codec::GarminCodec;
pub use decoder::{decode, read_packet, DecodeStage, ResyncReader};
pub use error::{ErrorKind, ProtocolError, TransportError};
pub use link::{Link, ProductData};
pub use packet::{encode, Packet, PacketBuilder, PacketId};
pub use serial::{list_ports, open_port, open_transport, PortInfo};
pub use transport::{IoTransport, MemoryTransport, SerialTransport, Transport};

/// Data Link Escape: frame delimiter, doubled when it appears as data
pub const DLE: u8 = 0x10;

/// End of Text: second byte of the frame terminator
pub const ETX: u8 = 0x03;

/// Acknowledge packet type id
pub const ACK: u8 = 0x06;

/// Negative acknowledge packet type id
pub const NAK: u8 = 0x15;

/// Maximum payload size; the size field is a single byte
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

/// Default baud rate for Garmin serial devices
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default per-read timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
