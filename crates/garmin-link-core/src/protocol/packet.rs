//! Packet encoding
//!
//! Wire frame:
//! - 1 byte: DLE (never escaped)
//! - 1 byte: packet type id
//! - 1 byte: payload size (0..=255)
//! - N bytes: payload
//! - 1 byte: two's-complement checksum of type, size and payload
//! - 2 bytes: DLE, ETX (never escaped)
//!
//! Every byte between the delimiters that equals DLE is sent twice.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::{Checksum, ProtocolError, ACK, DLE, ETX, MAX_PAYLOAD_SIZE, NAK};

/// Basic link-layer packet ids understood by every device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketId {
    /// Acknowledge (6)
    Ack,
    /// Negative acknowledge (21)
    Nak,
    /// Protocol capability array (253), not implemented by all devices
    ProtocolArray,
    /// Product request (254)
    ProductRequest,
    /// Product data (255)
    ProductData,
    /// Extended product data (248), not implemented by all devices
    ExtProductData,
}

impl PacketId {
    /// Get the type id byte
    pub fn as_u8(&self) -> u8 {
        match self {
            PacketId::Ack => ACK,
            PacketId::Nak => NAK,
            PacketId::ProtocolArray => 253,
            PacketId::ProductRequest => 254,
            PacketId::ProductData => 255,
            PacketId::ExtProductData => 248,
        }
    }

    /// Look up a basic id; application-defined ids return `None`
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            ACK => Some(PacketId::Ack),
            NAK => Some(PacketId::Nak),
            253 => Some(PacketId::ProtocolArray),
            254 => Some(PacketId::ProductRequest),
            255 => Some(PacketId::ProductData),
            248 => Some(PacketId::ExtProductData),
            _ => None,
        }
    }
}

impl From<PacketId> for u8 {
    fn from(id: PacketId) -> Self {
        id.as_u8()
    }
}

/// A link packet: a type id and up to 255 payload bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Packet {
    type_id: u8,
    payload: Vec<u8>,
}

impl Packet {
    /// Create a packet, rejecting payloads longer than 255 bytes
    pub fn new(type_id: u8, payload: Vec<u8>) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload.len(),
            });
        }
        Ok(Self {
            type_id,
            payload,
        })
    }

    /// Create a packet with no payload
    pub fn empty(type_id: u8) -> Self {
        Self {
            type_id,
            payload: Vec::new(),
        }
    }

    /// Packet type id
    pub fn type_id(&self) -> u8 {
        self.type_id
    }

    /// Basic packet id, if the type id is one
    pub fn packet_id(&self) -> Option<PacketId> {
        PacketId::from_u8(self.type_id)
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Checksum byte carried by this packet's frame
    pub fn checksum(&self) -> u8 {
        let mut sum = Checksum::new();
        sum.absorb(self.type_id);
        sum.absorb(self.size_byte());
        sum.absorb_all(&self.payload);
        sum.finalize()
    }

    /// Encode the packet to a complete wire frame
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_size());
        self.encode_into(&mut out);
        out
    }

    /// Append the wire frame to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut sum = Checksum::new();

        out.push(DLE);
        push_data(out, self.type_id, Some(&mut sum));
        push_data(out, self.size_byte(), Some(&mut sum));
        for &b in &self.payload {
            push_data(out, b, Some(&mut sum));
        }
        push_data(out, sum.finalize(), None);
        out.push(DLE);
        out.push(ETX);
    }

    /// Length of the encoded frame including escape bytes
    pub fn encoded_size(&self) -> usize {
        let escapes = std::iter::once(self.type_id)
            .chain(std::iter::once(self.size_byte()))
            .chain(self.payload.iter().copied())
            .chain(std::iter::once(self.checksum()))
            .filter(|&b| b == DLE)
            .count();
        // DLE + type + size + payload + checksum + DLE + ETX
        6 + self.payload.len() + escapes
    }

    fn size_byte(&self) -> u8 {
        // Construction guarantees the payload fits in one byte
        self.payload.len() as u8
    }
}

/// Encode a frame straight from its parts
pub fn encode(type_id: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge { len: payload.len() });
    }
    let packet = Packet {
        type_id,
        payload: payload.to_vec(),
    };
    Ok(packet.encode())
}

/// Push a data byte, doubling it if it equals DLE. The unescaped value is
/// absorbed into the checksum when one is given.
fn push_data(out: &mut Vec<u8>, byte: u8, sum: Option<&mut Checksum>) {
    out.push(byte);
    if byte == DLE {
        out.push(byte);
    }
    if let Some(sum) = sum {
        sum.absorb(byte);
    }
}

/// Builder for constructing packet payloads
pub struct PacketBuilder {
    payload: Vec<u8>,
}

impl PacketBuilder {
    /// Create a new packet builder
    pub fn new() -> Self {
        Self {
            payload: Vec::new(),
        }
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.payload.push(b);
        self
    }

    /// Add a 16-bit value (little-endian)
    pub fn u16_le(mut self, value: u16) -> Self {
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add a 32-bit value (little-endian)
    pub fn u32_le(mut self, value: u32) -> Self {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.payload.extend_from_slice(data);
        self
    }

    /// Build the packet
    pub fn build(self, type_id: u8) -> Result<Packet, ProtocolError> {
        Packet::new(type_id, self.payload)
    }
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_request_frame() {
        let packet = Packet::empty(PacketId::ProductRequest.as_u8());
        assert_eq!(packet.encode(), vec![0x10, 0xFE, 0x00, 0x02, 0x10, 0x03]);
        assert_eq!(packet.encoded_size(), 6);
    }

    #[test]
    fn test_dle_payload_is_doubled() {
        let packet = Packet::new(0x22, vec![0x10]).unwrap();
        let frame = packet.encode();
        // type, size=1, payload DLE doubled
        assert_eq!(&frame[..5], &[DLE, 0x22, 0x01, DLE, DLE]);
        assert_eq!(frame.len(), packet.encoded_size());
    }

    #[test]
    fn test_dle_type_and_size_are_doubled() {
        let packet = Packet::new(DLE, vec![0u8; 16]).unwrap();
        let frame = packet.encode();
        assert_eq!(&frame[..5], &[DLE, DLE, DLE, DLE, DLE]);
    }

    #[test]
    fn test_dle_checksum_is_doubled() {
        // 0xF0 + 0x00 = 0xF0, negated = 0x10
        let packet = Packet::empty(0xF0);
        assert_eq!(packet.checksum(), DLE);
        assert_eq!(packet.encode(), vec![DLE, 0xF0, 0x00, DLE, DLE, DLE, ETX]);
    }

    #[test]
    fn test_payload_too_large() {
        let err = Packet::new(1, vec![0u8; 256]).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { len: 256 }));
        assert!(encode(1, &[0u8; 256]).is_err());
        assert!(Packet::new(1, vec![0u8; 255]).is_ok());
    }

    #[test]
    fn test_packet_builder() {
        let packet = PacketBuilder::new()
            .byte(0xFE)
            .u16_le(0x1234)
            .u32_le(1)
            .bytes(b"ab")
            .build(10)
            .unwrap();

        assert_eq!(packet.type_id(), 10);
        assert_eq!(packet.payload(), &[0xFE, 0x34, 0x12, 1, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn test_packet_id_mapping() {
        for id in [
            PacketId::Ack,
            PacketId::Nak,
            PacketId::ProtocolArray,
            PacketId::ProductRequest,
            PacketId::ProductData,
            PacketId::ExtProductData,
        ] {
            assert_eq!(PacketId::from_u8(id.as_u8()), Some(id));
        }
        assert_eq!(PacketId::from_u8(42), None);
    }
}
