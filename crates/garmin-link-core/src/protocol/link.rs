//! Link session
//!
//! Packet-level exchange over an exclusively owned transport: send and
//! receive frames, acknowledge them, and run the product query every device
//! answers.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    Packet, PacketBuilder, PacketId, ProtocolError, ResyncReader, Transport, TransportError,
};
use crate::config::LinkConfig;

/// Identity reported by a device in its product data packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductData {
    /// Product id
    pub product_id: u16,
    /// Software version multiplied by 100
    pub software_version: i16,
    /// NUL-terminated description strings, the first being the product name
    pub descriptions: Vec<String>,
}

impl ProductData {
    /// Parse a product data payload
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 4 {
            return Err(ProtocolError::InvalidPayload(format!(
                "product data needs at least 4 bytes, got {}",
                payload.len()
            )));
        }

        let product_id = LittleEndian::read_u16(&payload[0..2]);
        let software_version = LittleEndian::read_i16(&payload[2..4]);

        let mut descriptions: Vec<String> = payload[4..]
            .split(|&b| b == 0)
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect();
        // A terminated last string leaves an empty tail
        if descriptions.last().is_some_and(|s| s.is_empty()) {
            descriptions.pop();
        }

        Ok(Self {
            product_id,
            software_version,
            descriptions,
        })
    }

    /// Product description, empty if the device sent none
    pub fn description(&self) -> &str {
        self.descriptions.first().map(String::as_str).unwrap_or("")
    }

    /// Software version formatted as "major.minor"
    pub fn version_string(&self) -> String {
        format!(
            "{}.{:02}",
            self.software_version / 100,
            (self.software_version % 100).abs()
        )
    }
}

/// Counts bytes pulled through the transport
struct Counting<'a, T: ?Sized> {
    inner: &'a mut T,
    read: u64,
}

impl<T: Transport + ?Sized> Transport for Counting<'_, T> {
    fn read_byte(&mut self) -> Result<u8, TransportError> {
        let byte = self.inner.read_byte()?;
        self.read += 1;
        Ok(byte)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.inner.write_all(bytes)
    }
}

/// Packet session over an owned transport
pub struct Link<T> {
    transport: T,
    reader: ResyncReader,
    /// Metrics: cumulative bytes/packets sent & received
    tx_bytes: u64,
    rx_bytes: u64,
    tx_packets: u64,
    rx_packets: u64,
}

impl<T: Transport> Link<T> {
    /// Create a session making one decode attempt per packet
    pub fn new(transport: T) -> Self {
        Self::with_reader(transport, ResyncReader::new(1))
    }

    /// Create a session using the configured resync attempts
    pub fn with_config(transport: T, config: &LinkConfig) -> Self {
        Self::with_reader(transport, ResyncReader::new(config.resync_attempts))
    }

    /// Create a session with an explicit reader policy
    pub fn with_reader(transport: T, reader: ResyncReader) -> Self {
        Self {
            transport,
            reader,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_packets: 0,
            rx_packets: 0,
        }
    }

    /// Get cumulative tx/rx bytes and packet counters
    pub fn get_counters(&self) -> (u64, u64, u64, u64) {
        (
            self.tx_bytes,
            self.rx_bytes,
            self.tx_packets,
            self.rx_packets,
        )
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Release the transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Encode and write one packet as a single buffer
    pub fn send_packet(&mut self, packet: &Packet) -> Result<(), ProtocolError> {
        let frame = packet.encode();
        self.transport.write_all(&frame)?;
        self.tx_bytes += frame.len() as u64;
        self.tx_packets += 1;
        debug!(
            "sent packet type {} ({} payload bytes)",
            packet.type_id(),
            packet.payload().len()
        );
        Ok(())
    }

    /// Read the next packet
    pub fn receive_packet(&mut self) -> Result<Packet, ProtocolError> {
        let mut counting = Counting {
            inner: &mut self.transport,
            read: 0,
        };
        let result = self.reader.read_packet(&mut counting);
        self.rx_bytes += counting.read;
        let packet = result?;
        self.rx_packets += 1;
        Ok(packet)
    }

    /// Acknowledge a received packet
    pub fn send_ack(&mut self, type_id: u8) -> Result<(), ProtocolError> {
        let ack = PacketBuilder::new()
            .u16_le(u16::from(type_id))
            .build(PacketId::Ack.as_u8())?;
        self.send_packet(&ack)
    }

    /// Reject a received packet
    pub fn send_nak(&mut self, type_id: u8) -> Result<(), ProtocolError> {
        let nak = PacketBuilder::new()
            .u16_le(u16::from(type_id))
            .build(PacketId::Nak.as_u8())?;
        self.send_packet(&nak)
    }

    /// Send a packet and wait for the device to acknowledge it
    pub fn exchange(&mut self, packet: &Packet) -> Result<(), ProtocolError> {
        self.send_packet(packet)?;
        let reply = self.receive_packet()?;
        let acked = reply.payload().first().copied();

        match reply.packet_id() {
            // Some devices ACK without naming the packet
            Some(PacketId::Ack) => match acked {
                Some(found) if found != packet.type_id() => Err(ProtocolError::UnexpectedPacket {
                    expected: packet.type_id(),
                    found,
                }),
                _ => Ok(()),
            },
            Some(PacketId::Nak) => {
                warn!("device rejected packet type {}", packet.type_id());
                Err(ProtocolError::Nak {
                    type_id: packet.type_id(),
                })
            }
            _ => Err(ProtocolError::UnexpectedPacket {
                expected: PacketId::Ack.as_u8(),
                found: reply.type_id(),
            }),
        }
    }

    /// Ask the device to identify itself
    pub fn request_product_data(&mut self) -> Result<ProductData, ProtocolError> {
        self.exchange(&Packet::empty(PacketId::ProductRequest.as_u8()))?;

        let reply = self.receive_packet()?;
        if reply.packet_id() != Some(PacketId::ProductData) {
            self.send_nak(reply.type_id())?;
            return Err(ProtocolError::UnexpectedPacket {
                expected: PacketId::ProductData.as_u8(),
                found: reply.type_id(),
            });
        }
        self.send_ack(reply.type_id())?;

        let product = ProductData::parse(reply.payload())?;
        debug!(
            "product {} v{}: {}",
            product.product_id,
            product.version_string(),
            product.description()
        );
        Ok(product)
    }
}
