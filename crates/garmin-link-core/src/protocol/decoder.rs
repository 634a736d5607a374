//! Frame decoding
//!
//! A single-attempt state machine: it assumes the next physical byte starts a
//! fresh frame and fails on the first byte that does not fit. Each stage after
//! the start delimiter consumes one logical byte, where a logical DLE arrives
//! as two physical DLE bytes.

use std::fmt;

use tracing::{debug, trace, warn};

use super::{Checksum, ErrorKind, Packet, ProtocolError, Transport, TransportError, DLE, ETX};

/// Decoder states, in frame order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// Waiting for the opening DLE
    AwaitStart,
    /// Reading the packet type
    ReadTypeId,
    /// Reading the payload size
    ReadLength,
    /// Reading payload bytes
    ReadPayload,
    /// Reading the checksum byte
    ReadChecksum,
    /// Checking that the running sum is zero
    VerifyChecksum,
    /// Waiting for the closing DLE
    AwaitDleEnd,
    /// Waiting for the closing ETX
    AwaitEtx,
    /// Frame complete
    Done,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecodeStage::AwaitStart => "awaiting frame start",
            DecodeStage::ReadTypeId => "reading type id",
            DecodeStage::ReadLength => "reading length",
            DecodeStage::ReadPayload => "reading payload",
            DecodeStage::ReadChecksum => "reading checksum",
            DecodeStage::VerifyChecksum => "verifying checksum",
            DecodeStage::AwaitDleEnd => "awaiting end DLE",
            DecodeStage::AwaitEtx => "awaiting ETX",
            DecodeStage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Pulls physical bytes from a source and tracks how many were consumed
struct FrameReader<F> {
    next: F,
    stage: DecodeStage,
    sum: Checksum,
    consumed: usize,
}

impl<F> FrameReader<F>
where
    F: FnMut() -> Result<u8, TransportError>,
{
    fn new(next: F) -> Self {
        Self {
            next,
            stage: DecodeStage::AwaitStart,
            sum: Checksum::new(),
            consumed: 0,
        }
    }

    fn physical(&mut self) -> Result<u8, ProtocolError> {
        let byte = (self.next)()?;
        self.consumed += 1;
        Ok(byte)
    }

    /// Read one logical byte and absorb it into the checksum
    fn logical(&mut self) -> Result<u8, ProtocolError> {
        let byte = self.physical()?;
        if byte == DLE {
            let pair = self.physical()?;
            if pair != DLE {
                trace!("escape pair completed by {:#04x} instead of DLE", pair);
            }
        }
        self.sum.absorb(byte);
        Ok(byte)
    }

    /// Read one unescaped sentinel byte
    fn expect(&mut self, stage: DecodeStage, expected: u8) -> Result<(), ProtocolError> {
        let found = self.physical()?;
        if found != expected {
            return Err(ProtocolError::Framing {
                stage,
                expected,
                found,
            });
        }
        Ok(())
    }

    fn run(&mut self) -> Result<Packet, ProtocolError> {
        let mut type_id = 0u8;
        let mut length = 0usize;
        let mut payload = Vec::new();

        loop {
            let stage = self.stage;
            self.stage = match stage {
                DecodeStage::AwaitStart => {
                    self.expect(stage, DLE)?;
                    DecodeStage::ReadTypeId
                }
                DecodeStage::ReadTypeId => {
                    type_id = self.logical()?;
                    DecodeStage::ReadLength
                }
                DecodeStage::ReadLength => {
                    length = self.logical()? as usize;
                    payload.reserve_exact(length);
                    DecodeStage::ReadPayload
                }
                DecodeStage::ReadPayload => {
                    if payload.len() < length {
                        payload.push(self.logical()?);
                        DecodeStage::ReadPayload
                    } else {
                        DecodeStage::ReadChecksum
                    }
                }
                DecodeStage::ReadChecksum => {
                    self.logical()?;
                    DecodeStage::VerifyChecksum
                }
                DecodeStage::VerifyChecksum => {
                    if !self.sum.is_zero() {
                        return Err(ProtocolError::ChecksumMismatch {
                            residual: self.sum.value(),
                        });
                    }
                    DecodeStage::AwaitDleEnd
                }
                DecodeStage::AwaitDleEnd => {
                    self.expect(stage, DLE)?;
                    DecodeStage::AwaitEtx
                }
                DecodeStage::AwaitEtx => {
                    self.expect(stage, ETX)?;
                    DecodeStage::Done
                }
                DecodeStage::Done => return Packet::new(type_id, payload),
            };
        }
    }
}

/// Outcome of one decode attempt
pub(crate) struct FrameAttempt {
    pub(crate) result: Result<Packet, ProtocolError>,
    /// Physical bytes consumed
    pub(crate) consumed: usize,
    /// Stage the attempt finished or failed in
    pub(crate) stage: DecodeStage,
}

pub(crate) fn decode_frame<F>(next: F) -> FrameAttempt
where
    F: FnMut() -> Result<u8, TransportError>,
{
    let mut reader = FrameReader::new(next);
    let result = reader.run();
    FrameAttempt {
        result,
        consumed: reader.consumed,
        stage: reader.stage,
    }
}

/// Read exactly one packet from the transport.
///
/// Any transport failure aborts the attempt; partial state is dropped.
pub fn read_packet<T: Transport + ?Sized>(transport: &mut T) -> Result<Packet, ProtocolError> {
    let attempt = decode_frame(|| transport.read_byte());
    match &attempt.result {
        Ok(packet) => debug!(
            "received packet type {} ({} payload bytes, {} on wire)",
            packet.type_id(),
            packet.payload().len(),
            attempt.consumed
        ),
        Err(e) => debug!(
            "decode failed {} after {} bytes: {}",
            attempt.stage, attempt.consumed, e
        ),
    }
    attempt.result
}

/// Decode one packet from the front of `data`.
///
/// Returns the packet and the number of bytes it occupied. The buffer is
/// taken as complete, so running out of input mid-frame is
/// [`ProtocolError::Truncated`].
pub fn decode(data: &[u8]) -> Result<(Packet, usize), ProtocolError> {
    let mut bytes = data.iter().copied();
    let attempt = decode_frame(|| bytes.next().ok_or(TransportError::Closed));
    match attempt.result {
        Ok(packet) => Ok((packet, attempt.consumed)),
        Err(ProtocolError::Transport(TransportError::Closed)) => Err(ProtocolError::Truncated {
            stage: attempt.stage,
        }),
        Err(e) => Err(e),
    }
}

/// Offset just past the next `DLE ETX` trailer in `buf`.
///
/// Escaped `DLE DLE` pairs are stepped over. When no trailer is present yet,
/// returns `Err` with the number of bytes that can be dropped without losing a
/// dangling DLE.
pub(crate) fn find_frame_end(buf: &[u8]) -> Result<usize, usize> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == DLE {
            if buf[i + 1] == ETX {
                return Ok(i + 2);
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    if i < buf.len() && buf[i] != DLE {
        i += 1;
    }
    Err(i)
}

/// Consume the rest of a frame whose checksum failed, through its `DLE ETX`
fn skip_frame_tail<T: Transport + ?Sized>(transport: &mut T) -> Result<usize, TransportError> {
    let mut skipped = 0;
    loop {
        let byte = transport.read_byte()?;
        skipped += 1;
        if byte == DLE {
            let pair = transport.read_byte()?;
            skipped += 1;
            if pair == ETX {
                return Ok(skipped);
            }
        }
    }
}

/// Retries the decoder after framing and checksum failures.
///
/// Every failed attempt consumes at least one byte, so repeated attempts scan
/// forward through noise until a valid frame lines up. A checksum failure is
/// detected before the trailer, so the rest of that frame is skipped before
/// retrying. Transport failures are returned immediately.
#[derive(Debug, Clone, Copy)]
pub struct ResyncReader {
    max_attempts: usize,
}

impl ResyncReader {
    /// Create a reader allowing up to `max_attempts` decode attempts per packet
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Maximum decode attempts per packet
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Read the next packet that decodes cleanly
    pub fn read_packet<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
    ) -> Result<Packet, ProtocolError> {
        let mut attempt = 1;
        loop {
            match read_packet(transport) {
                Ok(packet) => return Ok(packet),
                Err(e)
                    if matches!(e.kind(), ErrorKind::Framing | ErrorKind::ChecksumMismatch)
                        && attempt < self.max_attempts =>
                {
                    warn!(
                        "discarding bad frame (attempt {}/{}): {}",
                        attempt, self.max_attempts, e
                    );
                    if e.kind() == ErrorKind::ChecksumMismatch {
                        let skipped = skip_frame_tail(transport)?;
                        trace!("skipped {} trailing bytes of bad frame", skipped);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for ResyncReader {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MemoryTransport;

    const PRODUCT_REQUEST: [u8; 6] = [0x10, 0xFE, 0x00, 0x02, 0x10, 0x03];

    #[test]
    fn test_decode_product_request() {
        let (packet, used) = decode(&PRODUCT_REQUEST).unwrap();
        assert_eq!(packet.type_id(), 254);
        assert!(packet.payload().is_empty());
        assert_eq!(used, 6);
    }

    #[test]
    fn test_decode_escaped_payload() {
        // type 0x22, size 2, payload [DLE, 0x03], checksum
        let sum = 0u8.wrapping_sub(0x22 + 0x02 + 0x10 + 0x03);
        let frame = [DLE, 0x22, 0x02, DLE, DLE, 0x03, sum, DLE, ETX];
        let (packet, used) = decode(&frame).unwrap();
        assert_eq!(packet.payload(), &[DLE, 0x03]);
        assert_eq!(used, frame.len());
    }

    #[test]
    fn test_bad_start_byte() {
        let err = decode(&[0x00, 0xFE]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Framing {
                stage: DecodeStage::AwaitStart,
                expected: DLE,
                found: 0x00
            }
        ));
    }

    #[test]
    fn test_bad_etx() {
        let mut frame = PRODUCT_REQUEST.to_vec();
        frame[5] = 0x04;
        let err = decode(&frame).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Framing {
                stage: DecodeStage::AwaitEtx,
                ..
            }
        ));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut frame = PRODUCT_REQUEST.to_vec();
        frame[3] = 0x03;
        let err = decode(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::ChecksumMismatch { residual: 0x01 }));
    }

    #[test]
    fn test_short_input_is_truncated() {
        let err = decode(&PRODUCT_REQUEST[..4]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                stage: DecodeStage::AwaitDleEnd
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Framing);
    }

    #[test]
    fn test_transport_closed_mid_frame() {
        let mut transport = MemoryTransport::new(PRODUCT_REQUEST[..5].to_vec());
        let err = read_packet(&mut transport).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Transport(TransportError::Closed)
        ));
    }

    #[test]
    fn test_resync_skips_noise() {
        let mut input = vec![0x00, 0x55, 0xAA];
        input.extend_from_slice(&PRODUCT_REQUEST);
        let mut transport = MemoryTransport::new(input);

        let packet = ResyncReader::new(4).read_packet(&mut transport).unwrap();
        assert_eq!(packet.type_id(), 254);
    }

    #[test]
    fn test_resync_after_checksum_failure() {
        let mut input = vec![0x10, 0xFE, 0x00, 0x03, 0x10, 0x03];
        input.extend_from_slice(&PRODUCT_REQUEST);
        let mut transport = MemoryTransport::new(input);

        let packet = ResyncReader::new(8).read_packet(&mut transport).unwrap();
        assert_eq!(packet, Packet::empty(254));
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn test_resync_skips_escaped_tail() {
        // Corrupted length leaves the reader mid-payload, with an escaped DLE ahead
        let mut input = vec![DLE, 0x22, 0x01, 0x05, 0x00, DLE, DLE, 0x42, DLE, ETX];
        input.extend_from_slice(&PRODUCT_REQUEST);
        let mut transport = MemoryTransport::new(input);

        let packet = ResyncReader::new(2).read_packet(&mut transport).unwrap();
        assert_eq!(packet.type_id(), 254);
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn test_find_frame_end() {
        assert_eq!(find_frame_end(&[0x10, 0x03, 0x10, 0xFE]), Ok(2));
        assert_eq!(find_frame_end(&[0x01, DLE, DLE, DLE, ETX]), Ok(5));
        assert_eq!(find_frame_end(&[0x01, 0x02]), Err(2));
        assert_eq!(find_frame_end(&[0x01, DLE]), Err(1));
        assert_eq!(find_frame_end(&[DLE, DLE]), Err(2));
        assert_eq!(find_frame_end(&[]), Err(0));
    }

    #[test]
    fn test_resync_gives_up() {
        let mut transport = MemoryTransport::new(vec![0x00, 0x01, 0x02, 0x03]);
        let err = ResyncReader::new(2).read_packet(&mut transport).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Framing);
    }

    #[test]
    fn test_resync_does_not_retry_transport_errors() {
        let mut transport = MemoryTransport::new(vec![DLE, 0xFE]);
        let err = ResyncReader::default()
            .read_packet(&mut transport)
            .unwrap_err();
        assert!(err.is_transport());
    }
}
