//! Tokio codec for link frames
//!
//! Runs the same decoder over buffered bytes so packets can be read from a
//! `tokio-serial` stream with `FramedRead`/`Framed`.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::decoder::{decode_frame, find_frame_end};
use super::{Packet, ProtocolError, TransportError};

/// Codec for encoding/decoding link frames
///
/// After a checksum failure the rest of the rejected frame is dropped, so the
/// next call starts on a frame boundary. Keep the codec (for example through
/// `FramedRead::into_parts`/`from_parts`) to keep decoding after an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct GarminCodec {
    /// Still inside the tail of a frame that failed its checksum
    skipping_tail: bool,
}

impl GarminCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop bytes up to the end of a rejected frame. False if more input is needed.
    fn skip_tail(&mut self, src: &mut BytesMut) -> bool {
        match find_frame_end(&src[..]) {
            Ok(end) => {
                src.advance(end);
                self.skipping_tail = false;
                true
            }
            Err(dropped) => {
                src.advance(dropped);
                self.skipping_tail = true;
                false
            }
        }
    }
}

impl Decoder for GarminCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.skipping_tail && !self.skip_tail(src) {
            return Ok(None);
        }
        if src.is_empty() {
            return Ok(None);
        }

        let attempt = {
            let mut bytes = src.iter().copied();
            decode_frame(|| bytes.next().ok_or(TransportError::Closed))
        };

        match attempt.result {
            Ok(packet) => {
                src.advance(attempt.consumed);
                Ok(Some(packet))
            }
            // Frame not complete yet; leave the bytes for the next call
            Err(ProtocolError::Transport(TransportError::Closed)) => Ok(None),
            Err(e) => {
                src.advance(attempt.consumed);
                if matches!(e, ProtocolError::ChecksumMismatch { .. }) {
                    self.skip_tail(src);
                }
                Err(e)
            }
        }
    }
}

impl Encoder<Packet> for GarminCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<&Packet>::encode(self, &item, dst)
    }
}

impl<'a> Encoder<&'a Packet> for GarminCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &'a Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = item.encode();
        dst.reserve(frame.len());
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = GarminCodec::new();
        let mut buf = BytesMut::from(&[0x10u8, 0xFE, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        buf.extend_from_slice(&[0x02, 0x10, 0x03]);
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.type_id(), 0xFE);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut codec = GarminCodec::new();
        let mut buf = BytesMut::new();
        let first = Packet::new(1, vec![0x10, 0x10]).unwrap();
        let second = Packet::empty(2);
        codec.encode(&first, &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_checksum_failure_drops_rest_of_frame() {
        let mut codec = GarminCodec::new();
        let mut buf = BytesMut::from(
            &[0x10u8, 0xFE, 0x00, 0x03, 0x10, 0x03, 0x10, 0xFE, 0x00, 0x02, 0x10, 0x03][..],
        );
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::ChecksumMismatch { residual: 0x01 }));
        assert_eq!(buf.len(), 6);

        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet, Packet::empty(0xFE));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_checksum_failure_with_tail_in_next_read() {
        let mut codec = GarminCodec::new();
        let mut buf = BytesMut::from(&[0x10u8, 0xFE, 0x00, 0x03, 0x10][..]);
        assert!(codec.decode(&mut buf).is_err());
        // The dangling DLE is kept until its partner arrives
        assert_eq!(&buf[..], &[0x10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x03, 0x10, 0xFE, 0x00, 0x02, 0x10, 0x03]);
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.type_id(), 0xFE);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_garbage_is_consumed_with_error() {
        let mut codec = GarminCodec::new();
        let mut buf = BytesMut::from(&[0x55u8, 0x10, 0xFE, 0x00, 0x02, 0x10, 0x03][..]);
        assert!(codec.decode(&mut buf).is_err());
        assert_eq!(buf.len(), 6);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }
}
