//! Protocol errors

use thiserror::Error;

use super::decoder::DecodeStage;

/// Failures of the byte stream underneath the codec
#[derive(Error, Debug)]
pub enum TransportError {
    /// No byte arrived within the transport's timeout
    #[error("Read timed out")]
    Timeout,

    /// The stream reached end of input
    #[error("Stream closed")]
    Closed,

    /// Serial port driver failure
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serialport::Error> for TransportError {
    fn from(e: serialport::Error) -> Self {
        TransportError::Serial(e.to_string())
    }
}

/// Errors that can occur while encoding, decoding or exchanging packets
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload does not fit the one-byte size field
    #[error("Payload too large: {len} bytes (max 255)")]
    PayloadTooLarge {
        /// Requested payload length
        len: usize,
    },

    /// A delimiter byte was not where the frame layout puts it
    #[error("Framing error while {stage}: expected {expected:#04x}, got {found:#04x}")]
    Framing {
        /// Decoder stage that rejected the byte
        stage: DecodeStage,
        /// Delimiter the stage was waiting for
        expected: u8,
        /// Byte actually read
        found: u8,
    },

    /// An in-memory buffer ended mid-frame
    #[error("Frame truncated while {stage}")]
    Truncated {
        /// Stage the decoder had reached
        stage: DecodeStage,
    },

    /// Type, size, payload and checksum did not sum to zero
    #[error("Checksum mismatch: residual sum {residual:#04x}")]
    ChecksumMismatch {
        /// Sum left over after absorbing the checksum byte
        residual: u8,
    },

    /// The underlying byte stream failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The device answered with a different packet than the exchange expects
    #[error("Unexpected packet: expected type {expected}, got {found}")]
    UnexpectedPacket {
        /// Packet type the exchange was waiting for
        expected: u8,
        /// Packet type received
        found: u8,
    },

    /// The device answered with a NAK
    #[error("Device rejected packet type {type_id}")]
    Nak {
        /// Type of the rejected packet
        type_id: u8,
    },

    /// A payload could not be parsed
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Invalid or unreadable link configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Transport(TransportError::Io(e))
    }
}

/// Coarse classification of a [`ProtocolError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// [`ProtocolError::PayloadTooLarge`]
    PayloadTooLarge,
    /// Bad delimiters or a truncated buffer
    Framing,
    /// [`ProtocolError::ChecksumMismatch`]
    ChecksumMismatch,
    /// The byte stream failed or ran dry
    Transport,
    /// Errors raised above the framing layer (ACK/NAK, payload parsing, config)
    Session,
}

impl ProtocolError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            ProtocolError::Framing { .. } | ProtocolError::Truncated { .. } => {
                ErrorKind::Framing
            }
            ProtocolError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            ProtocolError::Transport(_) => ErrorKind::Transport,
            ProtocolError::UnexpectedPacket { .. }
            | ProtocolError::Nak { .. }
            | ProtocolError::InvalidPayload(_)
            | ProtocolError::Config(_) => ErrorKind::Session,
        }
    }

    /// True if the stream ran dry or timed out, as opposed to carrying bad bytes
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}
