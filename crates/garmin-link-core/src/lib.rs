//! # Garmin Link Core Library
//!
//! Serial-link packet protocol for Garmin GPS devices.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Packet encoding with DLE byte-stuffing and two's-complement checksums
//! - A single-attempt framing decoder plus an optional resynchronizing reader
//! - A tokio codec for async serial streams
//! - Transports over serial ports, generic byte streams and memory
//! - A packet session with ACK/NAK handling and the product query
//!
//! ## Example
//!
//! ```rust,ignore
//! use garmin_link_core::{config::LinkConfig, protocol::{open_transport, Link}};
//!
//! let config = LinkConfig::for_port("/dev/cu.usbserial");
//! let mut link = Link::with_config(open_transport(&config)?, &config);
//!
//! let product = link.request_product_data()?;
//! println!("Device: {}", product.description());
//! ```

pub mod config;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::LinkConfig;
    pub use crate::protocol::{
        ErrorKind, GarminCodec, Link, Packet, PacketBuilder, PacketId, ProductData,
        ProtocolError, Transport, TransportError,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
