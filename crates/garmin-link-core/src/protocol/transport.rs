//! Byte-stream transports
//!
//! The codec only needs blocking single-byte reads and blocking whole-buffer
//! writes. Timeouts and device configuration belong to the transport.

use serialport::SerialPort;
use std::collections::VecDeque;
use std::io::{self, Read, Write};

use tracing::trace;

use super::TransportError;

/// A bidirectional byte stream owned exclusively for one encode/decode call
pub trait Transport {
    /// Read one physical byte, blocking according to the transport's timeout policy
    fn read_byte(&mut self) -> Result<u8, TransportError>;

    /// Write the full buffer
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read at least `min_bytes` bytes
    fn read_bytes(&mut self, min_bytes: usize) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::with_capacity(min_bytes);
        while out.len() < min_bytes {
            out.push(self.read_byte()?);
        }
        Ok(out)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read_byte(&mut self) -> Result<u8, TransportError> {
        (**self).read_byte()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write_all(bytes)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read_byte(&mut self) -> Result<u8, TransportError> {
        (**self).read_byte()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write_all(bytes)
    }
}

const READ_CHUNK: usize = 64;

/// Adapter from any blocking `Read + Write` stream.
///
/// Physical reads are batched into a small buffer; the codec still sees one
/// byte at a time.
pub struct IoTransport<S> {
    stream: S,
    buf: [u8; READ_CHUNK],
    pos: usize,
    len: usize,
}

/// Transport over a serial port opened with [`super::serial::open_port`]
pub type SerialTransport = IoTransport<Box<dyn SerialPort>>;

impl<S: Read + Write> IoTransport<S> {
    /// Wrap a stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: [0u8; READ_CHUNK],
            pos: 0,
            len: 0,
        }
    }

    /// Borrow the underlying stream
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Mutably borrow the underlying stream
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Bytes read from the stream but not yet handed to the codec
    pub fn buffered(&self) -> usize {
        self.len - self.pos
    }

    /// Drop any buffered input
    pub fn discard_buffered(&mut self) {
        self.pos = 0;
        self.len = 0;
    }

    /// Unwrap the stream, dropping buffered input
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn fill(&mut self) -> Result<(), TransportError> {
        loop {
            match self.stream.read(&mut self.buf) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => {
                    trace!("rx {:02x?}", &self.buf[..n]);
                    self.pos = 0;
                    self.len = n;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_io_error(e)),
            }
        }
    }
}

impl<S: Read + Write> Transport for IoTransport<S> {
    fn read_byte(&mut self) -> Result<u8, TransportError> {
        if self.pos == self.len {
            self.fill()?;
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        trace!("tx {:02x?}", bytes);
        self.stream.write_all(bytes).map_err(map_io_error)?;
        self.stream.flush().map_err(map_io_error)
    }
}

fn map_io_error(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
        io::ErrorKind::UnexpectedEof => TransportError::Closed,
        _ => TransportError::Io(e),
    }
}

/// In-memory transport with scripted input and captured output
#[derive(Debug, Default)]
pub struct MemoryTransport {
    input: VecDeque<u8>,
    output: Vec<u8>,
    fail_writes: bool,
}

impl MemoryTransport {
    /// Create a transport that will yield `input` and then report [`TransportError::Closed`]
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            input: input.into(),
            output: Vec::new(),
            fail_writes: false,
        }
    }

    /// Queue more bytes to be read
    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Everything written so far
    pub fn written(&self) -> &[u8] {
        &self.output
    }

    /// Take and clear the captured output
    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Unread input bytes
    pub fn remaining(&self) -> usize {
        self.input.len()
    }
}

impl Transport for MemoryTransport {
    fn read_byte(&mut self) -> Result<u8, TransportError> {
        self.input.pop_front().ok_or(TransportError::Closed)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.fail_writes {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write failed",
            )));
        }
        self.output.extend_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Read side scripted, write side captured
    struct Scripted {
        reads: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_io_transport_batches_reads() {
        let mut t = IoTransport::new(Cursor::new(vec![1u8, 2, 3]));
        assert_eq!(t.read_byte().unwrap(), 1);
        assert_eq!(t.buffered(), 2);
        assert_eq!(t.read_bytes(2).unwrap(), vec![2, 3]);
        assert!(matches!(t.read_byte(), Err(TransportError::Closed)));
    }

    #[test]
    fn test_io_transport_discard_and_rewind() {
        let mut t = IoTransport::new(Cursor::new(vec![1u8, 2, 3]));
        assert_eq!(t.read_byte().unwrap(), 1);
        t.discard_buffered();
        assert_eq!(t.buffered(), 0);
        assert!(matches!(t.read_byte(), Err(TransportError::Closed)));

        t.get_mut().set_position(1);
        assert_eq!(t.read_byte().unwrap(), 2);
        assert_eq!(t.buffered(), 1);
    }

    #[test]
    fn test_io_transport_maps_errors() {
        let mut t = IoTransport::new(Scripted {
            reads: VecDeque::from(vec![
                Err(io::Error::new(io::ErrorKind::Interrupted, "signal")),
                Ok(vec![7]),
                Err(io::Error::new(io::ErrorKind::TimedOut, "timeout")),
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
            ]),
            written: Vec::new(),
        });

        assert_eq!(t.read_byte().unwrap(), 7);
        assert!(matches!(t.read_byte(), Err(TransportError::Timeout)));
        assert!(matches!(t.read_byte(), Err(TransportError::Io(_))));
    }

    #[test]
    fn test_io_transport_write() {
        let mut t = IoTransport::new(Scripted {
            reads: VecDeque::new(),
            written: Vec::new(),
        });
        t.write_all(&[0x10, 0x03]).unwrap();
        assert_eq!(t.get_ref().written, vec![0x10, 0x03]);
    }

    #[test]
    fn test_memory_transport() {
        let mut t = MemoryTransport::new(vec![9]);
        t.push_input(&[8]);
        assert_eq!(t.read_bytes(2).unwrap(), vec![9, 8]);
        assert!(matches!(t.read_byte(), Err(TransportError::Closed)));

        t.write_all(b"ok").unwrap();
        assert_eq!(t.take_written(), b"ok".to_vec());

        t.fail_writes(true);
        assert!(t.write_all(b"x").is_err());
        assert!(t.written().is_empty());
    }
}
