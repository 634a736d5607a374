//! Frame checksum
//!
//! One-byte two's-complement sum over the type, size and payload bytes.
//! Absorbing the transmitted checksum on top of the same bytes must bring the
//! accumulator back to zero.

/// Running 8-bit modular sum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum {
    sum: u8,
}

impl Checksum {
    /// Create an accumulator starting at zero
    pub fn new() -> Self {
        Self { sum: 0 }
    }

    /// Reset the accumulator to zero
    pub fn reset(&mut self) {
        self.sum = 0;
    }

    /// Add one byte, discarding carries
    pub fn absorb(&mut self, byte: u8) {
        self.sum = self.sum.wrapping_add(byte);
    }

    /// Add every byte of a slice
    pub fn absorb_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.absorb(b);
        }
    }

    /// The checksum byte to transmit: `(0 - sum) mod 256`
    pub fn finalize(&self) -> u8 {
        self.sum.wrapping_neg()
    }

    /// Current raw sum
    pub fn value(&self) -> u8 {
        self.sum
    }

    /// True when the accumulator is exactly zero
    pub fn is_zero(&self) -> bool {
        self.sum == 0
    }
}
