//! Fixed-offset header field readers.
//!
//! Container headers store 32-bit words at fixed byte offsets. These helpers
//! read them respecting the file's byte order.

/// Byte order of a binary container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// Read a u32 at `offset`.
    ///
    /// # Panics
    /// Panics if `bytes` has fewer than `offset + 4` bytes.
    #[inline]
    pub fn read_u32(self, bytes: &[u8], offset: usize) -> u32 {
        let word = [
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(word),
            ByteOrder::BigEndian => u32::from_be_bytes(word),
        }
    }

    #[inline]
    pub fn read_i32(self, bytes: &[u8], offset: usize) -> i32 {
        self.read_u32(bytes, offset) as i32
    }

    #[inline]
    pub fn read_f32(self, bytes: &[u8], offset: usize) -> f32 {
        f32::from_bits(self.read_u32(bytes, offset))
    }

    /// Decode a run of 32-bit floats.
    pub fn read_f32_slice(self, bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| {
                let word = [c[0], c[1], c[2], c[3]];
                match self {
                    ByteOrder::LittleEndian => f32::from_le_bytes(word),
                    ByteOrder::BigEndian => f32::from_be_bytes(word),
                }
            })
            .collect()
    }
}

/// Write a little-endian i32 at `offset`.
#[inline]
pub fn put_i32_le(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Write a little-endian f32 at `offset`.
#[inline]
pub fn put_f32_le(buf: &mut [u8], offset: usize, value: f32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
