//! Little-endian readers over byte slices for the binary workbook formats.

/// Fixed-width little-endian reads from the start of a byte slice.
///
/// Callers guarantee the slice is long enough; record readers check lengths
/// before they hand a slice over.
pub(crate) trait LittleEndian {
    fn le_u16(&self) -> u16;
    fn le_u32(&self) -> u32;
    fn le_u64(&self) -> u64;
    fn le_f64(&self) -> f64;

    /// Reads a 32-bit value widened to `usize`.
    fn le_usize(&self) -> usize {
        self.le_u32() as usize
    }
}

impl LittleEndian for [u8] {
    #[inline]
    fn le_u16(&self) -> u16 {
        u16::from_le_bytes([self[0], self[1]])
    }

    #[inline]
    fn le_u32(&self) -> u32 {
        u32::from_le_bytes([self[0], self[1], self[2], self[3]])
    }

    #[inline]
    fn le_u64(&self) -> u64 {
        let mut buffer = [0u8; 8];
        buffer.copy_from_slice(&self[..8]);
        u64::from_le_bytes(buffer)
    }

    #[inline]
    fn le_f64(&self) -> f64 {
        f64::from_bits(self.le_u64())
    }
}

/// Splits a byte slice into consecutive 32-bit words (sector tables, id chains).
pub(crate) fn words(bytes: &[u8]) -> impl ExactSizeIterator<Item = usize> + '_ {
    bytes.chunks_exact(4).map(|chunk| chunk.le_usize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_values() {
        let bytes = [0x34u8, 0x12, 0x00, 0x00, 0x00, 0x00, 0xF0, 0x3F];
        assert_eq!(bytes.le_u16(), 0x1234);
        assert_eq!(bytes.le_u32(), 0x1234);
        assert_eq!(bytes.le_f64(), f64::from_bits(0x3FF0_0000_0000_1234));
    }

    #[test]
    fn words_ignore_trailing_bytes() {
        let bytes = [1u8, 0, 0, 0, 2, 0, 0, 0, 9];
        assert_eq!(words(&bytes).collect::<Vec<_>>(), vec![1, 2]);
    }
}
