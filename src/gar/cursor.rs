//! Bounds-checked sequential reader over an in-memory buffer.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::error::{GarError, GarResult};

/// Sequential reader over a borrowed byte buffer.
///
/// Every read checks the remaining length first, so a short read fails
/// with [`GarError::TruncatedInput`] and leaves the position untouched.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    inner: Cursor<&'a [u8]>,
    /// Offset of `inner`'s first byte within the enclosing container, for error reports.
    base: u64,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    /// Create a cursor whose reported offsets start at `base`.
    ///
    /// Used when walking a slice that was itself cut out of a larger
    /// buffer, so truncation errors still point into the original file.
    pub fn with_base(data: &'a [u8], base: u64) -> Self {
        Self {
            inner: Cursor::new(data),
            base,
        }
    }

    /// Position relative to the start of this cursor's slice.
    pub fn position(&self) -> usize {
        self.inner.position() as usize
    }

    /// Position relative to the start of the enclosing container.
    pub fn offset(&self) -> u64 {
        self.base + self.inner.position()
    }

    pub fn remaining(&self) -> usize {
        self.inner.get_ref().len().saturating_sub(self.position())
    }

    pub fn at_end(&self) -> bool {
        self.remaining() == 0
    }

    fn truncated(&self, needed: usize) -> GarError {
        GarError::TruncatedInput {
            offset: self.offset(),
            needed: needed as u64,
            remaining: self.remaining() as u64,
        }
    }

    fn ensure(&self, needed: usize) -> GarResult<()> {
        if self.remaining() < needed {
            return Err(self.truncated(needed));
        }
        Ok(())
    }

    pub fn read_u16_be(&mut self) -> GarResult<u16> {
        self.ensure(2)?;
        self.inner
            .read_u16::<BigEndian>()
            .map_err(|_| self.truncated(2))
    }

    pub fn read_u32_be(&mut self) -> GarResult<u32> {
        self.ensure(4)?;
        self.inner
            .read_u32::<BigEndian>()
            .map_err(|_| self.truncated(4))
    }

    pub fn read_u32_le(&mut self) -> GarResult<u32> {
        self.ensure(4)?;
        self.inner
            .read_u32::<LittleEndian>()
            .map_err(|_| self.truncated(4))
    }

    /// Borrow the next `n` bytes without copying.
    pub fn read_bytes(&mut self, n: usize) -> GarResult<&'a [u8]> {
        self.ensure(n)?;
        let start = self.position();
        let data: &'a [u8] = *self.inner.get_ref();
        self.inner.set_position((start + n) as u64);
        Ok(&data[start..start + n])
    }

    /// Borrow everything that has not been read yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let n = self.remaining();
        let start = self.position();
        let data: &'a [u8] = *self.inner.get_ref();
        self.inner.set_position((start + n) as u64);
        &data[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_and_little_endian() {
        let data = [0x00, 0x0c, 0xca, 0xbc, 0xab, 0x01, 0x64, 0x00, 0x00, 0x00];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_u16_be().unwrap(), 12);
        assert_eq!(cursor.read_u32_be().unwrap(), 0xcabcab01);
        assert_eq!(cursor.read_u32_le().unwrap(), 100);
        assert!(cursor.at_end());
    }

    #[test]
    fn short_read_reports_offset_and_does_not_advance() {
        let data = [1, 2, 3, 4, 5, 6];
        let mut cursor = ByteCursor::with_base(&data, 100);
        cursor.read_bytes(4).unwrap();

        match cursor.read_u32_be() {
            Err(GarError::TruncatedInput {
                offset,
                needed,
                remaining,
            }) => {
                assert_eq!(offset, 104);
                assert_eq!(needed, 4);
                assert_eq!(remaining, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(cursor.remaining(), 2);
        assert_eq!(cursor.read_bytes(2).unwrap(), &[5, 6]);
    }

    #[test]
    fn read_bytes_borrows_from_the_buffer() {
        let data = b"abcdef".to_vec();
        let mut cursor = ByteCursor::new(&data);
        let head = cursor.read_bytes(2).unwrap();
        let tail = cursor.rest();
        assert_eq!(head, b"ab");
        assert_eq!(tail, b"cdef");
        assert!(cursor.at_end());
        assert_eq!(cursor.read_bytes(0).unwrap(), b"");
    }
}
