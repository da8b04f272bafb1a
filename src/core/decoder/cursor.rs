//! Checked byte cursor used by every characteristic decoder.
//! The only way to pull bytes out of a payload is `take_bytes`, so a read
//! past the end of the buffer surfaces as `DecodeError::BufferTooShort`.

use super::DecodeError;

/// Forward-only reader over a characteristic payload.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Takes the next `n` bytes and advances past them.
    /// On failure the cursor does not move.
    pub fn take_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or(DecodeError::BufferTooShort {
                needed: usize::MAX,
                available: self.buf.len(),
            })?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(DecodeError::BufferTooShort {
                needed: end,
                available: self.buf.len(),
            })?;
        self.pos = end;
        Ok(bytes)
    }

    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take_bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    /// Reads an unsigned 24-bit little-endian value.
    pub fn u24_le(&mut self) -> Result<u32, DecodeError> {
        let [b0, b1, b2] = self.take_array()?;
        Ok(u32::from_le_bytes([b0, b1, b2, 0]))
    }

    pub fn u32_le(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}
