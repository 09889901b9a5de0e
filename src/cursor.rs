//! Bit-addressable read position over a byte buffer.
//!
//! A [`BitCursor`] is `Copy`: the specialization matcher takes a copy to peek ahead without
//! disturbing the decoder's real position.

use crate::ast::Basic;
use crate::decoder::DecodeError;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Byte order for whole-width multi-byte values. Bitfields are always read MSB-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    Big,
    #[default]
    Little,
}

#[derive(Debug, Clone, Copy)]
pub struct BitCursor<'a> {
    data: &'a [u8],
    pos: usize,
    bit: u8,
}

impl<'a> BitCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitCursor { data, pos: 0, bit: 0 }
    }

    /// Cursor at an absolute bit position (clamped to the end of `data`).
    pub fn at_bit(data: &'a [u8], bit_pos: u64) -> Self {
        let pos = ((bit_pos / 8) as usize).min(data.len());
        let bit = if pos == data.len() { 0 } else { (bit_pos % 8) as u8 };
        BitCursor { data, pos, bit }
    }

    pub fn byte_offset(&self) -> usize {
        self.pos
    }

    pub fn bit_offset(&self) -> u8 {
        self.bit
    }

    pub fn bit_position(&self) -> u64 {
        self.pos as u64 * 8 + self.bit as u64
    }

    pub fn is_aligned(&self) -> bool {
        self.bit == 0
    }

    /// Bytes not yet fully consumed (a partially read byte still counts).
    pub fn remaining_bytes(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn remaining_bits(&self) -> u64 {
        self.remaining_bytes() as u64 * 8 - self.bit as u64
    }

    /// Move to the next byte boundary before a whole-width read.
    pub fn align_for(&mut self, basic: &Basic) -> Result<(), DecodeError> {
        if basic.is_bitfield() || self.bit == 0 {
            return Ok(());
        }
        self.pos += 1;
        self.bit = 0;
        if self.pos >= self.data.len() {
            return Err(DecodeError::InsufficientData { offset: self.pos, needed_bits: basic.element_bits() });
        }
        Ok(())
    }

    /// Read `bits` bits MSB-first, crossing byte boundaries as needed.
    pub fn read_bits(&mut self, bits: u32) -> Result<u64, DecodeError> {
        debug_assert!(bits <= 64);
        if (bits as u64) > self.remaining_bits() {
            return Err(DecodeError::InsufficientData { offset: self.pos, needed_bits: bits as u64 });
        }
        let mut out = 0u64;
        let mut left = bits;
        while left > 0 {
            let avail = 8 - self.bit as u32;
            let take = avail.min(left);
            let shift = avail - take;
            let chunk = (self.data[self.pos] >> shift) & (((1u16 << take) - 1) as u8);
            out = (out << take) | chunk as u64;
            left -= take;
            self.bit += take as u8;
            if self.bit == 8 {
                self.bit = 0;
                self.pos += 1;
            }
        }
        Ok(out)
    }

    /// Borrow `n` whole bytes at the current (byte-aligned) position.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        debug_assert!(self.is_aligned());
        if n > self.remaining_bytes() {
            return Err(DecodeError::InsufficientData { offset: self.pos, needed_bits: (n as u64).saturating_mul(8) });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Whole-width unsigned read of `n` bytes (1..=8) in the given byte order.
    pub fn read_uint(&mut self, n: usize, endianness: Endianness) -> Result<u64, DecodeError> {
        let buf = self.read_bytes(n)?;
        Ok(bytes_to_u64(buf, endianness))
    }

    /// Bytes up to the next `unit`-wide zero unit; the cursor is not moved.
    pub fn peek_until_nul(&self, unit: usize) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        let mut end = 0;
        while end + unit <= rest.len() {
            if rest[end..end + unit].iter().all(|&b| b == 0) {
                break;
            }
            end += unit;
        }
        &rest[..end.min(rest.len())]
    }

    /// Advance past one element of `basic`.
    pub fn seek(&mut self, basic: &Basic) -> Result<(), DecodeError> {
        if basic.is_bitfield() {
            self.seek_bits(basic.bit_width as u64)
        } else {
            self.seek_bytes(basic.byte_width as usize)
        }
    }

    pub fn seek_bytes(&mut self, n: usize) -> Result<(), DecodeError> {
        debug_assert!(self.is_aligned());
        if n > self.remaining_bytes() {
            return Err(DecodeError::InsufficientData { offset: self.pos, needed_bits: (n as u64).saturating_mul(8) });
        }
        self.pos += n;
        Ok(())
    }

    pub fn seek_bits(&mut self, n: u64) -> Result<(), DecodeError> {
        if n > self.remaining_bits() {
            return Err(DecodeError::InsufficientData { offset: self.pos, needed_bits: n });
        }
        let total = self.bit as u64 + n;
        self.pos += (total / 8) as usize;
        self.bit = (total % 8) as u8;
        Ok(())
    }
}

/// Interpret up to 8 bytes as an unsigned integer.
pub fn bytes_to_u64(buf: &[u8], endianness: Endianness) -> u64 {
    match (buf.len(), endianness) {
        (0, _) => 0,
        (1, _) => buf[0] as u64,
        (2, Endianness::Big) => BigEndian::read_u16(buf) as u64,
        (2, Endianness::Little) => LittleEndian::read_u16(buf) as u64,
        (4, Endianness::Big) => BigEndian::read_u32(buf) as u64,
        (4, Endianness::Little) => LittleEndian::read_u32(buf) as u64,
        (n, Endianness::Big) => BigEndian::read_uint(buf, n.min(8)),
        (n, Endianness::Little) => LittleEndian::read_uint(buf, n.min(8)),
    }
}
