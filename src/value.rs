//! Decoded scalar values and the per-kind reads that produce them.

use crate::ast::{parse_int_literal, Basic, BasicKind};
use crate::cursor::{bytes_to_u64, BitCursor, Endianness};
use crate::decoder::DecodeError;

/// A single decoded scalar element (or a whole char run).
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Unsigned { value: u64, bits: u32 },
    Signed { value: i64, bits: u32 },
    Float(f32),
    Double(f64),
    /// Character units (1, 2 or 8 bytes wide in the buffer).
    Text(Vec<u32>),
}

impl Scalar {
    /// Integer view used for name resolution: floats truncate, text parses a leading integer.
    pub fn as_i64(&self) -> i64 {
        match self {
            Scalar::Unsigned { value, .. } => *value as i64,
            Scalar::Signed { value, .. } => *value,
            Scalar::Float(f) => *f as i64,
            Scalar::Double(d) => *d as i64,
            Scalar::Text(_) => leading_int(&self.text()),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Scalar::Unsigned { value, .. } => *value as f64,
            Scalar::Signed { value, .. } => *value as f64,
            Scalar::Float(f) => *f as f64,
            Scalar::Double(d) => *d,
            Scalar::Text(_) => self.text().trim().parse().unwrap_or(0.0),
        }
    }

    /// Text with trailing NUL units removed; non-scalar units become U+FFFD.
    pub fn text(&self) -> String {
        match self {
            Scalar::Text(units) => {
                let end = units.iter().rposition(|&u| u != 0).map_or(0, |i| i + 1);
                units[..end]
                    .iter()
                    .map(|&u| char::from_u32(u).unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect()
            }
            _ => String::new(),
        }
    }

    /// Compare against a declared literal constraint.
    pub fn matches_literal(&self, literal: &str) -> bool {
        match self {
            Scalar::Unsigned { value, bits } => int_literal_matches(*value, *bits, literal),
            Scalar::Signed { value, bits } => int_literal_matches(*value as u64, *bits, literal),
            Scalar::Float(f) => float_literal(literal).is_some_and(|l| l as f32 == *f),
            Scalar::Double(d) => float_literal(literal).is_some_and(|l| l == *d),
            Scalar::Text(_) => self.text().to_lowercase() == literal.to_lowercase(),
        }
    }
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn int_literal_matches(raw: u64, bits: u32, literal: &str) -> bool {
    match parse_int_literal(literal) {
        Some(n) => (n as u64) & mask(bits) == raw & mask(bits),
        None => false,
    }
}

fn float_literal(literal: &str) -> Option<f64> {
    literal
        .trim()
        .parse::<f64>()
        .ok()
        .or_else(|| parse_int_literal(literal).map(|n| n as f64))
}

fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    let n = digits[..end].parse::<i64>().unwrap_or(0);
    if neg {
        -n
    } else {
        n
    }
}

fn sign_extend(raw: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return raw as i64;
    }
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

/// Collapse nibble storage: each raw byte contributes its low nibble, pairs form one byte
/// (`first | second << 4`). A trailing odd byte becomes a byte of its own.
pub fn denibble(raw: &[u8]) -> Vec<u8> {
    raw.chunks(2)
        .map(|pair| match pair {
            [lo, hi] => (lo & 0x0f) | ((hi & 0x0f) << 4),
            [lo] => lo & 0x0f,
            _ => 0,
        })
        .collect()
}

/// Read one Integer, Float or Nibble element at the (already aligned) cursor.
pub fn read_number(cursor: &mut BitCursor, basic: &Basic, endianness: Endianness) -> Result<Scalar, DecodeError> {
    let bits = basic.value_bits();
    match basic.kind {
        BasicKind::Integer => {
            let raw = if basic.is_bitfield() {
                cursor.read_bits(basic.bit_width as u32)?
            } else {
                cursor.read_uint(basic.byte_width as usize, endianness)?
            };
            Ok(if basic.signed {
                Scalar::Signed { value: sign_extend(raw, bits), bits }
            } else {
                Scalar::Unsigned { value: raw, bits }
            })
        }
        BasicKind::Float => {
            let raw = cursor.read_uint(basic.byte_width as usize, endianness)?;
            Ok(if basic.byte_width == 4 {
                Scalar::Float(f32::from_bits(raw as u32))
            } else {
                Scalar::Double(f64::from_bits(raw))
            })
        }
        BasicKind::Nibble => {
            let raw = cursor.read_bytes(basic.byte_width as usize)?;
            let value = bytes_to_u64(&denibble(raw), endianness);
            Ok(Scalar::Unsigned { value, bits })
        }
        BasicKind::Char | BasicKind::StrZ => read_chars(cursor, basic, 1, endianness),
    }
}

/// Read `count` character units of `basic.byte_width` bytes each.
pub fn read_chars(cursor: &mut BitCursor, basic: &Basic, count: usize, endianness: Endianness) -> Result<Scalar, DecodeError> {
    let unit = basic.byte_width.max(1) as usize;
    let bytes = count.checked_mul(unit).ok_or(DecodeError::InsufficientData {
        offset: cursor.byte_offset(),
        needed_bits: u64::MAX,
    })?;
    let raw = cursor.read_bytes(bytes)?;
    Ok(Scalar::Text(units_of(raw, unit, endianness)))
}

/// Read a NUL-terminated run. Consumes the terminator when present; an unterminated run
/// ends at the end of the buffer.
pub fn read_strz(cursor: &mut BitCursor, basic: &Basic, endianness: Endianness) -> Result<Scalar, DecodeError> {
    let unit = basic.byte_width.max(1) as usize;
    let body = cursor.peek_until_nul(unit);
    cursor.seek_bytes(body.len())?;
    let terminated = cursor.remaining_bytes() >= unit;
    if terminated {
        cursor.seek_bytes(unit)?;
    } else {
        cursor.seek_bytes(cursor.remaining_bytes())?;
    }
    Ok(Scalar::Text(units_of(body, unit, endianness)))
}

fn units_of(raw: &[u8], unit: usize, endianness: Endianness) -> Vec<u32> {
    raw.chunks_exact(unit)
        .map(|c| bytes_to_u64(c, endianness) as u32)
        .collect()
}
