//! Fixed-capacity bit buffer
//!
//! `BitString` is the storage substrate for every cell payload: a
//! cursor-addressed sequence of bits with an independent write cursor and
//! read cursor. Writes never grow past the declared capacity and reads never
//! advance past the committed bits; both report an error instead.

use std::fmt;

use num_bigint::{BigInt, BigUint, Sign};

use crate::error::{CellError, Result};

/// Maximum number of bits a single cell can store.
pub const MAX_CELL_BITS: usize = 1023;

/// Returns the bit at `idx` counting from the most significant bit of `data[0]`.
pub(crate) fn bit_at(data: &[u8], idx: usize) -> bool {
    (data[idx / 8] >> (7 - idx % 8)) & 1 == 1
}

/// Sets the bit at `idx` counting from the most significant bit of `data[0]`.
pub(crate) fn set_bit(data: &mut [u8], idx: usize) {
    data[idx / 8] |= 1 << (7 - idx % 8);
}

/// Copies `len` bits starting at `offset` into a fresh MSB-aligned buffer.
pub(crate) fn copy_bits(src: &[u8], offset: usize, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len.div_ceil(8)];
    for i in 0..len {
        if bit_at(src, offset + i) {
            set_bit(&mut out, i);
        }
    }
    out
}

/// Reads `len <= 64` bits starting at `offset` as a big-endian unsigned value.
pub(crate) fn extract_uint(src: &[u8], offset: usize, len: usize) -> u64 {
    debug_assert!(len <= 64);
    let mut value = 0u64;
    for i in 0..len {
        value = (value << 1) | bit_at(src, offset + i) as u64;
    }
    value
}

/// A bit sequence with a fixed capacity, a write cursor and a read cursor.
#[derive(Debug, Clone)]
pub struct BitString {
    data: Vec<u8>,
    cap: usize,
    len: usize,
    pos: usize,
}

impl BitString {
    /// Creates an empty buffer with the standard cell capacity of 1023 bits.
    pub fn new() -> Self {
        Self::with_capacity(MAX_CELL_BITS)
    }

    /// Creates an empty buffer with an explicit capacity in bits.
    ///
    /// Capacities above 1023 are allowed for staging buffers; the cell limit
    /// is enforced separately when a builder freezes its contents.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            data: vec![0u8; cap.div_ceil(8)],
            cap,
            len: 0,
            pos: 0,
        }
    }

    /// Wraps data whose length is known to cover `bit_len` bits.
    pub(crate) fn frozen(data: Vec<u8>, bit_len: usize) -> Self {
        debug_assert!(data.len() >= bit_len.div_ceil(8));
        let cap = bit_len.max(data.len() * 8);
        Self {
            data,
            cap,
            len: bit_len,
            pos: 0,
        }
    }

    /// Wraps already committed data, e.g. a frozen cell payload.
    pub fn from_data(data: Vec<u8>, bit_len: usize) -> Result<Self> {
        if data.len() < bit_len.div_ceil(8) {
            return Err(CellError::BitsUnderflow {
                requested: bit_len,
                available: data.len() * 8,
            });
        }
        let cap = bit_len.max(data.len() * 8);
        Ok(Self {
            data,
            cap,
            len: bit_len,
            pos: 0,
        })
    }

    /// Number of committed bits.
    pub fn used_bits(&self) -> usize {
        self.len
    }

    /// Number of bits still writable.
    pub fn free_bits(&self) -> usize {
        self.cap - self.len
    }

    /// Number of bytes needed to hold the committed bits.
    pub fn used_bytes(&self) -> usize {
        self.len.div_ceil(8)
    }

    /// Total capacity in bits.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Committed data, last byte zero-padded.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.used_bytes()]
    }

    /// Number of bits between the read cursor and the write cursor.
    pub fn remaining_bits(&self) -> usize {
        self.len - self.pos
    }

    /// Moves the read cursor back to the first bit.
    pub fn reset_read(&mut self) {
        self.pos = 0;
    }

    fn check_write(&self, bits: usize) -> Result<()> {
        if bits > self.free_bits() {
            return Err(CellError::BitsOverflow {
                requested: bits,
                available: self.free_bits(),
            });
        }
        Ok(())
    }

    fn check_read(&self, bits: usize) -> Result<()> {
        if bits > self.remaining_bits() {
            return Err(CellError::BitsUnderflow {
                requested: bits,
                available: self.remaining_bits(),
            });
        }
        Ok(())
    }

    /// Writes a single bit.
    pub fn write_bit(&mut self, bit: bool) -> Result<()> {
        self.check_write(1)?;
        if bit {
            set_bit(&mut self.data, self.len);
        }
        self.len += 1;
        Ok(())
    }

    /// Writes the first `bit_len` bits of `bits`, MSB first.
    pub fn write_bits(&mut self, bits: &[u8], bit_len: usize) -> Result<()> {
        self.check_write(bit_len)?;
        if bits.len() < bit_len.div_ceil(8) {
            return Err(CellError::BitsUnderflow {
                requested: bit_len,
                available: bits.len() * 8,
            });
        }
        for i in 0..bit_len {
            if bit_at(bits, i) {
                set_bit(&mut self.data, self.len);
            }
            self.len += 1;
        }
        Ok(())
    }

    /// Writes whole bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_bits(bytes, bytes.len() * 8)
    }

    /// Appends the committed bits of another buffer, bit for bit.
    pub fn write_bit_string(&mut self, other: &BitString) -> Result<()> {
        self.write_bits(other.data(), other.used_bits())
    }

    /// Writes a bit string given as '0'/'1' text.
    pub fn write_bits_str(&mut self, s: &str) -> Result<()> {
        for c in s.chars() {
            match c {
                '0' => self.write_bit(false)?,
                '1' => self.write_bit(true)?,
                _ => return Err(CellError::InvalidHex),
            }
        }
        Ok(())
    }

    /// Writes an unsigned value in exactly `bits` bits, big-endian.
    pub fn write_uint(&mut self, value: u64, bits: usize) -> Result<()> {
        if bits > 64 || (bits < 64 && value >> bits != 0) {
            return Err(CellError::IntOutOfRange { bits });
        }
        self.check_write(bits)?;
        for i in (0..bits).rev() {
            self.write_bit((value >> i) & 1 == 1)?;
        }
        Ok(())
    }

    /// Writes a signed value in exactly `bits` bits, two's complement.
    pub fn write_int(&mut self, value: i64, bits: usize) -> Result<()> {
        if bits == 0 || bits > 64 {
            return Err(CellError::IntOutOfRange { bits });
        }
        if bits < 64 {
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            if value < min || value > max {
                return Err(CellError::IntOutOfRange { bits });
            }
        }
        let unsigned = if bits < 64 {
            (value as u64) & ((1u64 << bits) - 1)
        } else {
            value as u64
        };
        self.write_uint(unsigned, bits)
    }

    /// Writes an arbitrary-precision unsigned value in exactly `bits` bits.
    pub fn write_big_uint(&mut self, value: &BigUint, bits: usize) -> Result<()> {
        if value.bits() as usize > bits {
            return Err(CellError::IntOutOfRange { bits });
        }
        self.check_write(bits)?;
        let bytes = value.to_bytes_be();
        let value_bits = bytes.len() * 8;
        if bits >= value_bits {
            for _ in 0..bits - value_bits {
                self.write_bit(false)?;
            }
            self.write_bits(&bytes, value_bits)?;
        } else {
            // the leading zero bits inside the first byte are skipped
            for i in value_bits - bits..value_bits {
                self.write_bit(bit_at(&bytes, i))?;
            }
        }
        Ok(())
    }

    /// Writes an arbitrary-precision signed value, two's complement.
    pub fn write_big_int(&mut self, value: &BigInt, bits: usize) -> Result<()> {
        if bits == 0 {
            return Err(CellError::IntOutOfRange { bits });
        }
        let bound = BigInt::from(1u8) << (bits - 1);
        if *value < -&bound || *value >= bound {
            return Err(CellError::IntOutOfRange { bits });
        }
        let twos = if value.sign() == Sign::Minus {
            (BigInt::from(1u8) << bits) + value
        } else {
            value.clone()
        };
        let (_, magnitude) = twos.into_parts();
        self.write_big_uint(&magnitude, bits)
    }

    /// Reads a single bit, advancing the read cursor.
    pub fn read_bit(&mut self) -> Result<bool> {
        self.check_read(1)?;
        let bit = bit_at(&self.data, self.pos);
        self.pos += 1;
        Ok(bit)
    }

    /// Returns the next bit without advancing the read cursor.
    pub fn peek_bit(&self) -> Result<bool> {
        self.check_read(1)?;
        Ok(bit_at(&self.data, self.pos))
    }

    /// Reads `bits` bits into a fresh MSB-aligned byte buffer.
    pub fn read_bits(&mut self, bits: usize) -> Result<Vec<u8>> {
        self.check_read(bits)?;
        let out = copy_bits(&self.data, self.pos, bits);
        self.pos += bits;
        Ok(out)
    }

    /// Copies the next `bits` bits without advancing the read cursor.
    pub fn peek_bits(&self, bits: usize) -> Result<Vec<u8>> {
        self.check_read(bits)?;
        Ok(copy_bits(&self.data, self.pos, bits))
    }

    /// Reads `bits <= 64` bits as a big-endian unsigned value.
    pub fn read_uint(&mut self, bits: usize) -> Result<u64> {
        if bits > 64 {
            return Err(CellError::IntOutOfRange { bits });
        }
        self.check_read(bits)?;
        let value = extract_uint(&self.data, self.pos, bits);
        self.pos += bits;
        Ok(value)
    }

    /// Returns the next `bits <= 64` bits as an unsigned value, cursor unchanged.
    pub fn peek_uint(&self, bits: usize) -> Result<u64> {
        if bits > 64 {
            return Err(CellError::IntOutOfRange { bits });
        }
        self.check_read(bits)?;
        Ok(extract_uint(&self.data, self.pos, bits))
    }

    /// Reads `bits <= 64` bits as a two's-complement signed value.
    pub fn read_int(&mut self, bits: usize) -> Result<i64> {
        if bits == 0 || bits > 64 {
            return Err(CellError::IntOutOfRange { bits });
        }
        let unsigned = self.read_uint(bits)?;
        Ok(sign_extend(unsigned, bits))
    }

    /// Reads whole bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.read_bits(n * 8)
    }

    /// Advances the read cursor by `bits` without returning data.
    pub fn skip(&mut self, bits: usize) -> Result<()> {
        self.check_read(bits)?;
        self.pos += bits;
        Ok(())
    }

    /// Renders the committed bits as hex nibbles.
    ///
    /// When the bit count is not a multiple of four, the bits are completed
    /// with a single `1` bit then zeros, and a trailing `_` marks the
    /// padding. `from_hex` reverses the marker exactly.
    pub fn to_hex(&self) -> String {
        if self.len % 4 == 0 {
            let s = hex::encode_upper(self.data());
            s[..self.len / 4].to_string()
        } else {
            let mut data = self.data().to_vec();
            let len = self.len + 4 - self.len % 4;
            if data.len() < len.div_ceil(8) {
                data.push(0);
            }
            set_bit(&mut data, self.len);
            let s = hex::encode_upper(&data[..len.div_ceil(8)]);
            format!("{}_", &s[..len / 4])
        }
    }

    /// Parses the hex form produced by [`to_hex`](Self::to_hex).
    pub fn from_hex(s: &str) -> Result<Self> {
        let (body, marked) = match s.strip_suffix('_') {
            Some(body) => (body, true),
            None => (s, false),
        };
        let mut nibbles = String::with_capacity(body.len() + 1);
        nibbles.push_str(body);
        if nibbles.len() % 2 != 0 {
            nibbles.push('0');
        }
        let data = hex::decode(&nibbles).map_err(|_| CellError::InvalidHex)?;
        let mut len = body.len() * 4;
        if marked {
            while len > 0 && !bit_at(&data, len - 1) {
                len -= 1;
            }
            if len == 0 {
                return Err(CellError::InvalidHex);
            }
            len -= 1;
        }
        let mut out = Self::with_capacity(len.max(MAX_CELL_BITS));
        out.write_bits(&data, len)?;
        Ok(out)
    }
}

/// Sign-extends the low `bits` bits of `value`.
pub(crate) fn sign_extend(value: u64, bits: usize) -> i64 {
    debug_assert!(bits >= 1 && bits <= 64);
    if bits == 64 {
        return value as i64;
    }
    if value >> (bits - 1) & 1 == 1 {
        (value | (!0u64 << bits)) as i64
    } else {
        value as i64
    }
}

impl Default for BitString {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for BitString {
    fn eq(&self, other: &Self) -> bool {
        if self.len != other.len {
            return false;
        }
        (0..self.len).all(|i| bit_at(&self.data, i) == bit_at(&other.data, i))
    }
}

impl Eq for BitString {}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.len {
            f.write_str(if bit_at(&self.data, i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_uint_bit_text() {
        let mut bits = BitString::new();
        bits.write_uint(42, 7).unwrap();
        assert_eq!(bits.to_string(), "0101010");
        assert_eq!(bits.to_hex(), "55_");
    }

    #[test]
    fn test_full_byte_hex() {
        let mut bits = BitString::new();
        bits.write_uint(255, 8).unwrap();
        assert_eq!(bits.to_hex(), "FF");
    }

    #[test]
    fn test_signed_roundtrip() {
        let mut bits = BitString::new();
        bits.write_int(-17, 11).unwrap();
        assert_eq!(bits.to_hex(), "FDF_");
        assert_eq!(bits.read_int(11).unwrap(), -17);
    }

    #[test]
    fn test_hex_marker_roundtrip() {
        for text in ["55_", "FF", "FDF_", "5", "C_", ""] {
            let bits = BitString::from_hex(text).unwrap();
            assert_eq!(bits.to_hex(), text);
        }
    }

    #[test]
    fn test_range_checks() {
        let mut bits = BitString::new();
        assert!(bits.write_uint(4, 2).is_err());
        assert!(bits.write_int(2, 2).is_err());
        assert!(bits.write_int(-3, 2).is_err());
        bits.write_int(-2, 2).unwrap();
        assert_eq!(bits.read_int(2).unwrap(), -2);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut bits = BitString::with_capacity(8);
        bits.write_uint(0xab, 8).unwrap();
        let err = bits.write_bit(true).unwrap_err();
        assert_eq!(
            err,
            CellError::BitsOverflow {
                requested: 1,
                available: 0
            }
        );
    }

    #[test]
    fn test_read_cursor_bounds() {
        let mut bits = BitString::new();
        bits.write_uint(0b101, 3).unwrap();
        assert_eq!(bits.read_uint(3).unwrap(), 0b101);
        assert!(bits.read_bit().is_err());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut bits = BitString::new();
        bits.write_uint(0xdead, 16).unwrap();
        assert_eq!(bits.peek_uint(16).unwrap(), 0xdead);
        assert_eq!(bits.peek_uint(16).unwrap(), 0xdead);
        assert_eq!(bits.read_uint(16).unwrap(), 0xdead);
    }

    #[test]
    fn test_big_uint() {
        let value = BigUint::parse_bytes(b"115792089237316195423570985008687907853269984665640564039457584007913129639935", 10).unwrap();
        let mut bits = BitString::new();
        bits.write_big_uint(&value, 256).unwrap();
        assert_eq!(bits.used_bits(), 256);
        assert_eq!(bits.data(), &[0xffu8; 32][..]);
    }

    #[test]
    fn test_big_int_negative() {
        let mut bits = BitString::new();
        bits.write_big_int(&BigInt::from(-17), 11).unwrap();
        assert_eq!(bits.to_hex(), "FDF_");
    }

    #[test]
    fn test_unaligned_append() {
        let mut a = BitString::new();
        a.write_uint(0b101, 3).unwrap();
        let mut b = BitString::new();
        b.write_uint(0b0110, 4).unwrap();
        a.write_bit_string(&b).unwrap();
        assert_eq!(a.to_string(), "1010110");
    }

    #[test]
    fn test_counters() {
        let mut bits = BitString::new();
        bits.write_uint(0, 13).unwrap();
        assert_eq!(bits.used_bits(), 13);
        assert_eq!(bits.used_bytes(), 2);
        assert_eq!(bits.free_bits(), MAX_CELL_BITS - 13);
    }
}
