//! Read cursor over a frozen cell
//!
//! A slice pairs a shared cell with a bit position and a reference position.
//! Loads advance the cursor; preloads do not. The underlying cell is never
//! modified, so any number of slices can read the same cell concurrently.

use std::sync::Arc;

use num_bigint::{BigInt, BigUint};

use crate::address::{Address, Anycast, ExternalAddress};
use crate::bits::{BitString, bit_at, copy_bits, extract_uint, sign_extend};
use crate::builder::Builder;
use crate::cell::Cell;
use crate::error::{CellError, Result};

/// Cursor over the bits and references of a single cell.
#[derive(Clone)]
pub struct Slice {
    cell: Arc<Cell>,
    bit_pos: usize,
    ref_pos: usize,
}

impl Slice {
    /// Opens a cursor at the start of a cell.
    pub fn new(cell: Arc<Cell>) -> Self {
        Self {
            cell,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    /// The cell this slice reads from.
    pub fn cell(&self) -> &Arc<Cell> {
        &self.cell
    }

    /// Number of bits left to read.
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len() - self.bit_pos
    }

    /// Number of references left to read.
    pub fn remaining_refs(&self) -> usize {
        self.cell.reference_count() - self.ref_pos
    }

    /// Whether both bits and references are exhausted.
    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0 && self.remaining_refs() == 0
    }

    fn ensure_bits(&self, bits: usize) -> Result<()> {
        if bits > self.remaining_bits() {
            return Err(CellError::BitsUnderflow {
                requested: bits,
                available: self.remaining_bits(),
            });
        }
        Ok(())
    }

    fn ensure_refs(&self, refs: usize) -> Result<()> {
        if refs > self.remaining_refs() {
            return Err(CellError::RefsUnderflow);
        }
        Ok(())
    }

    /// Loads a single bit.
    pub fn load_bit(&mut self) -> Result<bool> {
        self.ensure_bits(1)?;
        let bit = bit_at(self.cell.data(), self.bit_pos);
        self.bit_pos += 1;
        Ok(bit)
    }

    /// Returns the next bit without advancing.
    pub fn preload_bit(&self) -> Result<bool> {
        self.ensure_bits(1)?;
        Ok(bit_at(self.cell.data(), self.bit_pos))
    }

    /// Loads `bits` bits into a fresh buffer.
    pub fn load_bits(&mut self, bits: usize) -> Result<BitString> {
        self.ensure_bits(bits)?;
        let data = copy_bits(self.cell.data(), self.bit_pos, bits);
        self.bit_pos += bits;
        Ok(BitString::frozen(data, bits))
    }

    /// Copies the next `bits` bits without advancing.
    pub fn preload_bits(&self, bits: usize) -> Result<BitString> {
        self.ensure_bits(bits)?;
        let data = copy_bits(self.cell.data(), self.bit_pos, bits);
        Ok(BitString::frozen(data, bits))
    }

    /// Loads `n` whole bytes.
    pub fn load_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.ensure_bits(n * 8)?;
        let data = copy_bits(self.cell.data(), self.bit_pos, n * 8);
        self.bit_pos += n * 8;
        Ok(data)
    }

    /// Loads `bits <= 64` bits as a big-endian unsigned value.
    pub fn load_uint(&mut self, bits: usize) -> Result<u64> {
        if bits > 64 {
            return Err(CellError::IntOutOfRange { bits });
        }
        self.ensure_bits(bits)?;
        let value = extract_uint(self.cell.data(), self.bit_pos, bits);
        self.bit_pos += bits;
        Ok(value)
    }

    /// Returns the next `bits <= 64` bits as an unsigned value, cursor unchanged.
    pub fn preload_uint(&self, bits: usize) -> Result<u64> {
        if bits > 64 {
            return Err(CellError::IntOutOfRange { bits });
        }
        self.ensure_bits(bits)?;
        Ok(extract_uint(self.cell.data(), self.bit_pos, bits))
    }

    /// Loads `bits <= 64` bits as a two's-complement signed value.
    pub fn load_int(&mut self, bits: usize) -> Result<i64> {
        if bits == 0 || bits > 64 {
            return Err(CellError::IntOutOfRange { bits });
        }
        let unsigned = self.load_uint(bits)?;
        Ok(sign_extend(unsigned, bits))
    }

    pub fn load_u8(&mut self) -> Result<u8> {
        Ok(self.load_uint(8)? as u8)
    }

    pub fn load_u16(&mut self) -> Result<u16> {
        Ok(self.load_uint(16)? as u16)
    }

    pub fn load_u32(&mut self) -> Result<u32> {
        Ok(self.load_uint(32)? as u32)
    }

    pub fn load_u64(&mut self) -> Result<u64> {
        self.load_uint(64)
    }

    /// Loads an arbitrary-precision unsigned value of `bits` bits.
    pub fn load_big_uint(&mut self, bits: usize) -> Result<BigUint> {
        let buf = self.load_bits(bits)?;
        let value = BigUint::from_bytes_be(buf.data());
        Ok(value >> (buf.data().len() * 8 - bits))
    }

    /// Loads an arbitrary-precision signed value, two's complement.
    pub fn load_big_int(&mut self, bits: usize) -> Result<BigInt> {
        if bits == 0 {
            return Err(CellError::IntOutOfRange { bits });
        }
        let unsigned = self.load_big_uint(bits)?;
        let bound = BigUint::from(1u8) << (bits - 1);
        if unsigned >= bound {
            Ok(BigInt::from(unsigned) - (BigInt::from(1u8) << bits))
        } else {
            Ok(BigInt::from(unsigned))
        }
    }

    /// Loads a variable-length unsigned integer written by
    /// [`Builder::store_var_uint`].
    pub fn load_var_uint(&mut self, len_bits: usize) -> Result<u128> {
        let byte_len = self.load_uint(len_bits)? as usize;
        if byte_len > 16 {
            return Err(CellError::AmountTooLarge);
        }
        let bytes = self.load_bytes(byte_len)?;
        let mut value = 0u128;
        for byte in bytes {
            value = value << 8 | byte as u128;
        }
        Ok(value)
    }

    /// Loads a coins amount: a 4-bit byte count then that many bytes.
    pub fn load_coins(&mut self) -> Result<u128> {
        self.load_var_uint(4)
    }

    /// Loads a unary-encoded number: `n` one bits terminated by a zero bit.
    pub fn load_unary(&mut self) -> Result<usize> {
        let mut n = 0;
        while self.load_bit()? {
            n += 1;
        }
        Ok(n)
    }

    /// Loads the remaining whole bytes as a UTF-8 string.
    pub fn load_string(&mut self) -> Result<String> {
        if self.remaining_bits() % 8 != 0 {
            return Err(CellError::InvalidUtf8);
        }
        let bytes = self.load_bytes(self.remaining_bits() / 8)?;
        String::from_utf8(bytes).map_err(|_| CellError::InvalidUtf8)
    }

    /// Loads a snake-encoded byte string, following the reference chain.
    pub fn load_snake_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut slice = self.clone();
        loop {
            if slice.remaining_bits() % 8 != 0 {
                return Err(CellError::InvalidUtf8);
            }
            out.extend(slice.load_bytes(slice.remaining_bits() / 8)?);
            match slice.remaining_refs() {
                0 => break,
                _ => slice = Slice::new(slice.load_ref()?),
            }
        }
        self.bit_pos = self.cell.bit_len();
        self.ref_pos = self.cell.reference_count();
        Ok(out)
    }

    /// Loads a snake-encoded string, skipping an optional 0x00 prefix.
    pub fn load_snake_string(&mut self) -> Result<String> {
        let mut bytes = self.load_snake_bytes()?;
        if bytes.first() == Some(&0x00) {
            bytes.remove(0);
        }
        String::from_utf8(bytes).map_err(|_| CellError::InvalidUtf8)
    }

    /// Loads an address written by [`Builder::store_address`].
    ///
    /// `addr_none$00` loads as `None`; `addr_std$10` as `Some`. The external
    /// and variable-length forms are rejected.
    pub fn load_address(&mut self) -> Result<Option<Address>> {
        match self.load_uint(2)? as u8 {
            0b00 => Ok(None),
            0b10 => {
                let anycast = if self.load_bit()? {
                    let depth = self.load_uint(5)? as u8;
                    let rewrite_prefix = self.load_uint(depth as usize)? as u32;
                    Some(Anycast {
                        depth,
                        rewrite_prefix,
                    })
                } else {
                    None
                };
                let workchain = self.load_int(8)? as i8;
                let bytes = self.load_bytes(32)?;
                let mut hash_part = [0u8; 32];
                hash_part.copy_from_slice(&bytes);
                Ok(Some(Address {
                    workchain,
                    hash_part,
                    anycast,
                }))
            }
            tag => Err(CellError::UnsupportedAddressTag(tag)),
        }
    }

    /// Loads an `addr_extern$01` address.
    pub fn load_external_address(&mut self) -> Result<ExternalAddress> {
        match self.load_uint(2)? as u8 {
            0b01 => {
                let bit_len = self.load_uint(9)? as usize;
                let value = if bit_len > 0 {
                    Some(self.load_uint(bit_len)?)
                } else {
                    None
                };
                Ok(ExternalAddress { bit_len, value })
            }
            tag => Err(CellError::UnsupportedAddressTag(tag)),
        }
    }

    /// Loads an optional value: one flag bit, then the payload if set.
    pub fn load_maybe<T>(
        &mut self,
        load: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<Option<T>> {
        if self.load_bit()? {
            Ok(Some(load(self)?))
        } else {
            Ok(None)
        }
    }

    /// Loads an optional reference: one flag bit, then a reference if set.
    pub fn load_maybe_ref(&mut self) -> Result<Option<Arc<Cell>>> {
        self.load_maybe(|slice| slice.load_ref())
    }

    /// Returns the optional reference without consuming the flag bit.
    pub fn preload_maybe_ref(&self) -> Result<Option<Arc<Cell>>> {
        self.clone().load_maybe_ref()
    }

    /// Loads a dictionary root stored behind an optional-bit + reference.
    pub fn load_dict(&mut self) -> Result<Option<Arc<Cell>>> {
        self.load_maybe_ref()
    }

    /// Inspects a dictionary root without consuming it.
    pub fn preload_dict(&self) -> Result<Option<Arc<Cell>>> {
        self.preload_maybe_ref()
    }

    /// Loads the next reference.
    pub fn load_ref(&mut self) -> Result<Arc<Cell>> {
        let cell = self
            .cell
            .reference(self.ref_pos)
            .ok_or(CellError::RefsUnderflow)?
            .clone();
        self.ref_pos += 1;
        Ok(cell)
    }

    /// Returns the reference `index` places ahead without advancing.
    pub fn preload_ref(&self, index: usize) -> Result<Arc<Cell>> {
        self.cell
            .reference(self.ref_pos + index)
            .ok_or(CellError::RefsUnderflow)
            .cloned()
    }

    /// Advances past `bits` bits.
    pub fn skip_bits(&mut self, bits: usize) -> Result<&mut Self> {
        self.ensure_bits(bits)?;
        self.bit_pos += bits;
        Ok(self)
    }

    /// Advances past `refs` references.
    pub fn skip_refs(&mut self, refs: usize) -> Result<&mut Self> {
        self.ensure_refs(refs)?;
        self.ref_pos += refs;
        Ok(self)
    }

    /// Loads everything left in the slice.
    pub fn load_remaining_bits(&mut self) -> Result<BitString> {
        self.load_bits(self.remaining_bits())
    }

    /// Rebuilds the remaining bits and references into a fresh cell.
    pub fn to_cell(&self) -> Result<Arc<Cell>> {
        let mut builder = Builder::new();
        builder.store_slice(self)?;
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(f: impl FnOnce(&mut Builder) -> Result<()>) -> Arc<Cell> {
        let mut builder = Builder::new();
        f(&mut builder).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_uint_roundtrip() {
        let cell = build(|b| {
            b.store_uint(42, 7)?;
            b.store_int(-17, 11)?;
            Ok(())
        });
        let mut slice = Slice::new(cell);
        assert_eq!(slice.load_uint(7).unwrap(), 42);
        assert_eq!(slice.load_int(11).unwrap(), -17);
        assert!(slice.is_empty());
    }

    #[test]
    fn test_underflow() {
        let cell = build(|b| b.store_uint(1, 4).map(|_| ()));
        let mut slice = Slice::new(cell);
        assert_eq!(
            slice.load_uint(5).err(),
            Some(CellError::BitsUnderflow {
                requested: 5,
                available: 4
            })
        );
        assert_eq!(slice.load_ref().err(), Some(CellError::RefsUnderflow));
    }

    #[test]
    fn test_preload_does_not_consume() {
        let cell = build(|b| b.store_uint(0xbeef, 16).map(|_| ()));
        let slice = Slice::new(cell);
        assert_eq!(slice.preload_uint(16).unwrap(), 0xbeef);
        assert_eq!(slice.preload_uint(16).unwrap(), 0xbeef);
        assert_eq!(slice.remaining_bits(), 16);
    }

    #[test]
    fn test_coins_roundtrip() {
        for amount in [0u128, 1, 10, 255, 256, u64::MAX as u128, (1 << 120) - 1] {
            let cell = build(|b| b.store_coins(amount).map(|_| ()));
            let mut slice = Slice::new(cell);
            assert_eq!(slice.load_coins().unwrap(), amount);
        }
    }

    #[test]
    fn test_var_uint_roundtrip() {
        let cell = build(|b| b.store_var_uint(123_456_789, 5).map(|_| ()));
        let mut slice = Slice::new(cell);
        assert_eq!(slice.load_var_uint(5).unwrap(), 123_456_789);
    }

    #[test]
    fn test_address_roundtrip() {
        let addr = Address::new(-1, [0x33; 32]);
        let cell = build(|b| b.store_address(Some(&addr)).map(|_| ()));
        let mut slice = Slice::new(cell);
        assert_eq!(slice.load_address().unwrap(), Some(addr));

        let cell = build(|b| b.store_address(None).map(|_| ()));
        let mut slice = Slice::new(cell);
        assert_eq!(slice.load_address().unwrap(), None);
    }

    #[test]
    fn test_anycast_roundtrip() {
        let addr = Address {
            workchain: 0,
            hash_part: [0x77; 32],
            anycast: Some(Anycast {
                depth: 5,
                rewrite_prefix: 0b10110,
            }),
        };
        let cell = build(|b| b.store_address(Some(&addr)).map(|_| ()));
        let mut slice = Slice::new(cell);
        assert_eq!(slice.load_address().unwrap(), Some(addr));
    }

    #[test]
    fn test_snake_roundtrip() {
        let text = "x".repeat(500);
        let cell = build(|b| b.store_snake_string(&text, true).map(|_| ()));
        let mut slice = Slice::new(cell);
        assert_eq!(slice.load_snake_string().unwrap(), text);
        assert!(slice.is_empty());
    }

    #[test]
    fn test_big_int_roundtrip() {
        let cell = build(|b| {
            b.store_big_int(&BigInt::from(-123_456_789), 77)?;
            b.store_big_uint(&BigUint::from(9_876_543_210u64), 77)?;
            Ok(())
        });
        let mut slice = Slice::new(cell);
        assert_eq!(slice.load_big_int(77).unwrap(), BigInt::from(-123_456_789));
        assert_eq!(
            slice.load_big_uint(77).unwrap(),
            BigUint::from(9_876_543_210u64)
        );
    }

    #[test]
    fn test_unary() {
        let cell = build(|b| b.store_bits_str("1110").map(|_| ()));
        let mut slice = Slice::new(cell);
        assert_eq!(slice.load_unary().unwrap(), 3);
    }

    #[test]
    fn test_preload_ref_by_index() {
        let first = build(|b| b.store_uint(1, 8).map(|_| ()));
        let second = build(|b| b.store_uint(2, 8).map(|_| ()));
        let cell = build(|b| {
            b.store_ref(first.clone())?;
            b.store_ref(second.clone())?;
            Ok(())
        });
        let mut slice = Slice::new(cell);
        assert_eq!(slice.preload_ref(1).unwrap().hash(), second.hash());
        assert_eq!(slice.preload_ref(0).unwrap().hash(), first.hash());
        assert_eq!(slice.remaining_refs(), 2);

        slice.load_ref().unwrap();
        assert_eq!(slice.preload_ref(0).unwrap().hash(), second.hash());
        assert_eq!(slice.preload_ref(1).err(), Some(CellError::RefsUnderflow));
    }

    #[test]
    fn test_to_cell_preserves_remainder() {
        let child = build(|_| Ok(()));
        let cell = build(|b| {
            b.store_uint(0xabc, 12)?;
            b.store_ref(child)?;
            Ok(())
        });
        let mut slice = Slice::new(cell);
        slice.skip_bits(4).unwrap();
        let rebuilt = slice.to_cell().unwrap();
        assert_eq!(rebuilt.bit_len(), 8);
        assert_eq!(rebuilt.reference_count(), 1);
        assert_eq!(rebuilt.bits().to_hex(), "BC");
    }
}
