//! Builder for constructing cells
//!
//! The builder accumulates typed values into a staging bit buffer plus up to
//! four child references, then freezes the result into an immutable
//! [`Cell`]. Freezing consumes the builder; there is no way to mutate a cell
//! after it has been built.

use std::sync::Arc;

use num_bigint::{BigInt, BigUint};

use crate::address::{Address, ExternalAddress};
use crate::bits::BitString;
use crate::cell::{Cell, CellType, MAX_CELL_BITS, MAX_CELL_REFS};
use crate::error::{CellError, Result};
use crate::slice::Slice;

/// Maximum number of bytes a coins amount may occupy (120 bits).
const MAX_COINS_BYTES: usize = 15;

/// Mutable, single-use accumulator for building a cell.
pub struct Builder {
    bits: BitString,
    references: Vec<Arc<Cell>>,
    cell_type: CellType,
}

impl Builder {
    /// Creates a new builder for an ordinary cell.
    pub fn new() -> Self {
        Self {
            bits: BitString::new(),
            references: Vec::new(),
            cell_type: CellType::Ordinary,
        }
    }

    /// Marks the builder as producing an exotic cell of the given kind.
    ///
    /// The payload written into the builder must match the kind's layout;
    /// [`build`](Self::build) validates it.
    pub fn set_exotic(&mut self, cell_type: CellType) -> &mut Self {
        self.cell_type = cell_type;
        self
    }

    /// Returns the number of bits used.
    pub fn bit_len(&self) -> usize {
        self.bits.used_bits()
    }

    /// Returns the number of available bits.
    pub fn available_bits(&self) -> usize {
        MAX_CELL_BITS - self.bit_len()
    }

    /// Returns the number of available whole bytes.
    pub fn available_bytes(&self) -> usize {
        self.available_bits() / 8
    }

    /// Returns the number of references.
    pub fn ref_count(&self) -> usize {
        self.references.len()
    }

    /// Returns the number of available references.
    pub fn available_refs(&self) -> usize {
        MAX_CELL_REFS - self.ref_count()
    }

    /// Stores a single bit.
    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self> {
        self.bits.write_bit(bit)?;
        Ok(self)
    }

    /// Stores a boolean value as a single bit.
    pub fn store_bool(&mut self, value: bool) -> Result<&mut Self> {
        self.store_bit(value)
    }

    /// Stores the first `bit_len` bits of a byte slice.
    pub fn store_bits(&mut self, bits: &[u8], bit_len: usize) -> Result<&mut Self> {
        self.bits.write_bits(bits, bit_len)?;
        Ok(self)
    }

    /// Stores a sequence of bits given as booleans.
    pub fn store_bools(&mut self, bits: &[bool]) -> Result<&mut Self> {
        for &bit in bits {
            self.bits.write_bit(bit)?;
        }
        Ok(self)
    }

    /// Stores a bit string given as '0'/'1' text.
    pub fn store_bits_str(&mut self, s: &str) -> Result<&mut Self> {
        self.bits.write_bits_str(s)?;
        Ok(self)
    }

    /// Stores the committed bits of another bit buffer.
    pub fn store_bit_string(&mut self, other: &BitString) -> Result<&mut Self> {
        self.bits.write_bit_string(other)?;
        Ok(self)
    }

    /// Stores a byte.
    pub fn store_byte(&mut self, byte: u8) -> Result<&mut Self> {
        self.store_bits(&[byte], 8)
    }

    /// Stores multiple bytes.
    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        self.bits.write_bytes(bytes)?;
        Ok(self)
    }

    /// Stores a u32 value.
    pub fn store_u32(&mut self, value: u32) -> Result<&mut Self> {
        self.store_bits(&value.to_be_bytes(), 32)
    }

    /// Stores a u64 value.
    pub fn store_u64(&mut self, value: u64) -> Result<&mut Self> {
        self.store_bits(&value.to_be_bytes(), 64)
    }

    /// Stores an unsigned integer in exactly `bits` bits.
    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self> {
        self.bits.write_uint(value, bits)?;
        Ok(self)
    }

    /// Stores a signed integer in exactly `bits` bits, two's complement.
    pub fn store_int(&mut self, value: i64, bits: usize) -> Result<&mut Self> {
        self.bits.write_int(value, bits)?;
        Ok(self)
    }

    /// Stores an arbitrary-precision unsigned integer.
    pub fn store_big_uint(&mut self, value: &BigUint, bits: usize) -> Result<&mut Self> {
        self.bits.write_big_uint(value, bits)?;
        Ok(self)
    }

    /// Stores an arbitrary-precision signed integer, two's complement.
    pub fn store_big_int(&mut self, value: &BigInt, bits: usize) -> Result<&mut Self> {
        self.bits.write_big_int(value, bits)?;
        Ok(self)
    }

    /// Stores a reference to another cell.
    pub fn store_ref(&mut self, cell: Arc<Cell>) -> Result<&mut Self> {
        if self.references.len() >= MAX_CELL_REFS {
            return Err(CellError::RefsOverflow);
        }
        self.references.push(cell);
        Ok(self)
    }

    /// Stores an optional reference: one flag bit, then the reference if set.
    pub fn store_maybe_ref(&mut self, cell: Option<Arc<Cell>>) -> Result<&mut Self> {
        match cell {
            Some(cell) => {
                self.store_bit(true)?;
                self.store_ref(cell)
            }
            None => self.store_bit(false),
        }
    }

    /// Stores an optional value: one flag bit, then the payload if set.
    pub fn store_maybe<T>(
        &mut self,
        value: Option<T>,
        store: impl FnOnce(&mut Self, T) -> Result<()>,
    ) -> Result<&mut Self> {
        match value {
            Some(value) => {
                self.store_bit(true)?;
                store(self, value)?;
            }
            None => {
                self.store_bit(false)?;
            }
        }
        Ok(self)
    }

    /// Stores the contents of another cell in place: its bits followed by
    /// its references.
    pub fn store_cell(&mut self, cell: &Arc<Cell>) -> Result<&mut Self> {
        if self.ref_count() + cell.reference_count() > MAX_CELL_REFS {
            return Err(CellError::RefsOverflow);
        }
        self.store_bits(cell.data(), cell.bit_len())?;
        for reference in cell.references() {
            self.store_ref(reference.clone())?;
        }
        Ok(self)
    }

    /// Stores the remaining contents of a slice.
    pub fn store_slice(&mut self, slice: &Slice) -> Result<&mut Self> {
        let mut remainder = slice.clone();
        let bits = remainder.load_bits(remainder.remaining_bits())?;
        self.store_bits(&bits.data().to_vec(), bits.used_bits())?;
        while remainder.remaining_refs() > 0 {
            self.store_ref(remainder.load_ref()?)?;
        }
        Ok(self)
    }

    /// Stores a variable-length unsigned integer: a `len_bits`-wide byte
    /// count followed by that many value bytes, big-endian.
    pub fn store_var_uint(&mut self, value: u128, len_bits: usize) -> Result<&mut Self> {
        if value == 0 {
            return self.store_uint(0, len_bits);
        }
        let byte_len = ((128 - value.leading_zeros()) as usize).div_ceil(8);
        if len_bits < 8 && byte_len >= 1 << len_bits {
            return Err(CellError::AmountTooLarge);
        }
        self.store_uint(byte_len as u64, len_bits)?;
        let bytes = value.to_be_bytes();
        self.store_bytes(&bytes[16 - byte_len..])
    }

    /// Stores a coins amount: a 4-bit byte count then that many bytes.
    ///
    /// The economy encoding caps amounts at 120 bits.
    pub fn store_coins(&mut self, amount: u128) -> Result<&mut Self> {
        if amount != 0 {
            let byte_len = ((128 - amount.leading_zeros()) as usize).div_ceil(8);
            if byte_len > MAX_COINS_BYTES {
                return Err(CellError::AmountTooLarge);
            }
        }
        self.store_var_uint(amount, 4)
    }

    /// Stores a short string as raw bytes; fails if it does not fit.
    pub fn store_string(&mut self, s: &str) -> Result<&mut Self> {
        self.store_bytes(s.as_bytes())
    }

    /// Stores a string using snake encoding, chunking it across a chain of
    /// child cells when it does not fit in this one.
    pub fn store_snake_string(&mut self, s: &str, with_prefix: bool) -> Result<&mut Self> {
        let mut bytes = s.as_bytes().to_vec();
        if with_prefix {
            bytes.insert(0, 0x00);
        }
        self.store_snake_bytes(&bytes)
    }

    /// Stores bytes using snake encoding.
    pub fn store_snake_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        let available = self.available_bytes();
        if bytes.len() <= available {
            return self.store_bytes(bytes);
        }
        self.store_bytes(&bytes[..available])?;
        let mut next = Builder::new();
        next.store_snake_bytes(&bytes[available..])?;
        self.store_ref(next.build()?)
    }

    /// Stores an address in its canonical compact form.
    ///
    /// `None` is `addr_none$00`; `Some` is `addr_std$10` with an optional
    /// anycast prefix, an 8-bit workchain and a 256-bit account id.
    pub fn store_address(&mut self, address: Option<&Address>) -> Result<&mut Self> {
        match address {
            None => self.store_uint(0b00, 2),
            Some(addr) => {
                self.store_uint(0b10, 2)?;
                match &addr.anycast {
                    None => self.store_bit(false)?,
                    Some(anycast) => {
                        self.store_bit(true)?;
                        self.store_uint(anycast.depth as u64, 5)?;
                        self.store_uint(anycast.rewrite_prefix as u64, anycast.depth as usize)?
                    }
                };
                self.store_int(addr.workchain as i64, 8)?;
                self.store_bytes(&addr.hash_part)
            }
        }
    }

    /// Stores an external address: `addr_extern$01 len:(## 9) (bits len)`.
    pub fn store_external_address(&mut self, address: &ExternalAddress) -> Result<&mut Self> {
        self.store_uint(0b01, 2)?;
        self.store_uint(address.bit_len as u64, 9)?;
        if let Some(value) = address.value {
            self.store_uint(value, address.bit_len)?;
        }
        Ok(self)
    }

    /// Stores a dictionary root behind an optional-bit + reference.
    pub fn store_dict(&mut self, dict: Option<Arc<Cell>>) -> Result<&mut Self> {
        self.store_maybe_ref(dict)
    }

    /// Freezes the builder into an immutable cell.
    pub fn build(self) -> Result<Arc<Cell>> {
        let bit_len = self.bits.used_bits();
        let data = self.bits.data().to_vec();
        Ok(Arc::new(Cell::finalize(
            data,
            bit_len,
            self.references,
            self.cell_type,
        )?))
    }

    /// Freezes the builder into an immutable cell (alias for `build`).
    pub fn end_cell(self) -> Result<Arc<Cell>> {
        self.build()
    }

    /// Freezes the builder and opens a read cursor over the result.
    pub fn to_slice(self) -> Result<Slice> {
        Ok(Slice::new(self.build()?))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_bit_and_hex_text() {
        let mut builder = Builder::new();
        builder.store_uint(42, 7).unwrap();
        let cell = builder.build().unwrap();
        assert_eq!(cell.bits().to_string(), "0101010");
        assert_eq!(cell.bits().to_hex(), "55_");
    }

    #[test]
    fn test_full_byte_hex() {
        let mut builder = Builder::new();
        builder.store_uint(255, 8).unwrap();
        let cell = builder.build().unwrap();
        assert_eq!(cell.bits().to_hex(), "FF");
    }

    #[test]
    fn test_coins_ten() {
        let mut builder = Builder::new();
        builder.store_coins(10).unwrap();
        let cell = builder.build().unwrap();
        assert_eq!(cell.bits().to_hex(), "10A");
    }

    #[test]
    fn test_coins_zero_and_cap() {
        let mut builder = Builder::new();
        builder.store_coins(0).unwrap();
        assert_eq!(builder.bit_len(), 4);

        let mut builder = Builder::new();
        assert_eq!(
            builder.store_coins(1u128 << 120).err(),
            Some(CellError::AmountTooLarge)
        );
    }

    #[test]
    fn test_address_bit_len() {
        let addr = Address::new(0, [0u8; 32]);
        let mut builder = Builder::new();
        builder.store_address(Some(&addr)).unwrap();
        let cell = builder.build().unwrap();
        // 2 (tag) + 1 (no anycast) + 8 (workchain) + 256 (account id)
        assert_eq!(cell.bit_len(), 267);
    }

    #[test]
    fn test_refs_overflow() {
        let child = Builder::new().build().unwrap();
        let mut builder = Builder::new();
        for _ in 0..MAX_CELL_REFS {
            builder.store_ref(child.clone()).unwrap();
        }
        assert_eq!(builder.store_ref(child).err(), Some(CellError::RefsOverflow));
    }

    #[test]
    fn test_store_cell_splices_bits_and_refs() {
        let child = Builder::new().build().unwrap();
        let mut inner = Builder::new();
        inner.store_uint(0b101, 3).unwrap();
        inner.store_ref(child).unwrap();
        let inner = inner.build().unwrap();

        let mut outer = Builder::new();
        outer.store_bit(true).unwrap();
        outer.store_cell(&inner).unwrap();
        let cell = outer.build().unwrap();
        assert_eq!(cell.bit_len(), 4);
        assert_eq!(cell.reference_count(), 1);
        assert_eq!(cell.bits().to_string(), "1101");
    }

    #[test]
    fn test_snake_string_chains() {
        let long = "a".repeat(300);
        let mut builder = Builder::new();
        builder.store_snake_string(&long, false).unwrap();
        let cell = builder.build().unwrap();
        assert_eq!(cell.reference_count(), 1);
        assert_eq!(cell.bit_len(), 127 * 8);
    }

    #[test]
    fn test_maybe() {
        let mut builder = Builder::new();
        builder
            .store_maybe(Some(7u64), |b, v| b.store_uint(v, 16).map(|_| ()))
            .unwrap();
        builder.store_maybe(None::<u64>, |_, _| Ok(())).unwrap();
        let cell = builder.build().unwrap();
        assert_eq!(cell.bit_len(), 18);
    }

    #[test]
    fn test_big_int_store() {
        let mut builder = Builder::new();
        builder.store_big_int(&BigInt::from(-17), 11).unwrap();
        let cell = builder.build().unwrap();
        assert_eq!(cell.bits().to_hex(), "FDF_");
    }
}
