//! Hashmap (dictionary) cells
//!
//! A dictionary maps fixed-width bit keys to cell values as a binary prefix
//! trie. Every edge carries a label in the cheapest of three encodings, so a
//! given key set has exactly one serialized form; equal maps always produce
//! equal root hashes.
//!
//! Edges come in two shapes. A leaf consumes the rest of the key and holds
//! its value as a child reference. A fork holds the left (next bit 0) and
//! right (next bit 1) subtrees as references; the branch bit itself is not
//! part of either label.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bits::{BitString, bit_at, copy_bits, set_bit};
use crate::builder::Builder;
use crate::cell::Cell;
use crate::error::{CellError, Result};
use crate::slice::Slice;

/// Number of bits needed to write a length in `0..=m`.
fn len_bits(m: usize) -> usize {
    usize::BITS as usize - m.leading_zeros() as usize
}

/// Writes an edge label of `len` bits where at most `m` key bits remain.
///
/// Picks the shortest of the three encodings; the same-bit form only wins
/// when strictly shorter, the unary form wins ties against the binary form.
fn store_label(builder: &mut Builder, label: &[u8], len: usize, m: usize) -> Result<()> {
    let lb = len_bits(m);
    let short_cost = 2 * len + 2;
    let long_cost = 2 + lb + len;
    let same_bit = if len > 0 {
        let first = bit_at(label, 0);
        (1..len).all(|i| bit_at(label, i) == first).then_some(first)
    } else {
        None
    };

    if let Some(bit) = same_bit
        && 3 + lb < short_cost.min(long_cost)
    {
        // hml_same$11 v:Bit len:(#<= m)
        builder.store_uint(0b11, 2)?;
        builder.store_bit(bit)?;
        builder.store_uint(len as u64, lb)?;
    } else if short_cost <= long_cost {
        // hml_short$0 len:(Unary n) s:(n * Bit)
        builder.store_bit(false)?;
        for _ in 0..len {
            builder.store_bit(true)?;
        }
        builder.store_bit(false)?;
        builder.store_bits(label, len)?;
    } else {
        // hml_long$10 len:(#<= m) s:(len * Bit)
        builder.store_uint(0b10, 2)?;
        builder.store_uint(len as u64, lb)?;
        builder.store_bits(label, len)?;
    }
    Ok(())
}

/// Reads an edge label where at most `m` key bits remain.
pub(crate) fn read_label(slice: &mut Slice, m: usize) -> Result<(Vec<u8>, usize)> {
    let lb = len_bits(m);
    let (data, len) = if !slice.load_bit()? {
        let len = slice.load_unary()?;
        (slice.load_bits(len)?.data().to_vec(), len)
    } else if !slice.load_bit()? {
        let len = slice.load_uint(lb)? as usize;
        (slice.load_bits(len)?.data().to_vec(), len)
    } else {
        let bit = slice.load_bit()?;
        let len = slice.load_uint(lb)? as usize;
        (vec![if bit { 0xff } else { 0x00 }; len.div_ceil(8)], len)
    };
    if len > m {
        return Err(CellError::MalformedLabel);
    }
    Ok((data, len))
}

/// Recursively serializes a sorted, non-empty run of entries into one edge.
fn build_edge(entries: &[(&Vec<u8>, &Arc<Cell>)], pos: usize, key_len: usize) -> Result<Arc<Cell>> {
    let m = key_len - pos;
    let first = entries[0].0;
    let common = if entries.len() == 1 {
        m
    } else {
        let last = entries[entries.len() - 1].0;
        let mut common = 0;
        while common < m && bit_at(first, pos + common) == bit_at(last, pos + common) {
            common += 1;
        }
        common
    };

    let mut builder = Builder::new();
    let label = copy_bits(first, pos, common);
    store_label(&mut builder, &label, common, m)?;
    if entries.len() == 1 {
        builder.store_ref(entries[0].1.clone())?;
    } else {
        let split = entries.partition_point(|(key, _)| !bit_at(key, pos + common));
        builder.store_ref(build_edge(&entries[..split], pos + common + 1, key_len)?)?;
        builder.store_ref(build_edge(&entries[split..], pos + common + 1, key_len)?)?;
    }
    builder.build()
}

/// Recursively parses one edge, accumulating key bits into `key`.
fn parse_edge(
    cell: &Arc<Cell>,
    key: Vec<u8>,
    pos: usize,
    key_len: usize,
    dict: &mut Dict,
) -> Result<()> {
    let mut slice = Slice::new(cell.clone());
    let (label, len) = read_label(&mut slice, key_len - pos)?;
    let mut key = key;
    for i in 0..len {
        if bit_at(&label, i) {
            set_bit(&mut key, pos + i);
        }
    }
    let pos = pos + len;
    if pos == key_len {
        let value = slice.load_ref()?;
        dict.insert(key, value);
    } else {
        let left = slice.load_ref()?;
        let right = slice.load_ref()?;
        parse_edge(&left, key.clone(), pos + 1, key_len, dict)?;
        let mut key = key;
        set_bit(&mut key, pos);
        parse_edge(&right, key, pos + 1, key_len, dict)?;
    }
    Ok(())
}

/// Follows `key` down a serialized dictionary without parsing it whole.
///
/// Returns every edge cell on the path plus the value, or `None` when the
/// key is absent.
pub fn lookup_path(
    root: &Arc<Cell>,
    key: u64,
    key_len: usize,
) -> Result<Option<(Vec<Arc<Cell>>, Arc<Cell>)>> {
    let mut key_bits = BitString::with_capacity(key_len);
    key_bits.write_uint(key, key_len)?;
    let key = key_bits.data().to_vec();

    let mut path = Vec::new();
    let mut cell = root.clone();
    let mut pos = 0;
    loop {
        path.push(cell.clone());
        let mut slice = Slice::new(cell.clone());
        let (label, len) = read_label(&mut slice, key_len - pos)?;
        for i in 0..len {
            if bit_at(&label, i) != bit_at(&key, pos + i) {
                return Ok(None);
            }
        }
        pos += len;
        if pos == key_len {
            return Ok(Some((path, slice.load_ref()?)));
        }
        let left = slice.load_ref()?;
        let right = slice.load_ref()?;
        cell = if bit_at(&key, pos) { right } else { left };
        pos += 1;
    }
}

/// In-memory dictionary with fixed-width bit keys and cell values.
///
/// Entries iterate in insertion order; `build` sorts them by key, so the
/// serialized trie is canonical no matter the insertion order.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    key_len: usize,
    entries: Vec<(Vec<u8>, Arc<Cell>)>,
    index: HashMap<Vec<u8>, usize>,
}

impl Dict {
    /// Creates an empty dictionary with `key_len`-bit keys.
    pub fn new(key_len: usize) -> Self {
        Self {
            key_len,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Normalizes a key to exactly `key_len` bits, MSB-aligned.
    fn normalize_key(&self, key: &BitString) -> Result<Vec<u8>> {
        if key.used_bits() != self.key_len {
            return Err(CellError::MalformedLabel);
        }
        Ok(copy_bits(key.data(), 0, self.key_len))
    }

    fn uint_key(&self, key: u64) -> Result<Vec<u8>> {
        let mut bits = BitString::with_capacity(self.key_len);
        bits.write_uint(key, self.key_len)?;
        Ok(bits.data().to_vec())
    }

    /// Replaces an existing entry in place or appends a new one.
    fn insert(&mut self, key: Vec<u8>, value: Arc<Cell>) {
        match self.index.get(&key) {
            Some(&at) => self.entries[at].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    /// Inserts or replaces an entry.
    pub fn set(&mut self, key: &BitString, value: Arc<Cell>) -> Result<()> {
        let key = self.normalize_key(key)?;
        self.insert(key, value);
        Ok(())
    }

    /// Inserts or replaces an entry under an unsigned integer key.
    pub fn set_uint(&mut self, key: u64, value: Arc<Cell>) -> Result<()> {
        let key = self.uint_key(key)?;
        self.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &BitString) -> Result<Option<&Arc<Cell>>> {
        let key = self.normalize_key(key)?;
        Ok(self.index.get(&key).map(|&at| &self.entries[at].1))
    }

    pub fn get_uint(&self, key: u64) -> Result<Option<&Arc<Cell>>> {
        let key = self.uint_key(key)?;
        Ok(self.index.get(&key).map(|&at| &self.entries[at].1))
    }

    pub fn remove_uint(&mut self, key: u64) -> Result<Option<Arc<Cell>>> {
        let key = self.uint_key(key)?;
        let Some(at) = self.index.remove(&key) else {
            return Ok(None);
        };
        let (_, value) = self.entries.remove(at);
        for slot in self.index.values_mut() {
            if *slot > at {
                *slot -= 1;
            }
        }
        Ok(Some(value))
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (BitString, &Arc<Cell>)> {
        self.entries
            .iter()
            .map(|(key, value)| (BitString::frozen(key.clone(), self.key_len), value))
    }

    /// Serializes the non-empty root form; an empty map has no such form.
    pub fn build(&self) -> Result<Arc<Cell>> {
        if self.entries.is_empty() {
            return Err(CellError::EmptyDict);
        }
        let mut entries: Vec<_> = self.entries.iter().map(|(key, value)| (key, value)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        build_edge(&entries, 0, self.key_len)
    }

    /// Serializes into the optional root used by the maybe-ref form.
    pub fn build_root(&self) -> Result<Option<Arc<Cell>>> {
        if self.entries.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.build()?))
        }
    }

    /// Parses a non-empty root cell back into a map.
    pub fn parse(root: &Arc<Cell>, key_len: usize) -> Result<Self> {
        let mut dict = Self::new(key_len);
        let key = vec![0u8; key_len.div_ceil(8)];
        parse_edge(root, key, 0, key_len, &mut dict)?;
        Ok(dict)
    }

    /// Parses the optional root form.
    pub fn parse_root(root: Option<&Arc<Cell>>, key_len: usize) -> Result<Self> {
        match root {
            Some(root) => Self::parse(root, key_len),
            None => Ok(Self::new(key_len)),
        }
    }
}

/// Dictionary whose edges additionally aggregate an extra cell upward.
///
/// Leaves carry an extra next to their value; forks carry the combination of
/// their children's extras, computed by the closure given at build time.
#[derive(Debug, Clone, Default)]
pub struct AugDict {
    key_len: usize,
    entries: Vec<(Vec<u8>, (Arc<Cell>, Arc<Cell>))>,
    index: HashMap<Vec<u8>, usize>,
}

/// Combines the extras of two sibling subtrees into the fork's extra.
pub type AugCombine<'a> = &'a dyn Fn(&Arc<Cell>, &Arc<Cell>) -> Result<Arc<Cell>>;

fn build_aug_edge(
    entries: &[(&Vec<u8>, &(Arc<Cell>, Arc<Cell>))],
    pos: usize,
    key_len: usize,
    combine: AugCombine<'_>,
) -> Result<(Arc<Cell>, Arc<Cell>)> {
    let m = key_len - pos;
    let first = entries[0].0;
    let common = if entries.len() == 1 {
        m
    } else {
        let last = entries[entries.len() - 1].0;
        let mut common = 0;
        while common < m && bit_at(first, pos + common) == bit_at(last, pos + common) {
            common += 1;
        }
        common
    };

    let mut builder = Builder::new();
    let label = copy_bits(first, pos, common);
    store_label(&mut builder, &label, common, m)?;
    let extra = if entries.len() == 1 {
        let (extra, value) = entries[0].1;
        builder.store_ref(extra.clone())?;
        builder.store_ref(value.clone())?;
        extra.clone()
    } else {
        let split = entries.partition_point(|(key, _)| !bit_at(key, pos + common));
        let (left, left_extra) =
            build_aug_edge(&entries[..split], pos + common + 1, key_len, combine)?;
        let (right, right_extra) =
            build_aug_edge(&entries[split..], pos + common + 1, key_len, combine)?;
        let extra = combine(&left_extra, &right_extra)?;
        builder.store_ref(left)?;
        builder.store_ref(right)?;
        builder.store_ref(extra.clone())?;
        extra
    };
    Ok((builder.build()?, extra))
}

/// Recursively parses one augmented edge, returning the edge's aggregate.
fn parse_aug_edge(
    cell: &Arc<Cell>,
    key: Vec<u8>,
    pos: usize,
    key_len: usize,
    dict: &mut AugDict,
) -> Result<Arc<Cell>> {
    let mut slice = Slice::new(cell.clone());
    let (label, len) = read_label(&mut slice, key_len - pos)?;
    let mut key = key;
    for i in 0..len {
        if bit_at(&label, i) {
            set_bit(&mut key, pos + i);
        }
    }
    let pos = pos + len;
    if pos == key_len {
        let extra = slice.load_ref()?;
        let value = slice.load_ref()?;
        dict.insert(key, (extra.clone(), value));
        Ok(extra)
    } else {
        let left = slice.load_ref()?;
        let right = slice.load_ref()?;
        let extra = slice.load_ref()?;
        parse_aug_edge(&left, key.clone(), pos + 1, key_len, dict)?;
        let mut key = key;
        set_bit(&mut key, pos);
        parse_aug_edge(&right, key, pos + 1, key_len, dict)?;
        Ok(extra)
    }
}

impl AugDict {
    pub fn new(key_len: usize) -> Self {
        Self {
            key_len,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, key: Vec<u8>, entry: (Arc<Cell>, Arc<Cell>)) {
        match self.index.get(&key) {
            Some(&at) => self.entries[at].1 = entry,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, entry));
            }
        }
    }

    /// Inserts an entry with its extra under an unsigned integer key.
    pub fn set_uint(&mut self, key: u64, extra: Arc<Cell>, value: Arc<Cell>) -> Result<()> {
        let mut bits = BitString::with_capacity(self.key_len);
        bits.write_uint(key, self.key_len)?;
        self.insert(bits.data().to_vec(), (extra, value));
        Ok(())
    }

    pub fn get_uint(&self, key: u64) -> Result<Option<&(Arc<Cell>, Arc<Cell>)>> {
        let mut bits = BitString::with_capacity(self.key_len);
        bits.write_uint(key, self.key_len)?;
        Ok(self.index.get(bits.data()).map(|&at| &self.entries[at].1))
    }

    /// Serializes the root, returning it with the root-level aggregate.
    pub fn build(&self, combine: AugCombine<'_>) -> Result<(Arc<Cell>, Arc<Cell>)> {
        if self.entries.is_empty() {
            return Err(CellError::EmptyDict);
        }
        let mut entries: Vec<_> = self.entries.iter().map(|(key, entry)| (key, entry)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        build_aug_edge(&entries, 0, self.key_len, combine)
    }

    /// Parses a root back into a map, returning it with the root aggregate.
    pub fn parse(root: &Arc<Cell>, key_len: usize) -> Result<(Self, Arc<Cell>)> {
        let mut dict = Self::new(key_len);
        let key = vec![0u8; key_len.div_ceil(8)];
        let root_extra = parse_aug_edge(root, key, 0, key_len, &mut dict)?;
        Ok((dict, root_extra))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_cell(value: u64) -> Arc<Cell> {
        let mut builder = Builder::new();
        builder.store_uint(value, 32).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_label_roundtrip() {
        for (text, m) in [
            ("", 0),
            ("", 9),
            ("1", 9),
            ("0000", 9),
            ("1111111", 9),
            ("010101010", 9),
            ("110", 256),
            ("0000000000000000", 256),
        ] {
            let mut builder = Builder::new();
            let mut bits = BitString::new();
            bits.write_bits_str(text).unwrap();
            store_label(&mut builder, bits.data(), bits.used_bits(), m).unwrap();
            let mut slice = Slice::new(builder.build().unwrap());
            let (label, len) = read_label(&mut slice, m).unwrap();
            assert_eq!(len, text.len());
            assert_eq!(BitString::frozen(label, len).to_string(), text);
            assert_eq!(slice.remaining_bits(), 0);
        }
    }

    #[test]
    fn test_label_too_long_rejected() {
        // hml_short with a unary length exceeding the remaining key width
        let mut builder = Builder::new();
        builder.store_bits_str("0").unwrap();
        builder.store_bits_str("11110").unwrap();
        builder.store_bits_str("1010").unwrap();
        let mut slice = Slice::new(builder.build().unwrap());
        assert_eq!(
            read_label(&mut slice, 3).err(),
            Some(CellError::MalformedLabel)
        );
    }

    #[test]
    fn test_roundtrip_uint_keys() {
        let mut dict = Dict::new(9);
        for key in [100u64, 200, 300, 400] {
            dict.set_uint(key, value_cell(key * 7)).unwrap();
        }
        let root = dict.build().unwrap();
        let parsed = Dict::parse(&root, 9).unwrap();
        assert_eq!(parsed.len(), 4);
        for key in [100u64, 200, 300, 400] {
            let value = parsed.get_uint(key).unwrap().unwrap();
            let mut slice = Slice::new(value.clone());
            assert_eq!(slice.load_uint(32).unwrap(), key * 7);
        }
    }

    #[test]
    fn test_canonical_independent_of_insertion_order() {
        let keys = [42u64, 7, 255, 128, 1];
        let mut forward = Dict::new(16);
        for &key in &keys {
            forward.set_uint(key, value_cell(key)).unwrap();
        }
        let mut backward = Dict::new(16);
        for &key in keys.iter().rev() {
            backward.set_uint(key, value_cell(key)).unwrap();
        }
        assert_eq!(forward.build().unwrap().hash(), backward.build().unwrap().hash());
    }

    #[test]
    fn test_single_entry() {
        let mut dict = Dict::new(64);
        dict.set_uint(0xdead_beef, value_cell(1)).unwrap();
        let root = dict.build().unwrap();
        let parsed = Dict::parse(&root, 64).unwrap();
        assert!(parsed.get_uint(0xdead_beef).unwrap().is_some());
        assert!(parsed.get_uint(0xdead_beee).unwrap().is_none());
    }

    #[test]
    fn test_empty_dict() {
        let dict = Dict::new(8);
        assert_eq!(dict.build().err(), Some(CellError::EmptyDict));
        assert_eq!(dict.build_root().unwrap(), None);
        let parsed = Dict::parse_root(None, 8).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_replace_and_remove() {
        let mut dict = Dict::new(8);
        dict.set_uint(5, value_cell(1)).unwrap();
        dict.set_uint(5, value_cell(2)).unwrap();
        assert_eq!(dict.len(), 1);
        assert!(dict.remove_uint(5).unwrap().is_some());
        assert!(dict.is_empty());
    }

    #[test]
    fn test_dense_keys() {
        let mut dict = Dict::new(8);
        for key in 0u64..=255 {
            dict.set_uint(key, value_cell(key)).unwrap();
        }
        let root = dict.build().unwrap();
        let parsed = Dict::parse(&root, 8).unwrap();
        assert_eq!(parsed.len(), 256);
    }

    #[test]
    fn test_aug_dict_aggregate() {
        fn extra_cell(value: u64) -> Arc<Cell> {
            let mut builder = Builder::new();
            builder.store_uint(value, 64).unwrap();
            builder.build().unwrap()
        }
        let sum: AugCombine<'_> = &|a, b| {
            let left = Slice::new(a.clone()).load_uint(64)?;
            let right = Slice::new(b.clone()).load_uint(64)?;
            let mut builder = Builder::new();
            builder.store_uint(left + right, 64)?;
            builder.build()
        };

        let mut dict = AugDict::new(8);
        for key in [1u64, 2, 3, 4] {
            dict.set_uint(key, extra_cell(key * 10), value_cell(key)).unwrap();
        }
        let (root, root_extra) = dict.build(sum).unwrap();
        assert_eq!(Slice::new(root_extra.clone()).load_uint(64).unwrap(), 100);

        let (parsed, parsed_extra) = AugDict::parse(&root, 8).unwrap();
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed_extra.hash(), root_extra.hash());
        assert_eq!(Slice::new(parsed_extra).load_uint(64).unwrap(), 100);
        let (extra, _) = parsed.get_uint(3).unwrap().unwrap();
        assert_eq!(Slice::new(extra.clone()).load_uint(64).unwrap(), 30);
    }

    #[test]
    fn test_iteration_follows_insertion_order() {
        let mut dict = Dict::new(16);
        for key in [42u64, 7, 255] {
            dict.set_uint(key, value_cell(key)).unwrap();
        }
        // replacing keeps the original slot
        dict.set_uint(7, value_cell(70)).unwrap();
        let keys: Vec<u64> = dict
            .iter()
            .map(|(mut key, _)| key.read_uint(16).unwrap())
            .collect();
        assert_eq!(keys, [42, 7, 255]);

        dict.remove_uint(7).unwrap();
        dict.set_uint(7, value_cell(7)).unwrap();
        let keys: Vec<u64> = dict
            .iter()
            .map(|(mut key, _)| key.read_uint(16).unwrap())
            .collect();
        assert_eq!(keys, [42, 255, 7]);
    }
}
