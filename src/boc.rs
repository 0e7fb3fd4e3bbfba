//! Bag of cells serialization
//!
//! A bag of cells is the flat byte format for a cell DAG: a header, a list
//! of root indices, an optional offset index, the cell records in
//! topological order and an optional CRC-32C trailer. Shared subtrees are
//! stored once; sharing is decided by node identity, so two structurally
//! equal but separately built cells serialize as two records.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, trace};

use crate::cell::{Cell, CellType};
use crate::crc::CRC32C;
use crate::error::{CellError, Result};
use crate::level_mask::CellDescriptor;

/// Magic value every bag of cells starts with.
pub const BOC_MAGIC: u32 = 0xb5ee9c72;

const FLAG_HAS_IDX: u8 = 0b1000_0000;
const FLAG_HAS_CRC32C: u8 = 0b0100_0000;
const FLAG_HAS_CACHE_BITS: u8 = 0b0010_0000;

/// Optional sections of the serialized form.
#[derive(Debug, Clone, Copy, Default)]
pub struct BocOptions {
    /// Emit the per-cell offset index.
    pub has_idx: bool,
    /// Append the CRC-32C trailer.
    pub has_crc32c: bool,
}

/// Minimal number of bytes needed to store `value` big-endian, at least one.
fn bytes_needed(value: u64) -> usize {
    (((64 - value.leading_zeros()) as usize).div_ceil(8)).max(1)
}

/// Appends `size` big-endian bytes of `value`.
fn write_uint(out: &mut Vec<u8>, value: u64, size: usize) {
    out.extend_from_slice(&value.to_be_bytes()[8 - size..]);
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(CellError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_uint(&mut self, size: usize) -> Result<u64> {
        let bytes = self.read_bytes(size)?;
        Ok(bytes.iter().fold(0u64, |acc, &b| acc << 8 | b as u64))
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }
}

/// Collects every distinct cell reachable from `roots` in topological
/// order: each cell strictly precedes all of its references.
///
/// Distinctness is by node identity, not by hash.
fn index_cells(roots: &[Arc<Cell>]) -> (Vec<Arc<Cell>>, HashMap<*const Cell, usize>) {
    let mut post_order = Vec::new();
    let mut seen = HashMap::new();
    // (cell, next child to descend into)
    let mut stack: Vec<(Arc<Cell>, usize)> = Vec::new();

    for root in roots {
        if seen.contains_key(&Arc::as_ptr(root)) {
            continue;
        }
        seen.insert(Arc::as_ptr(root), usize::MAX);
        stack.push((root.clone(), 0));
        while let Some((cell, child)) = stack.pop() {
            match cell.reference(child) {
                Some(reference) => {
                    stack.push((cell.clone(), child + 1));
                    if !seen.contains_key(&Arc::as_ptr(reference)) {
                        seen.insert(Arc::as_ptr(reference), usize::MAX);
                        stack.push((reference.clone(), 0));
                    }
                }
                None => post_order.push(cell),
            }
        }
    }

    post_order.reverse();
    for (index, cell) in post_order.iter().enumerate() {
        seen.insert(Arc::as_ptr(cell), index);
    }
    (post_order, seen)
}

/// Serializes a single root with the default layout.
pub fn serialize_boc(root: &Arc<Cell>, has_crc32c: bool) -> Result<Vec<u8>> {
    serialize_boc_ext(
        std::slice::from_ref(root),
        BocOptions {
            has_idx: false,
            has_crc32c,
        },
    )
}

/// Serializes one or more roots.
pub fn serialize_boc_ext(roots: &[Arc<Cell>], options: BocOptions) -> Result<Vec<u8>> {
    if roots.is_empty() {
        return Err(CellError::InvalidBoc("no roots"));
    }
    let (cells, indices) = index_cells(roots);
    debug!(
        "serializing boc: {} roots, {} cells",
        roots.len(),
        cells.len()
    );

    let ref_size = bytes_needed(cells.len() as u64);
    let mut records = Vec::new();
    let mut offsets = Vec::with_capacity(cells.len());
    for cell in &cells {
        let descriptor = cell.descriptor();
        records.push(descriptor.d1);
        records.push(descriptor.d2);
        records.extend_from_slice(&cell.serialize_data());
        for reference in cell.references() {
            write_uint(&mut records, indices[&Arc::as_ptr(reference)] as u64, ref_size);
        }
        offsets.push(records.len() as u64);
    }
    let off_bytes = bytes_needed(records.len() as u64);

    let mut out = Vec::with_capacity(records.len() + 32);
    out.extend_from_slice(&BOC_MAGIC.to_be_bytes());
    let mut flags = ref_size as u8;
    if options.has_idx {
        flags |= FLAG_HAS_IDX;
    }
    if options.has_crc32c {
        flags |= FLAG_HAS_CRC32C;
    }
    out.push(flags);
    out.push(off_bytes as u8);
    write_uint(&mut out, cells.len() as u64, ref_size);
    write_uint(&mut out, roots.len() as u64, ref_size);
    write_uint(&mut out, 0, ref_size); // absent cells
    write_uint(&mut out, records.len() as u64, off_bytes);
    for root in roots {
        write_uint(&mut out, indices[&Arc::as_ptr(root)] as u64, ref_size);
    }
    if options.has_idx {
        for offset in &offsets {
            write_uint(&mut out, *offset, off_bytes);
        }
    }
    out.extend_from_slice(&records);
    if options.has_crc32c {
        let crc = CRC32C.checksum(&out);
        out.extend_from_slice(&crc.to_le_bytes());
    }
    Ok(out)
}

/// Parsed shape of one cell record before the cells are linked up.
struct RawCell<'a> {
    descriptor: CellDescriptor,
    data: &'a [u8],
    bit_len: usize,
    references: Vec<usize>,
}

/// Deserializes a bag of cells expected to hold exactly one root.
pub fn deserialize_boc(data: &[u8]) -> Result<Arc<Cell>> {
    let mut roots = deserialize_boc_ext(data)?;
    match roots.len() {
        1 => Ok(roots.swap_remove(0)),
        _ => Err(CellError::InvalidBoc("expected a single root")),
    }
}

/// Deserializes a bag of cells, returning every root.
pub fn deserialize_boc_ext(data: &[u8]) -> Result<Vec<Arc<Cell>>> {
    let mut reader = ByteReader::new(data);
    let magic = reader.read_uint(4)? as u32;
    if magic != BOC_MAGIC {
        return Err(CellError::InvalidMagic(magic));
    }
    let flags = reader.read_uint(1)? as u8;
    let has_idx = flags & FLAG_HAS_IDX != 0;
    let has_crc32c = flags & FLAG_HAS_CRC32C != 0;
    let has_cache_bits = flags & FLAG_HAS_CACHE_BITS != 0;
    let ref_size = (flags & 0b111) as usize;
    if ref_size == 0 || ref_size > 4 {
        return Err(CellError::InvalidBoc("bad ref size"));
    }
    if has_cache_bits && !has_idx {
        return Err(CellError::InvalidBoc("cache bits without index"));
    }
    let off_bytes = reader.read_uint(1)? as usize;
    if off_bytes == 0 || off_bytes > 8 {
        return Err(CellError::InvalidBoc("bad offset size"));
    }

    let cell_count = reader.read_uint(ref_size)? as usize;
    let root_count = reader.read_uint(ref_size)? as usize;
    let absent_count = reader.read_uint(ref_size)? as usize;
    if absent_count != 0 {
        return Err(CellError::AbsentCell);
    }
    if root_count == 0 {
        return Err(CellError::InvalidBoc("no roots"));
    }
    let tot_cells_size = reader.read_uint(off_bytes)?;

    let mut root_indices = Vec::with_capacity(root_count);
    for _ in 0..root_count {
        let index = reader.read_uint(ref_size)? as usize;
        if index >= cell_count {
            return Err(CellError::InvalidBoc("root index out of range"));
        }
        root_indices.push(index);
    }
    if has_idx {
        reader.skip(cell_count * off_bytes)?;
    }

    if has_crc32c {
        if data.len() < 4 {
            return Err(CellError::UnexpectedEof);
        }
        let body = &data[..data.len() - 4];
        let expected = u32::from_le_bytes([
            data[data.len() - 4],
            data[data.len() - 3],
            data[data.len() - 2],
            data[data.len() - 1],
        ]);
        let actual = CRC32C.checksum(body);
        if expected != actual {
            return Err(CellError::ChecksumMismatch { expected, actual });
        }
    }

    trace!("parsing {cell_count} cell records");
    let records_start = reader.pos;
    let mut raw_cells = Vec::with_capacity(cell_count);
    for index in 0..cell_count {
        let d1 = reader.read_uint(1)? as u8;
        let d2 = reader.read_uint(1)? as u8;
        let descriptor = CellDescriptor::new(d1, d2);
        descriptor.validate()?;
        if descriptor.store_hashes() {
            let pairs = descriptor.level_mask().hash_count();
            reader.skip(pairs * (32 + 2))?;
        }
        let payload = reader.read_bytes(descriptor.byte_len())?;
        let bit_len = if descriptor.is_aligned() {
            descriptor.byte_len() * 8
        } else {
            unpadded_bit_len(payload)?
        };
        let mut references = Vec::with_capacity(descriptor.ref_count());
        for _ in 0..descriptor.ref_count() {
            let reference = reader.read_uint(ref_size)? as usize;
            if reference >= cell_count {
                return Err(CellError::InvalidBoc("reference index out of range"));
            }
            if reference <= index {
                return Err(CellError::InvalidRefOrder {
                    cell: index,
                    reference,
                });
            }
            references.push(reference);
        }
        raw_cells.push(RawCell {
            descriptor,
            data: payload,
            bit_len,
            references,
        });
    }
    if (reader.pos - records_start) as u64 != tot_cells_size {
        return Err(CellError::InvalidBoc("cell records size mismatch"));
    }
    let trailer = if has_crc32c { 4 } else { 0 };
    if data.len() != reader.pos + trailer {
        return Err(CellError::InvalidBoc("trailing bytes after cell records"));
    }

    // references only point forward, so building backward resolves them all
    let mut cells: Vec<Option<Arc<Cell>>> = vec![None; cell_count];
    for (index, raw) in raw_cells.iter().enumerate().rev() {
        let mut references = Vec::with_capacity(raw.references.len());
        for &reference in &raw.references {
            match &cells[reference] {
                Some(cell) => references.push(cell.clone()),
                None => return Err(CellError::InvalidBoc("unresolved reference")),
            }
        }
        let cell_type = if raw.descriptor.is_exotic() {
            if raw.bit_len < 8 {
                return Err(CellError::InvalidExoticCell("missing cell type tag"));
            }
            CellType::from_byte(raw.data[0])?
        } else {
            CellType::Ordinary
        };
        let cell = Cell::finalize(raw.data.to_vec(), raw.bit_len, references, cell_type)?;
        if cell.descriptor().level_mask() != raw.descriptor.level_mask() {
            return Err(CellError::InvalidBoc("level mask mismatch"));
        }
        cells[index] = Some(cell.into());
    }

    let mut roots = Vec::with_capacity(root_count);
    for index in root_indices {
        match &cells[index] {
            Some(cell) => roots.push(cell.clone()),
            None => return Err(CellError::InvalidBoc("unresolved root")),
        }
    }
    Ok(roots)
}

/// Strips the completion tag from an unaligned payload.
fn unpadded_bit_len(payload: &[u8]) -> Result<usize> {
    let last = *payload.last().ok_or(CellError::UnexpectedEof)?;
    if last == 0 {
        return Err(CellError::InvalidBoc("missing completion tag"));
    }
    Ok(payload.len() * 8 - last.trailing_zeros() as usize - 1)
}

/// Serializes a root and renders it as lowercase hex.
pub fn serialize_boc_hex(root: &Arc<Cell>, has_crc32c: bool) -> Result<String> {
    Ok(hex::encode(serialize_boc(root, has_crc32c)?))
}

/// Serializes a root and renders it as standard base64.
pub fn serialize_boc_base64(root: &Arc<Cell>, has_crc32c: bool) -> Result<String> {
    Ok(STANDARD.encode(serialize_boc(root, has_crc32c)?))
}

/// Deserializes a hex-rendered bag of cells.
pub fn deserialize_boc_hex(data: &str) -> Result<Arc<Cell>> {
    deserialize_boc(&hex::decode(data).map_err(|_| CellError::InvalidHex)?)
}

/// Deserializes a base64-rendered bag of cells.
pub fn deserialize_boc_base64(data: &str) -> Result<Arc<Cell>> {
    deserialize_boc(&STANDARD.decode(data).map_err(|_| CellError::InvalidBase64)?)
}
