//! Cell implementation for TON blockchain
//!
//! A cell is the fundamental data structure in TON: up to 1023 bits of
//! payload and up to 4 references to other cells. Cells are immutable once
//! built; their per-level hashes and depths are computed at freeze time and
//! memoized, so a frozen cell is safe to share between threads.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::bits::BitString;
use crate::error::{CellError, Result};
use crate::level_mask::{CellDescriptor, LevelMask, MAX_CELL_LEVEL};

pub use crate::bits::MAX_CELL_BITS;

/// Maximum number of references a cell can have.
pub const MAX_CELL_REFS: usize = 4;

/// SHA-256 digest identifying a cell and its whole subtree.
pub type CellHash = [u8; 32];

const HASH_BITS: usize = 256;
const DEPTH_BITS: usize = 16;

/// Kind of a cell node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum CellType {
    /// Plain data-bearing cell.
    #[default]
    Ordinary,
    /// Stand-in for an omitted subtree, carrying its hashes and depths.
    PrunedBranch,
    /// Reference to a library cell by hash.
    Library,
    /// Certifies that a (partially pruned) subtree hashes to a stored root.
    MerkleProof,
    /// Certifies a before/after pair of subtree roots.
    MerkleUpdate,
}

impl CellType {
    /// Tag byte stored as the first payload byte of an exotic cell.
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Ordinary => 0xff,
            Self::PrunedBranch => 1,
            Self::Library => 2,
            Self::MerkleProof => 3,
            Self::MerkleUpdate => 4,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            1 => Self::PrunedBranch,
            2 => Self::Library,
            3 => Self::MerkleProof,
            4 => Self::MerkleUpdate,
            _ => return Err(CellError::InvalidExoticCell("unknown cell type tag")),
        })
    }

    pub const fn is_exotic(self) -> bool {
        !matches!(self, Self::Ordinary)
    }

    pub const fn is_merkle(self) -> bool {
        matches!(self, Self::MerkleProof | Self::MerkleUpdate)
    }
}

/// An immutable node of a cell DAG.
///
/// Children are held by `Arc`, so the same cell instance may legitimately be
/// referenced from multiple parents; the graph must stay acyclic.
#[derive(Clone)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    references: Vec<Arc<Cell>>,
    cell_type: CellType,
    level_mask: LevelMask,
    /// One (hash, depth) pair per significant level, lowest level first.
    level_info: Vec<(CellHash, u16)>,
}

impl Cell {
    /// Creates an ordinary cell with the given data and bit length.
    pub fn with_data(data: Vec<u8>, bit_len: usize) -> Result<Self> {
        Self::finalize(data, bit_len, Vec::new(), CellType::Ordinary)
    }

    /// Freezes cell parts into an immutable cell, validating structure and
    /// computing every significant-level (hash, depth) pair.
    pub(crate) fn finalize(
        data: Vec<u8>,
        bit_len: usize,
        references: Vec<Arc<Cell>>,
        cell_type: CellType,
    ) -> Result<Self> {
        if bit_len > MAX_CELL_BITS {
            return Err(CellError::BitsOverflow {
                requested: bit_len,
                available: MAX_CELL_BITS,
            });
        }
        if references.len() > MAX_CELL_REFS {
            return Err(CellError::RefsOverflow);
        }
        if data.len() < bit_len.div_ceil(8) {
            return Err(CellError::UnexpectedEof);
        }

        let mut children_mask = LevelMask::EMPTY;
        for reference in &references {
            children_mask |= reference.level_mask;
        }

        let level_mask = match cell_type {
            CellType::Ordinary => children_mask,
            CellType::PrunedBranch => {
                if !references.is_empty() {
                    return Err(CellError::InvalidExoticCell("pruned branch with references"));
                }
                if bit_len < 16 || data[0] != CellType::PrunedBranch.to_byte() {
                    return Err(CellError::InvalidExoticCell("bad pruned branch tag"));
                }
                if data[1] == 0 || data[1] > 7 {
                    return Err(CellError::InvalidExoticCell("bad pruned branch level mask"));
                }
                let mask = LevelMask::new(data[1]);
                let expected = 16 + (mask.hash_count() - 1) * (HASH_BITS + DEPTH_BITS);
                if bit_len != expected {
                    return Err(CellError::InvalidExoticCell("bad pruned branch payload size"));
                }
                mask
            }
            CellType::Library => {
                if !references.is_empty() || bit_len != 8 + HASH_BITS {
                    return Err(CellError::InvalidExoticCell("bad library cell"));
                }
                if data[0] != CellType::Library.to_byte() {
                    return Err(CellError::InvalidExoticCell("bad library cell tag"));
                }
                LevelMask::EMPTY
            }
            CellType::MerkleProof => {
                if references.len() != 1 || bit_len != 8 + HASH_BITS + DEPTH_BITS {
                    return Err(CellError::InvalidExoticCell("bad merkle proof shape"));
                }
                if data[0] != CellType::MerkleProof.to_byte() {
                    return Err(CellError::InvalidExoticCell("bad merkle proof tag"));
                }
                let child = &references[0];
                if data[1..33] != child.hash_at_level(0)
                    || u16::from_be_bytes([data[33], data[34]]) != child.depth_at_level(0)
                {
                    return Err(CellError::InvalidExoticCell("merkle proof hash mismatch"));
                }
                children_mask.shift()
            }
            CellType::MerkleUpdate => {
                if references.len() != 2 || bit_len != 8 + 2 * (HASH_BITS + DEPTH_BITS) {
                    return Err(CellError::InvalidExoticCell("bad merkle update shape"));
                }
                if data[0] != CellType::MerkleUpdate.to_byte() {
                    return Err(CellError::InvalidExoticCell("bad merkle update tag"));
                }
                let depths = &data[65..69];
                for (i, child) in references.iter().enumerate() {
                    if data[1 + i * 32..33 + i * 32] != child.hash_at_level(0)
                        || u16::from_be_bytes([depths[i * 2], depths[i * 2 + 1]])
                            != child.depth_at_level(0)
                    {
                        return Err(CellError::InvalidExoticCell("merkle update hash mismatch"));
                    }
                }
                children_mask.shift()
            }
        };

        let mut cell = Cell {
            data,
            bit_len,
            references,
            cell_type,
            level_mask,
            level_info: Vec::with_capacity(level_mask.hash_count()),
        };
        cell.compute_level_info()?;
        Ok(cell)
    }

    /// Computes the (hash, depth) pair for every significant level.
    ///
    /// The representation at level L is: descriptor bytes recomputed with the
    /// mask projected to L, then the payload (or, for L > 0, the previous
    /// level hash), then every child's depth and hash at L (L + 1 for merkle
    /// kinds). A pruned branch only computes its top-level pair; lower pairs
    /// are read back from its own payload.
    fn compute_level_info(&mut self) -> Result<()> {
        let is_merkle = self.cell_type.is_merkle();
        let is_pruned = self.cell_type == CellType::PrunedBranch;
        let padded = self.serialize_data();

        for level in 0..=MAX_CELL_LEVEL {
            if !self.level_mask.is_significant(level) {
                continue;
            }
            if is_pruned && level < self.level_mask.level() {
                let index = self.level_info.len();
                self.level_info.push(self.pruned_stored(index));
                continue;
            }

            let child_level = level + is_merkle as u8;
            let mut depth = 0u16;
            for reference in &self.references {
                let child_depth = reference
                    .depth_at_level(child_level)
                    .checked_add(1)
                    .ok_or(CellError::DepthOverflow)?;
                depth = depth.max(child_depth);
            }

            let descriptor = CellDescriptor::compute(
                self.references.len(),
                self.cell_type.is_exotic(),
                self.level_mask.apply(level),
                self.bit_len,
            );

            let mut hasher = Sha256::new();
            hasher.update([descriptor.d1, descriptor.d2]);
            match self.level_info.last() {
                Some((previous, _)) if level > 0 && !is_pruned => hasher.update(previous),
                _ => hasher.update(&padded),
            }
            for reference in &self.references {
                hasher.update(reference.depth_at_level(child_level).to_be_bytes());
            }
            for reference in &self.references {
                hasher.update(reference.hash_at_level(child_level));
            }

            self.level_info.push((hasher.finalize().into(), depth));
        }
        Ok(())
    }

    /// Reads the stored (hash, depth) pair at `index` from a pruned branch payload.
    fn pruned_stored(&self, index: usize) -> (CellHash, u16) {
        let stored = self.level_mask.hash_count() - 1;
        let hash_offset = 2 + index * 32;
        let depth_offset = 2 + stored * 32 + index * 2;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.data[hash_offset..hash_offset + 32]);
        let depth = u16::from_be_bytes([self.data[depth_offset], self.data[depth_offset + 1]]);
        (hash, depth)
    }

    /// Returns the cell's data (last byte zero-padded, no completion tag).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the number of bits in the cell.
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Returns the payload as a frozen bit buffer positioned at the start.
    pub fn bits(&self) -> BitString {
        BitString::frozen(self.data.clone(), self.bit_len)
    }

    /// Returns the cell's references.
    pub fn references(&self) -> &[Arc<Cell>] {
        &self.references
    }

    /// Gets a reference by index.
    pub fn reference(&self, index: usize) -> Option<&Arc<Cell>> {
        self.references.get(index)
    }

    /// Returns the number of references.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    /// Returns whether this is an exotic cell.
    pub fn is_exotic(&self) -> bool {
        self.cell_type.is_exotic()
    }

    pub fn level_mask(&self) -> LevelMask {
        self.level_mask
    }

    /// Returns the cell's level, 0..=3.
    pub fn level(&self) -> u8 {
        self.level_mask.level()
    }

    /// Representation hash identifying the cell and its whole subtree.
    pub fn hash(&self) -> CellHash {
        self.hash_at_level(MAX_CELL_LEVEL)
    }

    /// Hash significant at the given Merkle level.
    pub fn hash_at_level(&self, level: u8) -> CellHash {
        self.level_info[self.level_mask.hash_index(level)].0
    }

    /// Depth of the cell: 0 for a leaf, else 1 + max child depth.
    pub fn depth(&self) -> u16 {
        self.depth_at_level(MAX_CELL_LEVEL)
    }

    /// Depth at the given Merkle level.
    pub fn depth_at_level(&self, level: u8) -> u16 {
        self.level_info[self.level_mask.hash_index(level)].1
    }

    /// Computes the cell's descriptor bytes at its own level mask.
    pub fn descriptor(&self) -> CellDescriptor {
        CellDescriptor::compute(
            self.references.len(),
            self.cell_type.is_exotic(),
            self.level_mask,
            self.bit_len,
        )
    }

    /// Serializes the cell data, setting the completion-tag bit when the
    /// payload does not end on a byte boundary.
    pub fn serialize_data(&self) -> Vec<u8> {
        let mut result = self.data[..self.bit_len.div_ceil(8)].to_vec();
        if self.bit_len % 8 != 0 {
            result[self.bit_len / 8] |= 1 << (7 - self.bit_len % 8);
        }
        result
    }

    /// Asserts that this cell has the expected kind.
    pub fn expect_type(&self, expected: CellType) -> Result<()> {
        if self.cell_type != expected {
            return Err(CellError::CellTypeMismatch {
                expected,
                actual: self.cell_type,
            });
        }
        Ok(())
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Cell {}

impl std::hash::Hash for Cell {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(&Cell::hash(self));
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("type", &self.cell_type)
            .field("bits", &self.bits().to_hex())
            .field("refs", &self.references)
            .finish()
    }
}
