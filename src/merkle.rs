//! Merkle proofs and updates
//!
//! A Merkle proof certifies that some part of a tree belongs to a root with
//! a known hash: unneeded subtrees are replaced by pruned branches that
//! carry only the hashes and depths of what they stand for. The proof cell's
//! level-0 hash of its child then equals the original root's representation
//! hash. A Merkle update certifies an old-root/new-root transition the same
//! way.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::builder::Builder;
use crate::cell::{Cell, CellHash, CellType};
use crate::dict;
use crate::error::Result;
use crate::level_mask::LevelMask;
use crate::slice::Slice;

/// Replaces a subtree with a stand-in carrying its hashes and depths.
///
/// `merkle_depth` is the nesting depth of the Merkle cell this pruned branch
/// will live under; 0 for a directly enclosing proof or update.
pub fn make_pruned_branch(cell: &Arc<Cell>, merkle_depth: u8) -> Result<Arc<Cell>> {
    let mask = LevelMask::new(cell.level_mask().to_byte() | 1 << merkle_depth);

    let mut builder = Builder::new();
    builder.set_exotic(CellType::PrunedBranch);
    builder.store_byte(CellType::PrunedBranch.to_byte())?;
    builder.store_byte(mask.to_byte())?;
    for level in 0..mask.level() {
        if mask.is_significant(level) {
            builder.store_bytes(&cell.hash_at_level(level))?;
        }
    }
    for level in 0..mask.level() {
        if mask.is_significant(level) {
            builder.store_uint(cell.depth_at_level(level) as u64, 16)?;
        }
    }
    builder.build()
}

/// Whether any cell in the subtree passes the filter, memoized by hash.
///
/// Walks with an explicit stack; the DAG can be deeper than the call stack
/// allows.
fn subtree_contains(
    root: &Arc<Cell>,
    filter: &impl Fn(&CellHash) -> bool,
    memo: &mut HashMap<CellHash, bool>,
) -> bool {
    // (cell, next child to descend into)
    let mut stack = vec![(root.clone(), 0usize)];
    while let Some((cell, child)) = stack.pop() {
        let hash = cell.hash();
        if child == 0 && memo.contains_key(&hash) {
            continue;
        }
        match cell.reference(child) {
            Some(reference) => {
                stack.push((cell.clone(), child + 1));
                if !memo.contains_key(&reference.hash()) {
                    stack.push((reference.clone(), 0));
                }
            }
            None => {
                // every child finished before this frame resumed
                let contains = filter(&hash)
                    || cell
                        .references()
                        .iter()
                        .any(|child| memo.get(&child.hash()).copied().unwrap_or(false));
                memo.insert(hash, contains);
            }
        }
    }
    memo.get(&root.hash()).copied().unwrap_or(false)
}

/// Rebuilds a subtree, pruning every child whose subtree the filter rejects.
fn filter_subtree(
    root: &Arc<Cell>,
    merkle_depth: u8,
    filter: &impl Fn(&CellHash) -> bool,
    memo: &mut HashMap<CellHash, bool>,
) -> Result<Arc<Cell>> {
    // post-order over (cell, merkle depth, next child); finished subtrees
    // accumulate on a value stack in child order
    let mut stack = vec![(root.clone(), merkle_depth, 0usize)];
    let mut rebuilt: Vec<Arc<Cell>> = Vec::new();
    while let Some((cell, depth, child)) = stack.pop() {
        let child_depth = depth + cell.cell_type().is_merkle() as u8;
        match cell.reference(child) {
            Some(reference) => {
                stack.push((cell.clone(), depth, child + 1));
                if subtree_contains(reference, filter, memo) {
                    stack.push((reference.clone(), child_depth, 0));
                } else {
                    rebuilt.push(make_pruned_branch(reference, child_depth)?);
                }
            }
            None => {
                let mut builder = Builder::new();
                if cell.is_exotic() {
                    builder.set_exotic(cell.cell_type());
                }
                builder.store_bits(cell.data(), cell.bit_len())?;
                for child in rebuilt.split_off(rebuilt.len() - cell.reference_count()) {
                    builder.store_ref(child)?;
                }
                rebuilt.push(builder.build()?);
            }
        }
    }
    match rebuilt.pop() {
        Some(cell) => Ok(cell),
        None => unreachable!(),
    }
}

/// A parsed Merkle proof: the stored (hash, depth) pair and its subtree.
#[derive(Debug, Clone)]
pub struct MerkleProof {
    pub hash: CellHash,
    pub depth: u16,
    pub subtree: Arc<Cell>,
}

impl MerkleProof {
    /// Wraps an already-pruned subtree into a proof cell.
    pub fn wrap(subtree: Arc<Cell>) -> Result<Arc<Cell>> {
        let mut builder = Builder::new();
        builder.set_exotic(CellType::MerkleProof);
        builder.store_byte(CellType::MerkleProof.to_byte())?;
        builder.store_bytes(&subtree.hash_at_level(0))?;
        builder.store_uint(subtree.depth_at_level(0) as u64, 16)?;
        builder.store_ref(subtree)?;
        builder.build()
    }

    /// Builds a proof for `root` keeping every subtree the filter selects.
    ///
    /// The root itself is always kept; a child subtree survives when it or
    /// any of its descendants passes the filter, otherwise it collapses into
    /// a pruned branch.
    pub fn create(root: &Arc<Cell>, filter: impl Fn(&CellHash) -> bool) -> Result<Arc<Cell>> {
        let mut memo = HashMap::new();
        let subtree = filter_subtree(root, 0, &filter, &mut memo)?;
        Self::wrap(subtree)
    }

    /// Builds a proof that a dictionary maps `key` to its value, keeping
    /// only the edge cells on the key's path and the value itself.
    pub fn create_for_dict_key(
        root: &Arc<Cell>,
        key: u64,
        key_len: usize,
    ) -> Result<Arc<Cell>> {
        let mut keep = HashSet::new();
        if let Some((path, value)) = dict::lookup_path(root, key, key_len)? {
            for cell in path {
                keep.insert(cell.hash());
            }
            keep.insert(value.hash());
        }
        Self::create(root, |hash| keep.contains(hash))
    }

    /// Destructures a proof cell. The stored pair is already known to match
    /// the subtree, that was checked when the cell was frozen.
    pub fn parse(cell: &Arc<Cell>) -> Result<Self> {
        cell.expect_type(CellType::MerkleProof)?;
        let mut slice = Slice::new(cell.clone());
        slice.skip_bits(8)?;
        let bytes = slice.load_bytes(32)?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        let depth = slice.load_uint(16)? as u16;
        let subtree = slice.load_ref()?;
        Ok(Self {
            hash,
            depth,
            subtree,
        })
    }
}

/// A parsed Merkle update: old and new (hash, depth) pairs with their
/// subtrees.
#[derive(Debug, Clone)]
pub struct MerkleUpdate {
    pub old_hash: CellHash,
    pub old_depth: u16,
    pub new_hash: CellHash,
    pub new_depth: u16,
    pub old: Arc<Cell>,
    pub new: Arc<Cell>,
}

impl MerkleUpdate {
    /// Builds an update from `old` to `new`.
    ///
    /// The old side collapses into a single pruned branch; on the new side
    /// every subtree already present in the old tree is pruned, since the
    /// receiver can reconstruct it.
    pub fn create(old: &Arc<Cell>, new: &Arc<Cell>) -> Result<Arc<Cell>> {
        let mut old_hashes = HashSet::new();
        collect_hashes(old, &mut old_hashes);

        let old_side = make_pruned_branch(old, 0)?;
        let mut memo = HashMap::new();
        let new_side = filter_subtree(new, 0, &|hash| !old_hashes.contains(hash), &mut memo)?;

        let mut builder = Builder::new();
        builder.set_exotic(CellType::MerkleUpdate);
        builder.store_byte(CellType::MerkleUpdate.to_byte())?;
        builder.store_bytes(&old_side.hash_at_level(0))?;
        builder.store_bytes(&new_side.hash_at_level(0))?;
        builder.store_uint(old_side.depth_at_level(0) as u64, 16)?;
        builder.store_uint(new_side.depth_at_level(0) as u64, 16)?;
        builder.store_ref(old_side)?;
        builder.store_ref(new_side)?;
        builder.build()
    }

    /// Destructures an update cell.
    pub fn parse(cell: &Arc<Cell>) -> Result<Self> {
        cell.expect_type(CellType::MerkleUpdate)?;
        let mut slice = Slice::new(cell.clone());
        slice.skip_bits(8)?;
        let mut old_hash = [0u8; 32];
        old_hash.copy_from_slice(&slice.load_bytes(32)?);
        let mut new_hash = [0u8; 32];
        new_hash.copy_from_slice(&slice.load_bytes(32)?);
        let old_depth = slice.load_uint(16)? as u16;
        let new_depth = slice.load_uint(16)? as u16;
        let old = slice.load_ref()?;
        let new = slice.load_ref()?;
        Ok(Self {
            old_hash,
            old_depth,
            new_hash,
            new_depth,
            old,
            new,
        })
    }
}

fn collect_hashes(root: &Arc<Cell>, out: &mut HashSet<CellHash>) {
    let mut stack = vec![root.clone()];
    while let Some(cell) = stack.pop() {
        if out.insert(cell.hash()) {
            stack.extend(cell.references().iter().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boc::{deserialize_boc, serialize_boc};
    use crate::dict::Dict;

    fn leaf(value: u64) -> Arc<Cell> {
        let mut builder = Builder::new();
        builder.store_uint(value, 32).unwrap();
        builder.build().unwrap()
    }

    fn fork(left: Arc<Cell>, right: Arc<Cell>) -> Arc<Cell> {
        let mut builder = Builder::new();
        builder.store_ref(left).unwrap();
        builder.store_ref(right).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_pruned_branch_carries_hash_and_depth() {
        let cell = fork(leaf(1), leaf(2));
        let pruned = make_pruned_branch(&cell, 0).unwrap();
        assert_eq!(pruned.cell_type(), CellType::PrunedBranch);
        assert_eq!(pruned.level(), 1);
        assert_eq!(pruned.hash_at_level(0), cell.hash());
        assert_eq!(pruned.depth_at_level(0), cell.depth());
        assert_eq!(pruned.bit_len(), 16 + 256 + 16);
    }

    #[test]
    fn test_proof_preserves_root_hash() {
        let keep = leaf(1);
        let root = fork(keep.clone(), fork(leaf(2), leaf(3)));
        let keep_hash = keep.hash();
        let proof = MerkleProof::create(&root, |hash| *hash == keep_hash).unwrap();

        assert_eq!(proof.cell_type(), CellType::MerkleProof);
        assert_eq!(proof.level(), 0);
        let parsed = MerkleProof::parse(&proof).unwrap();
        assert_eq!(parsed.hash, root.hash());
        assert_eq!(parsed.depth, root.depth());
        // the kept leaf is intact, the sibling subtree is pruned
        let subtree = parsed.subtree;
        assert_eq!(subtree.reference(0).unwrap().hash(), keep_hash);
        assert_eq!(
            subtree.reference(1).unwrap().cell_type(),
            CellType::PrunedBranch
        );
    }

    #[test]
    fn test_proof_survives_boc_roundtrip() {
        let root = fork(leaf(1), fork(leaf(2), leaf(3)));
        let keep = leaf(2).hash();
        let proof = MerkleProof::create(&root, |hash| *hash == keep).unwrap();

        let bytes = serialize_boc(&proof, true).unwrap();
        let parsed = deserialize_boc(&bytes).unwrap();
        assert_eq!(parsed.hash(), proof.hash());
        assert_eq!(
            MerkleProof::parse(&parsed).unwrap().hash,
            root.hash()
        );
    }

    #[test]
    fn test_dict_key_proof() {
        let mut dictionary = Dict::new(9);
        for key in [100u64, 200, 300, 400] {
            dictionary.set_uint(key, leaf(key * 7)).unwrap();
        }
        let root = dictionary.build().unwrap();
        let proof = MerkleProof::create_for_dict_key(&root, 300, 9).unwrap();

        let parsed = MerkleProof::parse(&proof).unwrap();
        assert_eq!(parsed.hash, root.hash());
        // the key's path is still walkable inside the pruned dictionary
        let (_, value) = dict::lookup_path(&parsed.subtree, 300, 9).unwrap().unwrap();
        let mut slice = Slice::new(value);
        assert_eq!(slice.load_uint(32).unwrap(), 2100);
    }

    #[test]
    fn test_update_roundtrip() {
        let shared = leaf(7);
        let old = fork(shared.clone(), leaf(1));
        let new = fork(shared.clone(), leaf(2));
        let update = MerkleUpdate::create(&old, &new).unwrap();

        assert_eq!(update.cell_type(), CellType::MerkleUpdate);
        let parsed = MerkleUpdate::parse(&update).unwrap();
        assert_eq!(parsed.old_hash, old.hash());
        assert_eq!(parsed.new_hash, new.hash());
        // the shared subtree was pruned on the new side
        assert_eq!(
            parsed.new.reference(0).unwrap().cell_type(),
            CellType::PrunedBranch
        );
        assert_eq!(parsed.new.reference(0).unwrap().hash_at_level(0), shared.hash());
    }

    #[test]
    fn test_update_survives_boc_roundtrip() {
        let old = leaf(1);
        let new = fork(leaf(2), leaf(3));
        let update = MerkleUpdate::create(&old, &new).unwrap();
        let bytes = serialize_boc(&update, true).unwrap();
        assert_eq!(deserialize_boc(&bytes).unwrap().hash(), update.hash());
    }

    #[test]
    fn test_deep_chain_proof_and_update() {
        let target = leaf(0xdead);
        let target_hash = target.hash();
        let mut cell = target;
        for i in 0..500u64 {
            let mut builder = Builder::new();
            builder.store_uint(i, 32).unwrap();
            builder.store_ref(cell).unwrap();
            cell = builder.build().unwrap();
        }

        let proof = MerkleProof::create(&cell, |hash| *hash == target_hash).unwrap();
        assert_eq!(MerkleProof::parse(&proof).unwrap().hash, cell.hash());

        let update = MerkleUpdate::create(&cell, &leaf(1)).unwrap();
        assert_eq!(MerkleUpdate::parse(&update).unwrap().old_hash, cell.hash());
    }

    #[test]
    fn test_proof_type_checked() {
        let plain = leaf(1);
        assert!(MerkleProof::parse(&plain).is_err());
        assert!(MerkleUpdate::parse(&plain).is_err());
    }
}
