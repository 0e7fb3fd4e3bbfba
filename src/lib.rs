//! Cell data structures for the TON blockchain
//!
//! This crate implements the fundamental binary data model:
//! - Cell: the basic data structure, up to 1023 bits and up to 4 references
//! - Builder: accumulates typed values and freezes them into a cell
//! - Slice: a cursor for sequentially reading cell data
//! - BoC: the Bag of Cells byte format, with optional index and checksum
//! - Dict: canonical prefix-trie dictionaries with fixed-width bit keys
//! - Merkle proofs and updates over pruned cell trees
//! - Address: internal and external address forms

pub mod address;
pub mod bits;
pub mod boc;
pub mod builder;
pub mod cell;
pub mod crc;
pub mod dict;
pub mod error;
pub mod level_mask;
pub mod merkle;
pub mod slice;

pub use address::{Address, Anycast, ExternalAddress};
pub use bits::BitString;
pub use boc::{
    BOC_MAGIC, BocOptions, deserialize_boc, deserialize_boc_base64, deserialize_boc_ext,
    deserialize_boc_hex, serialize_boc, serialize_boc_base64, serialize_boc_ext, serialize_boc_hex,
};
pub use builder::Builder;
pub use cell::{Cell, CellHash, CellType, MAX_CELL_BITS, MAX_CELL_REFS};
pub use dict::{AugDict, Dict};
pub use error::{CellError, Result};
pub use level_mask::{CellDescriptor, LevelMask, MAX_CELL_LEVEL};
pub use merkle::{MerkleProof, MerkleUpdate, make_pruned_branch};
pub use slice::Slice;
