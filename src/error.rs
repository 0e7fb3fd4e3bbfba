//! Error types shared by all cell operations.

use thiserror::Error;

use crate::cell::CellType;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CellError>;

/// Errors produced by cell, builder, slice, dictionary and BoC operations.
///
/// Every error is fatal to the operation that produced it; no partial
/// results are ever returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    /// A write would exceed the buffer or cell bit capacity.
    #[error("bits overflow: requested {requested}, available {available}")]
    BitsOverflow { requested: usize, available: usize },
    /// A read would advance past the committed bits.
    #[error("bits underflow: requested {requested}, available {available}")]
    BitsUnderflow { requested: usize, available: usize },
    /// More than four references.
    #[error("refs overflow")]
    RefsOverflow,
    /// A reference read past the end of the reference list.
    #[error("refs underflow")]
    RefsUnderflow,
    /// An integer value does not fit in the requested bit width.
    #[error("value out of range for {bits} bits")]
    IntOutOfRange { bits: usize },
    /// A coins amount exceeds the maximum the economy encoding can carry.
    #[error("amount too large")]
    AmountTooLarge,
    /// The BoC buffer does not start with the expected magic value.
    #[error("invalid BoC magic 0x{0:08x}")]
    InvalidMagic(u32),
    /// A BoC header or cell record is malformed.
    #[error("invalid bag of cells: {0}")]
    InvalidBoc(&'static str),
    /// The first descriptor byte encodes more than four references.
    #[error("invalid cell descriptor 0x{0:02x}")]
    InvalidDescriptor(u8),
    /// The reserved absent-cell marker was encountered.
    #[error("absent cells are not supported")]
    AbsentCell,
    /// A serialized cell referenced a cell at the same or an earlier index.
    #[error("cell {cell} references non-later cell {reference}")]
    InvalidRefOrder { cell: usize, reference: usize },
    /// The BoC checksum trailer does not match the buffer contents.
    #[error("checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Serialized data ended before the declared structure was complete.
    #[error("unexpected end of data")]
    UnexpectedEof,
    /// The cell tree is too deep to track depths in 16 bits.
    #[error("cell depth overflow")]
    DepthOverflow,
    /// The non-empty dictionary root form cannot represent an empty map.
    #[error("empty dict not supported")]
    EmptyDict,
    /// A dictionary edge label is inconsistent with the declared key width.
    #[error("malformed dictionary label")]
    MalformedLabel,
    /// An exotic cell payload or reference list does not match its kind.
    #[error("invalid exotic cell: {0}")]
    InvalidExoticCell(&'static str),
    /// A caller asserted one cell kind but found another.
    #[error("cell type mismatch: expected {expected:?}, got {actual:?}")]
    CellTypeMismatch {
        expected: CellType,
        actual: CellType,
    },
    /// Payload bytes are not valid UTF-8.
    #[error("invalid utf-8 payload")]
    InvalidUtf8,
    /// A hex text form could not be decoded.
    #[error("invalid hex string")]
    InvalidHex,
    /// A base64 text form could not be decoded.
    #[error("invalid base64 string")]
    InvalidBase64,
    /// An address string or serialized address is malformed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// The two tag bits of a serialized address select an unsupported form.
    #[error("unsupported address tag 0b{0:02b}")]
    UnsupportedAddressTag(u8),
}
