//! Account addresses
//!
//! An internal address is a workchain plus a 256-bit account id, optionally
//! prefixed by anycast rewrite data. It has two text forms: the raw
//! `workchain:hex` form and the 48-character user-friendly base64 form with
//! a tag byte and a CRC16 trailer.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};

use crate::crc::CRC16;
use crate::error::{CellError, Result};

const BOUNCEABLE_TAG: u8 = 0x11;
const NON_BOUNCEABLE_TAG: u8 = 0x51;
const TEST_FLAG: u8 = 0x80;

/// Anycast rewrite prefix: the first `depth` bits of the account id are
/// replaced during routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Anycast {
    pub depth: u8,
    pub rewrite_prefix: u32,
}

/// Internal account address (`addr_std`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub workchain: i8,
    pub hash_part: [u8; 32],
    pub anycast: Option<Anycast>,
}

/// External address (`addr_extern`): up to 511 bits of opaque routing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalAddress {
    pub bit_len: usize,
    pub value: Option<u64>,
}

impl Address {
    pub fn new(workchain: i8, hash_part: [u8; 32]) -> Self {
        Self {
            workchain,
            hash_part,
            anycast: None,
        }
    }

    /// Parses the raw `workchain:hex` form.
    pub fn from_hex_str(s: &str) -> Result<Self> {
        let (workchain, hash) = s
            .split_once(':')
            .ok_or_else(|| CellError::InvalidAddress(s.to_string()))?;
        let workchain = workchain
            .parse::<i8>()
            .map_err(|_| CellError::InvalidAddress(s.to_string()))?;
        let bytes = hex::decode(hash).map_err(|_| CellError::InvalidHex)?;
        if bytes.len() != 32 {
            return Err(CellError::InvalidAddress(s.to_string()));
        }
        let mut hash_part = [0u8; 32];
        hash_part.copy_from_slice(&bytes);
        Ok(Self::new(workchain, hash_part))
    }

    /// Parses the 48-character user-friendly form, verifying its checksum.
    ///
    /// Both the standard and the url-safe base64 alphabets are accepted.
    pub fn from_base64(s: &str) -> Result<Self> {
        if s.len() != 48 {
            return Err(CellError::InvalidAddress(s.to_string()));
        }
        let normalized: String = s
            .chars()
            .map(|c| match c {
                '-' => '+',
                '_' => '/',
                c => c,
            })
            .collect();
        let bytes = STANDARD
            .decode(&normalized)
            .map_err(|_| CellError::InvalidBase64)?;
        if bytes.len() != 36 {
            return Err(CellError::InvalidAddress(s.to_string()));
        }
        let expected = u16::from_be_bytes([bytes[34], bytes[35]]);
        let actual = CRC16.checksum(&bytes[..34]);
        if expected != actual {
            return Err(CellError::ChecksumMismatch {
                expected: expected as u32,
                actual: actual as u32,
            });
        }
        match bytes[0] & !TEST_FLAG {
            BOUNCEABLE_TAG | NON_BOUNCEABLE_TAG => {}
            tag => return Err(CellError::UnsupportedAddressTag(tag)),
        }
        let workchain = bytes[1] as i8;
        let mut hash_part = [0u8; 32];
        hash_part.copy_from_slice(&bytes[2..34]);
        Ok(Self::new(workchain, hash_part))
    }

    /// Whether this address came from or targets a test network.
    pub fn is_test_only(s: &str) -> bool {
        matches!(
            STANDARD.decode(
                s.replace('-', "+").replace('_', "/"),
            ),
            Ok(bytes) if bytes.first().is_some_and(|tag| tag & TEST_FLAG != 0)
        )
    }

    /// Renders the user-friendly form.
    pub fn to_base64(&self, bounceable: bool, test_only: bool, url_safe: bool) -> String {
        let mut tag = if bounceable {
            BOUNCEABLE_TAG
        } else {
            NON_BOUNCEABLE_TAG
        };
        if test_only {
            tag |= TEST_FLAG;
        }
        let mut bytes = Vec::with_capacity(36);
        bytes.push(tag);
        bytes.push(self.workchain as u8);
        bytes.extend_from_slice(&self.hash_part);
        let crc = CRC16.checksum(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());
        if url_safe {
            URL_SAFE.encode(&bytes)
        } else {
            STANDARD.encode(&bytes)
        }
    }

    /// Renders the raw `workchain:hex` form.
    pub fn to_hex_str(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash_part))
    }
}

impl FromStr for Address {
    type Err = CellError;

    /// Accepts either text form, picked by shape.
    fn from_str(s: &str) -> Result<Self> {
        if s.contains(':') {
            Self::from_hex_str(s)
        } else {
            Self::from_base64(s)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_str())
    }
}
