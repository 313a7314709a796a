// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Keygate Contributors
//! Binary LUKS2 header pair.
//!
//! Two fixed 4096-byte big-endian headers live at device offsets 0 and
//! `hdr_size`; the JSON metadata area immediately follows each copy.
//! [`read_header`] validates both copies and selects the authoritative
//! one by sequence id.

use bincode::{Decode, Encode};

use crate::device::{reborrow_detached, BlockSource};
use crate::error::{KeygateError, Result};

/// Size of one fixed binary header copy.
pub const HEADER_SIZE: usize = 4096;

/// Magic bytes of the primary header copy.
pub const MAGIC_PRIMARY: [u8; 6] = *b"LUKS\xba\xbe";

/// Magic bytes of the secondary header copy.
pub const MAGIC_SECONDARY: [u8; 6] = *b"SKUL\xba\xbe";

/// Only LUKS version 2 is supported.
const VERSION: u16 = 2;

/// Largest header size the on-disk format defines (4 MiB).
const MAX_HDR_SIZE: u64 = 0x400000;

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::legacy()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// On-disk fixed header layout. Multi-byte fields are big-endian.
#[derive(Encode, Decode, Clone)]
pub struct Header {
    pub magic: [u8; 6],
    pub version: u16,
    /// Total bytes of this header copy including the JSON area.
    pub hdr_size: u64,
    /// Freshness counter; the copy with the larger value wins.
    pub seqid: u64,
    pub label: [u8; 48],
    pub csum_alg: [u8; 32],
    pub salt: [u8; 64],
    pub uuid: [u8; 40],
    pub subsystem: [u8; 48],
    /// Disk offset of this header copy.
    pub hdr_offset: u64,
    _padding: [u8; 184],
    pub csum: [u8; 64],
    _padding4096: [u8; 7 * 512],
}

impl Default for Header {
    fn default() -> Self {
        Self {
            magic: [0; 6],
            version: 0,
            hdr_size: 0,
            seqid: 0,
            label: [0; 48],
            csum_alg: [0; 32],
            salt: [0; 64],
            uuid: [0; 40],
            subsystem: [0; 48],
            hdr_offset: 0,
            _padding: [0; 184],
            csum: [0; 64],
            _padding4096: [0; 7 * 512],
        }
    }
}

impl Header {
    /// Decodes a header from exactly [`HEADER_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (header, _) = bincode::decode_from_slice(bytes, bincode_config())
            .map_err(|e| KeygateError::bad_argument(format!("Malformed header: {e}")))?;
        Ok(header)
    }

    /// Encodes the header to exactly [`HEADER_SIZE`] bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bincode::encode_into_slice(self, &mut bytes, bincode_config())
            .expect("fixed header layout fits its size");
        bytes
    }

    fn validate(&self, expected_magic: &[u8; 6], which: &str) -> Result<()> {
        if self.magic != *expected_magic || self.version != VERSION {
            return Err(KeygateError::BadSignature(format!("Bad {which} signature")));
        }
        if self.hdr_size <= HEADER_SIZE as u64 || self.hdr_size > MAX_HDR_SIZE {
            return Err(KeygateError::bad_argument(format!(
                "Invalid header size: {}",
                self.hdr_size
            )));
        }
        Ok(())
    }

    /// Length of the JSON area that follows this header copy.
    pub fn json_len(&self) -> usize {
        (self.hdr_size as usize) - HEADER_SIZE
    }

    /// UUID field as a NUL-trimmed string.
    pub fn uuid_str(&self) -> &str {
        cstr_field(&self.uuid)
    }

    /// Label field as a NUL-trimmed string.
    pub fn label_str(&self) -> &str {
        cstr_field(&self.label)
    }

    /// Case-insensitive UUID comparison used by the probe path.
    pub fn uuid_matches(&self, probe: &str) -> bool {
        self.uuid_str().eq_ignore_ascii_case(probe)
    }
}

fn cstr_field(field: &[u8]) -> &str {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end]).unwrap_or("")
}

impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Header")
            .field("magic", &self.magic)
            .field("version", &self.version)
            .field("hdr_size", &self.hdr_size)
            .field("seqid", &self.seqid)
            .field("label", &self.label_str())
            .field("uuid", &self.uuid_str())
            .field("hdr_offset", &self.hdr_offset)
            .finish()
    }
}

/// Reads the primary and secondary header copies and returns the
/// authoritative one: the copy with the larger `seqid`, the primary on a
/// tie. Reads go to `detached` when a detached header source is given.
pub fn read_header(
    source: &mut dyn BlockSource,
    mut detached: Option<&mut dyn BlockSource>,
) -> Result<Header> {
    let mut buf = vec![0u8; HEADER_SIZE];

    read_from(source, reborrow_detached(&mut detached), 0, &mut buf)?;
    let primary = Header::from_bytes(&buf)?;
    primary.validate(&MAGIC_PRIMARY, "primary")?;

    read_from(
        source,
        reborrow_detached(&mut detached),
        primary.hdr_size,
        &mut buf,
    )?;
    let secondary = Header::from_bytes(&buf)?;
    secondary.validate(&MAGIC_SECONDARY, "secondary")?;

    if secondary.seqid > primary.seqid {
        Ok(secondary)
    } else {
        Ok(primary)
    }
}

/// Dispatches a read to the detached header source when one is present.
pub(crate) fn read_from(
    source: &mut dyn BlockSource,
    detached: Option<&mut dyn BlockSource>,
    offset: u64,
    buf: &mut [u8],
) -> Result<()> {
    match detached {
        Some(header) => header.read_at(offset, buf),
        None => source.read_at(offset, buf),
    }
}
