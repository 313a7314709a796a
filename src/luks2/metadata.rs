// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Keygate Contributors
//! JSON metadata decoding and cross-reference resolution.
//!
//! The metadata area is a JSON document whose top-level `keyslots`,
//! `segments` and `digests` objects map decimal-string indices to
//! records. Records are decoded lazily, one index at a time, so a single
//! malformed or forward-incompatible record (say, a keyslot with a KDF
//! this crate has never heard of) never poisons the enumeration of its
//! neighbours.
//!
//! Digests cross-reference keyslots and segments by index; the indices
//! are folded into 64-bit bitmasks, and indices outside the 0..=63
//! domain are rejected outright.

use std::collections::BTreeMap;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::cryptodisk::MAX_KEY_LEN;
use crate::error::{KeygateError, Result};

/// Keyslot areas are always addressed in 512-byte sectors.
const AREA_SECTOR_SIZE: u64 = 512;

/// Parsed top-level metadata document.
///
/// Record values are kept as raw JSON until a specific index is needed;
/// see the module docs for why.
#[derive(Debug, Deserialize)]
pub struct Metadata {
    keyslots: BTreeMap<u64, Value>,
    segments: BTreeMap<u64, Value>,
    digests: BTreeMap<u64, Value>,
}

/// A credential envelope: where the wrapped master key lives and how a
/// passphrase turns into the key that unwraps it.
#[derive(Debug, Clone)]
pub struct Keyslot {
    /// Bytes of master key this slot wraps.
    pub key_size: u64,
    /// `0` means the slot is ignored; absent defaults to `1`.
    pub priority: i64,
    pub area: Area,
    pub kdf: Kdf,
    pub af: AfParams,
}

/// The raw on-device region holding the AF-split encrypted key.
#[derive(Debug, Clone)]
pub struct Area {
    /// dm-crypt cipher spec, e.g. `aes-xts-plain64`.
    pub encryption: String,
    /// Key size of the area cipher in bytes.
    pub key_size: u64,
    pub offset: u64,
    pub size: u64,
}

/// Anti-forensic splitter parameters.
#[derive(Debug, Clone)]
pub struct AfParams {
    pub stripes: u64,
    pub hash: String,
}

/// Key derivation function of a keyslot.
///
/// Argon2 parameters are parsed so that such slots coexist cleanly with
/// pbkdf2 slots; actually running Argon2 is refused at unlock time.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Kdf {
    #[serde(rename = "argon2i", alias = "argon2id")]
    Argon2 {
        salt: String,
        time: i64,
        memory: i64,
        cpus: i64,
    },
    #[serde(rename = "pbkdf2")]
    Pbkdf2 {
        salt: String,
        hash: String,
        iterations: u32,
    },
}

impl Kdf {
    /// Base64 salt, present for every KDF type.
    pub fn salt(&self) -> &str {
        match self {
            Kdf::Argon2 { salt, .. } => salt,
            Kdf::Pbkdf2 { salt, .. } => salt,
        }
    }
}

/// A contiguous payload region decrypted by one master key.
#[derive(Debug, Clone)]
pub struct Segment {
    pub offset: u64,
    pub size: SegmentSize,
    /// dm-crypt cipher spec of the payload.
    pub encryption: String,
    pub sector_size: u64,
}

impl Segment {
    /// Base-2 log of the validated power-of-two sector size.
    pub fn log_sector_size(&self) -> u8 {
        self.sector_size.trailing_zeros() as u8
    }
}

/// Segment length: a byte count, or "whatever the device has left".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentSize {
    Dynamic,
    Fixed(u64),
}

/// A verification tag binding a set of keyslots to a set of segments.
///
/// `keyslots` and `segments` are bitmasks: bit *i* set means index *i*
/// is a member.
#[derive(Debug, Clone)]
pub struct Digest {
    pub keyslots: u64,
    pub segments: u64,
    pub salt: String,
    pub digest: String,
    pub hash: String,
    pub iterations: u32,
}

// Wire-format records. The `type` tag dispatch makes unsupported type
// strings (non-luks2 keyslot, non-raw area, non-luks1 AF, non-pbkdf2
// digest, unknown KDF) fail the record parse.

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum KeyslotRecord {
    Luks2 {
        key_size: u64,
        #[serde(default = "default_priority")]
        priority: i64,
        area: AreaRecord,
        kdf: Kdf,
        af: AfRecord,
    },
}

fn default_priority() -> i64 {
    1
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum AreaRecord {
    Raw {
        encryption: String,
        key_size: u64,
        #[serde(deserialize_with = "u64_from_str")]
        offset: u64,
        #[serde(deserialize_with = "u64_from_str")]
        size: u64,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum AfRecord {
    Luks1 { stripes: u64, hash: String },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum SegmentRecord {
    Crypt {
        #[serde(deserialize_with = "u64_from_str")]
        offset: u64,
        size: SegmentSize,
        encryption: String,
        sector_size: u64,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum DigestRecord {
    Pbkdf2 {
        keyslots: Vec<String>,
        segments: Vec<String>,
        salt: String,
        digest: String,
        hash: String,
        iterations: u32,
    },
}

// LUKS2 stores 64-bit quantities as decimal strings.
fn u64_from_str<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(de::Error::custom)
}

impl<'de> Deserialize<'de> for SegmentSize {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<SegmentSize, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "dynamic" => Ok(SegmentSize::Dynamic),
            v => Ok(SegmentSize::Fixed(v.parse().map_err(de::Error::custom)?)),
        }
    }
}

impl Keyslot {
    pub(crate) fn from_value(value: &Value) -> Result<Self> {
        let record: KeyslotRecord = serde_json::from_value(value.clone())
            .map_err(|e| KeygateError::bad_argument(format!("Malformed keyslot: {e}")))?;
        let KeyslotRecord::Luks2 {
            key_size,
            priority,
            area,
            kdf,
            af,
        } = record;
        let AreaRecord::Raw {
            encryption,
            key_size: area_key_size,
            offset,
            size,
        } = area;
        let AfRecord::Luks1 { stripes, hash } = af;

        if key_size == 0 || key_size > MAX_KEY_LEN as u64 {
            return Err(KeygateError::bad_argument(format!(
                "Invalid keyslot key size: {key_size}"
            )));
        }
        if area_key_size == 0 || area_key_size > MAX_KEY_LEN as u64 {
            return Err(KeygateError::bad_argument(format!(
                "Invalid key area key size: {area_key_size}"
            )));
        }
        if size == 0 || size % AREA_SECTOR_SIZE != 0 {
            return Err(KeygateError::bad_argument(format!(
                "Key area size not sector aligned: {size}"
            )));
        }
        if stripes == 0 {
            return Err(KeygateError::bad_argument("Invalid AF stripe count"));
        }
        if let Kdf::Pbkdf2 { iterations, .. } = &kdf {
            if *iterations == 0 {
                return Err(KeygateError::bad_argument("Invalid PBKDF2 iteration count"));
            }
        }

        Ok(Keyslot {
            key_size,
            priority,
            area: Area {
                encryption,
                key_size: area_key_size,
                offset,
                size,
            },
            kdf,
            af: AfParams { stripes, hash },
        })
    }
}

impl Segment {
    pub(crate) fn from_value(value: &Value) -> Result<Self> {
        let record: SegmentRecord = serde_json::from_value(value.clone())
            .map_err(|e| KeygateError::bad_argument(format!("Malformed segment: {e}")))?;
        let SegmentRecord::Crypt {
            offset,
            size,
            encryption,
            sector_size,
        } = record;

        if !sector_size.is_power_of_two() || sector_size < AREA_SECTOR_SIZE {
            return Err(KeygateError::bad_argument(format!(
                "Invalid segment sector size: {sector_size}"
            )));
        }

        Ok(Segment {
            offset,
            size,
            encryption,
            sector_size,
        })
    }
}

impl Digest {
    pub(crate) fn from_value(value: &Value) -> Result<Self> {
        let record: DigestRecord = serde_json::from_value(value.clone())
            .map_err(|e| KeygateError::bad_argument(format!("Malformed digest: {e}")))?;
        let DigestRecord::Pbkdf2 {
            keyslots,
            segments,
            salt,
            digest,
            hash,
            iterations,
        } = record;

        Ok(Digest {
            keyslots: fold_index_bitmask(&keyslots, "keyslots")?,
            segments: fold_index_bitmask(&segments, "segments")?,
            salt,
            digest,
            hash,
            iterations,
        })
    }
}

/// Folds decimal-string indices into a 64-bit membership bitmask.
///
/// Empty reference lists and indices outside 0..=63 are metadata
/// violations.
fn fold_index_bitmask(indices: &[String], what: &str) -> Result<u64> {
    if indices.is_empty() {
        return Err(KeygateError::bad_argument(format!(
            "Digest references no {what}"
        )));
    }
    let mut mask = 0u64;
    for index in indices {
        let bit: u32 = index
            .parse()
            .map_err(|_| KeygateError::bad_argument(format!("Invalid {what} reference: {index}")))?;
        let bit = 1u64.checked_shl(bit).ok_or_else(|| {
            KeygateError::bad_argument(format!("{what} reference out of range: {index}"))
        })?;
        mask |= bit;
    }
    Ok(mask)
}

impl Metadata {
    /// Parses the JSON metadata document.
    pub fn parse(json: &[u8]) -> Result<Self> {
        serde_json::from_slice(json)
            .map_err(|e| KeygateError::bad_argument(format!("Invalid LUKS2 JSON header: {e}")))
    }

    /// Number of keyslot entries, parseable or not.
    pub fn keyslot_count(&self) -> usize {
        self.keyslots.len()
    }

    /// Keyslot indices in enumeration (numeric) order.
    pub fn keyslot_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.keyslots.keys().copied()
    }

    /// Binds a keyslot to the digest that references it and to the first
    /// segment that digest covers.
    ///
    /// Digests and segments are scanned in enumeration order and the
    /// first match wins. A keyslot nothing references resolves to
    /// [`KeygateError::NotFound`].
    pub fn resolve_keyslot(&self, keyslot_id: u64) -> Result<(Keyslot, Digest, Segment)> {
        let value = self
            .keyslots
            .get(&keyslot_id)
            .ok_or_else(|| KeygateError::not_found(format!("No keyslot {keyslot_id}")))?;
        let keyslot = Keyslot::from_value(value)?;

        if keyslot_id >= 64 {
            return Err(KeygateError::bad_argument(format!(
                "Keyslot index out of range: {keyslot_id}"
            )));
        }
        let keyslot_bit = 1u64 << keyslot_id;

        let mut chosen = None;
        for value in self.digests.values() {
            let digest = Digest::from_value(value)?;
            if digest.keyslots & keyslot_bit != 0 {
                chosen = Some(digest);
                break;
            }
        }
        let digest =
            chosen.ok_or_else(|| KeygateError::not_found(format!("No digest for keyslot {keyslot_id}")))?;

        let mut chosen = None;
        for (&segment_id, value) in &self.segments {
            if segment_id >= 64 {
                continue;
            }
            if digest.segments & (1u64 << segment_id) != 0 {
                chosen = Some(Segment::from_value(value)?);
                break;
            }
        }
        let segment =
            chosen.ok_or_else(|| KeygateError::not_found("No segment for digest".to_string()))?;

        Ok((keyslot, digest, segment))
    }
}
