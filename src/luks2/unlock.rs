// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Keygate Contributors
//! Passphrase-to-master-key recovery and device configuration.
//!
//! For each keyslot: derive the area key from the passphrase (PBKDF2),
//! decrypt the keyslot area with it over 512-byte sectors, reverse the
//! anti-forensic split, and check the candidate master key against the
//! digest record. The first slot that verifies wins and the segment's
//! cipher and geometry are programmed into the downstream descriptor.
//!
//! Any failure while a slot is being tried (malformed record, unknown
//! hash, unsupported KDF, read error, digest mismatch) moves on to the
//! next slot; only when every slot is exhausted does the unlock fail.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::{af, HashAlg};
use crate::cryptodisk::{CryptoDisk, LUKS_LOG_SECTOR_SIZE, MAX_KEY_LEN};
use crate::device::{reborrow_detached, BlockSource};
use crate::error::{KeygateError, Result};
use crate::luks2::header::{read_from, read_header, HEADER_SIZE};
use crate::luks2::metadata::{Digest, Kdf, Keyslot, Metadata, SegmentSize};
use crate::passphrase;

/// A candidate or recovered master volume key (securely zeroized on
/// drop).
pub struct MasterKey(Zeroizing<Vec<u8>>);

impl MasterKey {
    fn new(bytes: Zeroizing<Vec<u8>>) -> Self {
        Self(bytes)
    }

    /// Returns the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the key size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Probe parameters for [`scan`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanOptions<'a> {
    /// Only match a device whose header UUID equals this
    /// (case-insensitive).
    pub check_uuid: Option<&'a str>,
    /// Boot-mode unlock is not supported; a probe with this set never
    /// matches.
    pub check_boot: bool,
}

/// Probes `source` for a LUKS2 device.
///
/// This is a probe, not an unlock: every failure (no header, wrong
/// version, UUID mismatch) is reported as `None`, never as an error.
pub fn scan(
    source: &mut dyn BlockSource,
    detached: Option<&mut dyn BlockSource>,
    options: ScanOptions<'_>,
) -> Option<CryptoDisk> {
    if options.check_boot {
        return None;
    }

    let header = match read_header(source, detached) {
        Ok(header) => header,
        Err(e) => {
            debug!(target: "luks2", "scan: {e}");
            return None;
        }
    };

    if let Some(probe) = options.check_uuid {
        if !header.uuid_matches(probe) {
            debug!(target: "luks2", "scan: uuid mismatch for {}", header.uuid_str());
            return None;
        }
    }

    Some(CryptoDisk::new(header.uuid_str(), "luks2"))
}

/// Recovers the master key and programs `crypt` with the segment cipher
/// and geometry.
///
/// `key` is a key-file byte string used verbatim as the passphrase,
/// embedded NUL bytes included. Without one the user is prompted on the
/// terminal.
pub fn recover_key(
    source: &mut dyn BlockSource,
    crypt: &mut CryptoDisk,
    mut detached: Option<&mut dyn BlockSource>,
    key: Option<&[u8]>,
) -> Result<()> {
    let header = read_header(source, reborrow_detached(&mut detached))?;

    let mut json = vec![0u8; header.json_len()];
    read_from(
        source,
        reborrow_detached(&mut detached),
        header.hdr_offset + HEADER_SIZE as u64,
        &mut json,
    )?;
    let nul = json
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| KeygateError::bad_argument("JSON area is not NUL-terminated"))?;
    let metadata = Metadata::parse(&json[..nul])?;

    let passphrase: Zeroizing<Vec<u8>> = match key {
        Some(bytes) => Zeroizing::new(bytes.to_vec()),
        None => passphrase::prompt(source.name(), source.partition(), &crypt.uuid)?,
    };

    let mut opened = None;
    for (slot, keyslot_id) in metadata.keyslot_ids().enumerate() {
        let (keyslot, digest, segment) = match metadata.resolve_keyslot(keyslot_id) {
            Ok(triple) => triple,
            Err(e) => {
                debug!(target: "luks2", "failed to get keyslot {keyslot_id}: {e}");
                continue;
            }
        };

        if keyslot.priority == 0 {
            debug!(target: "luks2", "ignoring keyslot {keyslot_id} due to priority");
            continue;
        }

        debug!(target: "luks2", "trying keyslot {keyslot_id}");

        // Segment geometry, in data-sector units.
        let log_sector_size = segment.log_sector_size();
        crypt.offset_sectors = segment.offset / segment.sector_size;
        crypt.log_sector_size = log_sector_size;
        crypt.total_sectors = match segment.size {
            SegmentSize::Dynamic => {
                let source_log = source.log_sector_size();
                if log_sector_size < source_log {
                    debug!(target: "luks2", "segment sectors smaller than source sectors");
                    continue;
                }
                let source_sectors = match source.size() {
                    Ok(bytes) => bytes >> source_log,
                    Err(e) => {
                        debug!(target: "luks2", "could not size source: {e}");
                        continue;
                    }
                };
                (source_sectors >> (log_sector_size - source_log))
                    .saturating_sub(crypt.offset_sectors)
            }
            SegmentSize::Fixed(bytes) => bytes >> log_sector_size,
        };

        let candidate =
            match decrypt_key(
                &keyslot,
                &passphrase,
                crypt,
                source,
                reborrow_detached(&mut detached),
            ) {
                Ok(candidate) => candidate,
                Err(e) => {
                    debug!(target: "luks2", "decryption with keyslot {keyslot_id} failed: {e}");
                    continue;
                }
            };

        if let Err(e) = verify_key(&digest, candidate.as_bytes()) {
            debug!(target: "luks2", "could not open keyslot {keyslot_id}: {e}");
            continue;
        }

        println!("Slot {slot} opened");
        opened = Some((segment, candidate));
        break;
    }

    let Some((segment, master_key)) = opened else {
        return Err(KeygateError::AccessDenied("Invalid passphrase".to_string()));
    };

    let (cipher, mode) = split_cipher_spec(&segment.encryption)?;
    crypt.set_cipher(cipher, mode)?;
    crypt.set_key(master_key.as_bytes())?;
    Ok(())
}

/// Derives the area key, decrypts the keyslot area and merges the
/// anti-forensic stripes into a candidate master key.
pub(crate) fn decrypt_key(
    keyslot: &Keyslot,
    passphrase: &[u8],
    crypt: &mut CryptoDisk,
    source: &mut dyn BlockSource,
    detached: Option<&mut dyn BlockSource>,
) -> Result<MasterKey> {
    let salt = decode_base64(keyslot.kdf.salt(), "keyslot salt")?;

    let area_key = match &keyslot.kdf {
        Kdf::Argon2 { .. } => {
            return Err(KeygateError::bad_argument("Argon2 not supported"));
        }
        Kdf::Pbkdf2 {
            hash, iterations, ..
        } => {
            let hash = HashAlg::lookup(hash)?;
            let mut key = Zeroizing::new(vec![0u8; keyslot.area.key_size as usize]);
            hash.pbkdf2(passphrase, &salt, *iterations, &mut key);
            key
        }
    };

    let (cipher, mode) = split_cipher_spec(&keyslot.area.encryption)?;
    crypt.set_cipher(cipher, mode)?;
    crypt.set_key(&area_key)?;

    let area_size = usize::try_from(keyslot.area.size)
        .map_err(|_| KeygateError::bad_argument("Key area too large"))?;
    let mut split_key = Zeroizing::new(vec![0u8; area_size]);
    read_from(source, detached, keyslot.area.offset, &mut split_key)?;

    // The encrypted keyslot area always uses 512-byte sectors,
    // regardless of the data sector size.
    crypt.decrypt_sectors(&mut split_key, 0, LUKS_LOG_SECTOR_SIZE)?;

    let hash = HashAlg::lookup(&keyslot.af.hash)?;
    let stripes = usize::try_from(keyslot.af.stripes)
        .map_err(|_| KeygateError::bad_argument("Invalid AF stripe count"))?;
    let candidate = af::merge(hash, &split_key, keyslot.key_size as usize, stripes)?;
    debug!(target: "luks2", "candidate key recovered");
    Ok(MasterKey::new(candidate))
}

/// Checks a candidate master key against a digest record.
pub(crate) fn verify_key(digest: &Digest, candidate: &[u8]) -> Result<()> {
    let expected = decode_base64(&digest.digest, "digest")?;
    let salt = decode_base64(&digest.salt, "digest salt")?;
    let hash = HashAlg::lookup(&digest.hash)?;

    let mut computed = Zeroizing::new(vec![0u8; expected.len()]);
    hash.pbkdf2(candidate, &salt, digest.iterations, &mut computed);

    if bool::from(computed.ct_eq(&expected)) {
        Ok(())
    } else {
        Err(KeygateError::AccessDenied("Mismatching digests".to_string()))
    }
}

/// Splits a dm-crypt spec at the first `-` into cipher name and mode.
pub(crate) fn split_cipher_spec(spec: &str) -> Result<(&str, &str)> {
    spec.split_once('-')
        .ok_or_else(|| KeygateError::bad_argument(format!("Invalid encryption: {spec}")))
}

fn decode_base64(encoded: &str, what: &str) -> Result<Zeroizing<Vec<u8>>> {
    let decoded = BASE64
        .decode(encoded)
        .map_err(|_| KeygateError::bad_argument(format!("Invalid {what}")))?;
    if decoded.len() > MAX_KEY_LEN {
        return Err(KeygateError::bad_argument(format!("{what} too long")));
    }
    Ok(Zeroizing::new(decoded))
}
