// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Keygate Contributors
//! Cryptographic primitives consumed by the unlock pipeline.
//!
//! LUKS2 metadata names its hashes as strings ("sha256", "sha1", ...);
//! [`HashAlg`] is the lookup table that maps those names onto the
//! RustCrypto digest implementations and dispatches PBKDF2 and one-shot
//! hashing over them.

pub mod af;

use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{KeygateError, Result};

/// A hash algorithm resolved from its LUKS2 metadata name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlg {
    /// Resolves a metadata hash name.
    ///
    /// Unknown names fail with [`KeygateError::NotFound`], which during
    /// keyslot enumeration causes the slot to be skipped rather than the
    /// unlock to abort.
    pub fn lookup(name: &str) -> Result<Self> {
        match name {
            "sha1" => Ok(HashAlg::Sha1),
            "sha256" => Ok(HashAlg::Sha256),
            "sha512" => Ok(HashAlg::Sha512),
            other => Err(KeygateError::not_found(format!(
                "Couldn't load {other} hash"
            ))),
        }
    }

    /// Output length of the hash in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlg::Sha1 => 20,
            HashAlg::Sha256 => 32,
            HashAlg::Sha512 => 64,
        }
    }

    /// One-shot digest of `data`.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlg::Sha1 => Sha1::digest(data).to_vec(),
            HashAlg::Sha256 => Sha256::digest(data).to_vec(),
            HashAlg::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// PBKDF2 (RFC 2898) keyed by this hash, filling `out` completely.
    pub fn pbkdf2(self, password: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]) {
        match self {
            HashAlg::Sha1 => pbkdf2_hmac::<Sha1>(password, salt, iterations, out),
            HashAlg::Sha256 => pbkdf2_hmac::<Sha256>(password, salt, iterations, out),
            HashAlg::Sha512 => pbkdf2_hmac::<Sha512>(password, salt, iterations, out),
        }
    }
}
