// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Keygate Contributors
//! LUKS2 unlock backend.
//!
//! The pipeline, leaves first:
//!
//! - [`header`] reads the fixed binary header pair and picks the
//!   authoritative copy;
//! - [`metadata`] decodes the JSON area into keyslot, segment and digest
//!   records and resolves the keyslot ↔ digest ↔ segment graph;
//! - [`unlock`] runs the crypto pipeline (PBKDF2 area key, keyslot-area
//!   decryption, anti-forensic merge, digest verification) over every
//!   keyslot and programs the downstream [`CryptoDisk`].
//!
//! An enclosing cryptodisk framework consumes the backend through
//! [`UnlockBackend`], a two-method probe/unlock record.

pub mod header;
pub mod metadata;
pub mod unlock;

pub use header::{read_header, Header, HEADER_SIZE, MAGIC_PRIMARY, MAGIC_SECONDARY};
pub use metadata::{AfParams, Area, Digest, Kdf, Keyslot, Metadata, Segment, SegmentSize};
pub use unlock::{recover_key, scan, MasterKey, ScanOptions};

use crate::cryptodisk::CryptoDisk;
use crate::device::BlockSource;
use crate::error::Result;

/// The probe/unlock pair a cryptodisk framework registers per on-disk
/// format.
pub trait UnlockBackend {
    /// Probes `source`; silent on devices the backend does not recognize.
    fn scan(
        &self,
        source: &mut dyn BlockSource,
        detached: Option<&mut dyn BlockSource>,
        options: ScanOptions<'_>,
    ) -> Option<CryptoDisk>;

    /// Recovers the master key and configures `crypt`.
    fn recover_key(
        &self,
        source: &mut dyn BlockSource,
        crypt: &mut CryptoDisk,
        detached: Option<&mut dyn BlockSource>,
        key: Option<&[u8]>,
    ) -> Result<()>;
}

/// The LUKS2 backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct Luks2;

impl UnlockBackend for Luks2 {
    fn scan(
        &self,
        source: &mut dyn BlockSource,
        detached: Option<&mut dyn BlockSource>,
        options: ScanOptions<'_>,
    ) -> Option<CryptoDisk> {
        unlock::scan(source, detached, options)
    }

    fn recover_key(
        &self,
        source: &mut dyn BlockSource,
        crypt: &mut CryptoDisk,
        detached: Option<&mut dyn BlockSource>,
        key: Option<&[u8]>,
    ) -> Result<()> {
        unlock::recover_key(source, crypt, detached, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_backend_as_trait_object() {
        let backend: Box<dyn UnlockBackend> = Box::new(Luks2);
        let mut source = Cursor::new(vec![0u8; 8192]);
        assert!(backend
            .scan(&mut source, None, ScanOptions::default())
            .is_none());

        let mut crypt = CryptoDisk::new("uuid", "luks2");
        assert!(backend
            .recover_key(&mut source, &mut crypt, None, Some(b"pass"))
            .is_err());
    }
}
