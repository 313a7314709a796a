// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Keygate Contributors
//! Keygate - a boot-time unlocker for LUKS2 block devices
//!
//! Given a raw block device (or a detached header file) and a passphrase
//! or key-file, keygate authenticates the user, recovers the master
//! volume key, and configures a downstream decrypting block device
//! descriptor.
//!
//! # Features
//!
//! - **Header failover**: primary/secondary header copies, freshest
//!   sequence id wins
//! - **Strict metadata decoding**: keyslot/segment/digest records with
//!   bitmask cross-reference resolution
//! - **Forward compatibility**: a keyslot this crate cannot parse is
//!   skipped, never fatal
//! - **LUKS1 anti-forensics**: hash-based stripe merging
//! - **Memory safety**: passphrases, area keys and candidate keys are
//!   zeroized on drop
//!
//! # Example
//!
//! ```no_run
//! use keygate::{recover_key, scan, FileSource, ScanOptions};
//!
//! let mut source = FileSource::open("/dev/sda2")?;
//! let mut crypt = scan(&mut source, None, ScanOptions::default())
//!     .ok_or("not a LUKS2 device")?;
//!
//! // Prompts for the passphrase, tries every keyslot, and programs the
//! // descriptor with the master key and segment geometry.
//! recover_key(&mut source, &mut crypt, None, None)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod crypto;
pub mod cryptodisk;
pub mod device;
pub mod error;
pub mod luks2;
pub mod passphrase;

// Re-export commonly used types
pub use crypto::HashAlg;
pub use cryptodisk::{CryptoDisk, LUKS_LOG_SECTOR_SIZE, MAX_KEY_LEN};
pub use device::{BlockSource, FileSource};
pub use error::{KeygateError, Result};
pub use luks2::{recover_key, scan, Luks2, MasterKey, ScanOptions, UnlockBackend};
pub use passphrase::MAX_PASSPHRASE;
