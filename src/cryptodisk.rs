// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Keygate Contributors
//! Downstream decrypting-device descriptor.
//!
//! A [`CryptoDisk`] is what the unlock pipeline hands back to its caller:
//! geometry (offset, sector size, total sectors) plus a programmed sector
//! cipher. The pipeline itself also uses it to decrypt keyslot areas,
//! which always run over 512-byte sectors regardless of the data sector
//! size.
//!
//! Supported encryption specs are `aes` with `xts-plain64` or
//! `xts-plain` IV modes, keyed with 32 bytes (AES-128 half-keys) or
//! 64 bytes (AES-256 half-keys).

use aes::cipher::KeyInit;
use aes::{Aes128, Aes256};
use xts_mode::{get_tweak_default, Xts128};

use crate::error::{KeygateError, Result};

/// Upper bound on any key handled by the pipeline, in bytes.
pub const MAX_KEY_LEN: usize = 128;

/// Log2 of the fixed 512-byte sector size used for keyslot areas.
pub const LUKS_LOG_SECTOR_SIZE: u8 = 9;

/// IV generation mode of the sector cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IvMode {
    /// 64-bit little-endian sector number.
    Plain64,
    /// 32-bit sector number, zero-extended.
    Plain,
}

enum SectorCipher {
    XtsAes128(Box<Xts128<Aes128>>),
    XtsAes256(Box<Xts128<Aes256>>),
}

impl SectorCipher {
    fn new(key: &[u8]) -> Result<Self> {
        match key.len() {
            32 => {
                let c1 = Aes128::new_from_slice(&key[..16]).expect("half-key length is fixed");
                let c2 = Aes128::new_from_slice(&key[16..]).expect("half-key length is fixed");
                Ok(SectorCipher::XtsAes128(Box::new(Xts128::new(c1, c2))))
            }
            64 => {
                let c1 = Aes256::new_from_slice(&key[..32]).expect("half-key length is fixed");
                let c2 = Aes256::new_from_slice(&key[32..]).expect("half-key length is fixed");
                Ok(SectorCipher::XtsAes256(Box::new(Xts128::new(c1, c2))))
            }
            n => Err(KeygateError::bad_argument(format!(
                "Unsupported key size: {n}"
            ))),
        }
    }
}

/// Descriptor of the decrypting block device configured by an unlock.
pub struct CryptoDisk {
    /// UUID copied from the selected header.
    pub uuid: String,
    /// Name of the backend that configured this descriptor.
    pub modname: &'static str,
    /// First payload sector, in data-sector units.
    pub offset_sectors: u64,
    /// Log2 of the data sector size.
    pub log_sector_size: u8,
    /// Payload length in data-sector units.
    pub total_sectors: u64,
    iv_mode: Option<IvMode>,
    cipher: Option<SectorCipher>,
}

impl CryptoDisk {
    /// Creates an unprogrammed descriptor.
    pub fn new(uuid: impl Into<String>, modname: &'static str) -> Self {
        Self {
            uuid: uuid.into(),
            modname,
            offset_sectors: 0,
            log_sector_size: LUKS_LOG_SECTOR_SIZE,
            total_sectors: 0,
            iv_mode: None,
            cipher: None,
        }
    }

    /// Selects the cipher and IV mode. `mode` is the part of the
    /// dm-crypt spec after the first `-`, e.g. `xts-plain64`.
    ///
    /// The key set by any previous [`set_key`](Self::set_key) is
    /// discarded; cipher and key are always programmed as a pair.
    pub fn set_cipher(&mut self, cipher: &str, mode: &str) -> Result<()> {
        if cipher != "aes" {
            return Err(KeygateError::bad_argument(format!(
                "Unsupported cipher: {cipher}"
            )));
        }
        let iv_mode = match mode {
            "xts-plain64" => IvMode::Plain64,
            "xts-plain" => IvMode::Plain,
            other => {
                return Err(KeygateError::bad_argument(format!(
                    "Unsupported cipher mode: {other}"
                )))
            }
        };
        self.iv_mode = Some(iv_mode);
        self.cipher = None;
        Ok(())
    }

    /// Installs the key for the cipher selected by
    /// [`set_cipher`](Self::set_cipher).
    pub fn set_key(&mut self, key: &[u8]) -> Result<()> {
        if self.iv_mode.is_none() {
            return Err(KeygateError::bad_argument("No cipher selected"));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(KeygateError::bad_argument(format!(
                "Key too long: {}",
                key.len()
            )));
        }
        self.cipher = Some(SectorCipher::new(key)?);
        Ok(())
    }

    /// Decrypts `buf` in place as consecutive sectors of
    /// `1 << log_sector_size` bytes, starting at `start_sector`.
    pub fn decrypt_sectors(
        &self,
        buf: &mut [u8],
        start_sector: u64,
        log_sector_size: u8,
    ) -> Result<()> {
        self.endecrypt(buf, start_sector, log_sector_size, false)
    }

    /// Encrypts `buf` in place; the inverse of
    /// [`decrypt_sectors`](Self::decrypt_sectors).
    pub fn encrypt_sectors(
        &self,
        buf: &mut [u8],
        start_sector: u64,
        log_sector_size: u8,
    ) -> Result<()> {
        self.endecrypt(buf, start_sector, log_sector_size, true)
    }

    fn endecrypt(
        &self,
        buf: &mut [u8],
        start_sector: u64,
        log_sector_size: u8,
        encrypt: bool,
    ) -> Result<()> {
        let sector_size = 1usize << log_sector_size;
        if buf.len() % sector_size != 0 {
            return Err(KeygateError::bad_argument(format!(
                "Buffer is not sector aligned: {}",
                buf.len()
            )));
        }
        let iv_mode = self
            .iv_mode
            .ok_or_else(|| KeygateError::bad_argument("No cipher selected"))?;
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| KeygateError::bad_argument("No key installed"))?;

        let tweak = move |sector: u128| match iv_mode {
            IvMode::Plain64 => get_tweak_default(sector as u64 as u128),
            IvMode::Plain => get_tweak_default(sector as u32 as u128),
        };
        let first = start_sector as u128;
        match (cipher, encrypt) {
            (SectorCipher::XtsAes128(x), false) => {
                x.decrypt_area(buf, sector_size, first, tweak)
            }
            (SectorCipher::XtsAes128(x), true) => x.encrypt_area(buf, sector_size, first, tweak),
            (SectorCipher::XtsAes256(x), false) => {
                x.decrypt_area(buf, sector_size, first, tweak)
            }
            (SectorCipher::XtsAes256(x), true) => x.encrypt_area(buf, sector_size, first, tweak),
        }
        Ok(())
    }
}

impl std::fmt::Debug for CryptoDisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoDisk")
            .field("uuid", &self.uuid)
            .field("modname", &self.modname)
            .field("offset_sectors", &self.offset_sectors)
            .field("log_sector_size", &self.log_sector_size)
            .field("total_sectors", &self.total_sectors)
            .field("cipher", &if self.cipher.is_some() { "[SET]" } else { "[UNSET]" })
            .finish()
    }
}
