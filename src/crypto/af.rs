// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Keygate Contributors
//! LUKS1 anti-forensic splitter, as reused by LUKS2 keyslots.
//!
//! A keyslot area stores `stripes * key_size` bytes of keying material
//! that collapse back to `key_size` bytes through a hash-based diffuser.
//! [`merge`] is the direction the unlock pipeline needs; [`split`] is the
//! forward direction, kept for tooling and for exercising the round-trip.

use zeroize::Zeroizing;

use crate::crypto::HashAlg;
use crate::error::{KeygateError, Result};

/// Recompacts an anti-forensically split key.
///
/// `src` must hold at least `stripes * key_size` bytes of decrypted
/// keyslot area; only that prefix is consumed.
pub fn merge(
    hash: HashAlg,
    src: &[u8],
    key_size: usize,
    stripes: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let total = stripes
        .checked_mul(key_size)
        .ok_or_else(|| KeygateError::bad_argument("AF stripe count overflows"))?;
    if stripes == 0 || key_size == 0 {
        return Err(KeygateError::bad_argument("Invalid AF parameters"));
    }
    if src.len() < total {
        return Err(KeygateError::bad_argument(format!(
            "AF material too short: {} < {}",
            src.len(),
            total
        )));
    }

    let mut acc = Zeroizing::new(vec![0u8; key_size]);
    for stripe in src[..total - key_size].chunks_exact(key_size) {
        xor_into(&mut acc, stripe);
        diffuse(hash, &mut acc);
    }
    xor_into(&mut acc, &src[total - key_size..total]);
    Ok(acc)
}

/// Splits `key` into `stripes` diffused blocks, writing them to `dst`.
///
/// The first `stripes - 1` blocks of `dst` are taken as provided (fill
/// them with random bytes before calling); only the final block is
/// computed. `merge` of the result yields `key` again.
pub fn split(hash: HashAlg, key: &[u8], stripes: usize, dst: &mut [u8]) -> Result<()> {
    let key_size = key.len();
    let total = stripes
        .checked_mul(key_size)
        .ok_or_else(|| KeygateError::bad_argument("AF stripe count overflows"))?;
    if stripes == 0 || key_size == 0 {
        return Err(KeygateError::bad_argument("Invalid AF parameters"));
    }
    if dst.len() < total {
        return Err(KeygateError::bad_argument("AF destination too short"));
    }

    let mut acc = Zeroizing::new(vec![0u8; key_size]);
    for stripe in dst[..total - key_size].chunks_exact(key_size) {
        xor_into(&mut acc, stripe);
        diffuse(hash, &mut acc);
    }
    let last = &mut dst[total - key_size..total];
    for (d, (a, k)) in last.iter_mut().zip(acc.iter().zip(key)) {
        *d = a ^ k;
    }
    Ok(())
}

/// Hash-based diffuser: each `digest_len` chunk of `block` is replaced by
/// `hash(be32(chunk_index) || chunk)` truncated to the chunk length.
fn diffuse(hash: HashAlg, block: &mut [u8]) {
    let chunk_len = hash.digest_len();
    for (index, chunk) in block.chunks_mut(chunk_len).enumerate() {
        let mut input = Vec::with_capacity(4 + chunk.len());
        input.extend_from_slice(&(index as u32).to_be_bytes());
        input.extend_from_slice(chunk);
        let out = hash.digest(&input);
        chunk.copy_from_slice(&out[..chunk.len()]);
    }
}

fn xor_into(acc: &mut [u8], stripe: &[u8]) {
    for (a, s) in acc.iter_mut().zip(stripe) {
        *a ^= s;
    }
}
