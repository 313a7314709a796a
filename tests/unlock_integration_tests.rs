// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Keygate Contributors
//! Unlock Integration Tests
//!
//! End-to-end tests against synthetic LUKS2 images:
//! - Header pair selection and failover
//! - Keyslot enumeration (Argon2 coexistence, priorities, bad records)
//! - Master key recovery and digest verification
//! - Segment geometry (dynamic and fixed sizes)
//! - Probe (scan) semantics and detached headers

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use keygate::crypto::af;
use keygate::luks2::{Header, HEADER_SIZE, MAGIC_PRIMARY, MAGIC_SECONDARY};
use keygate::{recover_key, scan, CryptoDisk, FileSource, HashAlg, KeygateError, ScanOptions};

const HDR_SIZE: u64 = 16384;
const KEY_SIZE: usize = 64;
const STRIPES: usize = 4;
const AREA_SIZE: usize = 512;
const ITERATIONS: u32 = 1000;
const UUID: &str = "c5a4f1a0-3b6c-4f0f-9a3e-2dc64249e3b5";
const PASSPHRASE: &[u8] = b"correct horse battery staple";
const DIGEST_SALT: &[u8] = b"digest-salt-0123";

fn master_key() -> Vec<u8> {
    (0..KEY_SIZE).map(|i| (i as u8).wrapping_mul(37) ^ 0x3c).collect()
}

fn slot_salt(slot: u64) -> Vec<u8> {
    format!("slot-{slot}-salt-padding").into_bytes()
}

fn area_offset(slot: u64) -> u64 {
    0x8000 + slot * 0x1000
}

#[derive(Clone, Copy)]
enum SlotKdf {
    Pbkdf2,
    Argon2id,
}

struct SlotSpec {
    kdf: SlotKdf,
    priority: Option<i64>,
    passphrase: &'static [u8],
}

impl SlotSpec {
    fn pbkdf2(passphrase: &'static [u8]) -> Self {
        Self {
            kdf: SlotKdf::Pbkdf2,
            priority: None,
            passphrase,
        }
    }
}

struct ImageSpec {
    device_size: usize,
    primary_seqid: u64,
    secondary_seqid: u64,
    segment_offset: u64,
    segment_size: String,
    slots: Vec<SlotSpec>,
    digest_keyslots: Option<Vec<String>>,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            device_size: 2 * 1024 * 1024,
            primary_seqid: 10,
            secondary_seqid: 9,
            segment_offset: 1024 * 1024,
            segment_size: "dynamic".to_string(),
            slots: vec![SlotSpec::pbkdf2(PASSPHRASE)],
            digest_keyslots: None,
        }
    }
}

fn keyslot_json(spec: &SlotSpec, slot: u64) -> Value {
    let kdf = match spec.kdf {
        SlotKdf::Pbkdf2 => json!({
            "type": "pbkdf2",
            "salt": BASE64.encode(slot_salt(slot)),
            "hash": "sha256",
            "iterations": ITERATIONS
        }),
        SlotKdf::Argon2id => json!({
            "type": "argon2id",
            "salt": BASE64.encode(slot_salt(slot)),
            "time": 4,
            "memory": 235980,
            "cpus": 2
        }),
    };
    let mut value = json!({
        "type": "luks2",
        "key_size": KEY_SIZE,
        "area": {
            "type": "raw",
            "offset": area_offset(slot).to_string(),
            "size": AREA_SIZE.to_string(),
            "encryption": "aes-xts-plain64",
            "key_size": KEY_SIZE
        },
        "kdf": kdf,
        "af": { "type": "luks1", "stripes": STRIPES, "hash": "sha256" }
    });
    if let Some(priority) = spec.priority {
        value["priority"] = json!(priority);
    }
    value
}

/// Encrypted keyslot area holding the AF-split master key, wrapped by
/// the slot passphrase.
fn keyslot_area(spec: &SlotSpec, slot: u64) -> Vec<u8> {
    let mut area = vec![0u8; AREA_SIZE];
    // Deterministic stand-in for the random stripe material a real
    // writer would use.
    for (i, byte) in area.iter_mut().take((STRIPES - 1) * KEY_SIZE).enumerate() {
        *byte = (i as u8).wrapping_mul(197).wrapping_add(11);
    }
    af::split(
        HashAlg::Sha256,
        &master_key(),
        STRIPES,
        &mut area[..STRIPES * KEY_SIZE],
    )
    .unwrap();

    let mut area_key = vec![0u8; KEY_SIZE];
    HashAlg::Sha256.pbkdf2(spec.passphrase, &slot_salt(slot), ITERATIONS, &mut area_key);

    let mut crypt = CryptoDisk::new(UUID, "luks2");
    crypt.set_cipher("aes", "xts-plain64").unwrap();
    crypt.set_key(&area_key).unwrap();
    crypt.encrypt_sectors(&mut area, 0, 9).unwrap();
    area
}

fn header(magic: [u8; 6], seqid: u64, hdr_offset: u64) -> Header {
    let mut header = Header::default();
    header.magic = magic;
    header.version = 2;
    header.hdr_size = HDR_SIZE;
    header.seqid = seqid;
    header.hdr_offset = hdr_offset;
    header.uuid[..UUID.len()].copy_from_slice(UUID.as_bytes());
    header
}

fn build_image(spec: &ImageSpec) -> Vec<u8> {
    let mut image = vec![0u8; spec.device_size];

    let slot_ids: Vec<String> = (0..spec.slots.len() as u64).map(|i| i.to_string()).collect();
    let keyslots: Value = spec
        .slots
        .iter()
        .enumerate()
        .map(|(i, slot)| (i.to_string(), keyslot_json(slot, i as u64)))
        .collect::<serde_json::Map<String, Value>>()
        .into();

    let mut digest_tag = vec![0u8; 32];
    HashAlg::Sha256.pbkdf2(&master_key(), DIGEST_SALT, ITERATIONS, &mut digest_tag);

    let document = json!({
        "keyslots": keyslots,
        "segments": {
            "0": {
                "type": "crypt",
                "offset": spec.segment_offset.to_string(),
                "size": spec.segment_size,
                "encryption": "aes-xts-plain64",
                "sector_size": 512
            }
        },
        "digests": {
            "0": {
                "type": "pbkdf2",
                "keyslots": spec.digest_keyslots.clone().unwrap_or(slot_ids),
                "segments": ["0"],
                "salt": BASE64.encode(DIGEST_SALT),
                "digest": BASE64.encode(&digest_tag),
                "hash": "sha256",
                "iterations": ITERATIONS
            }
        },
        "config": { "json_size": (HDR_SIZE - HEADER_SIZE as u64).to_string(), "keyslots_size": "131072" }
    });
    let json_bytes = document.to_string().into_bytes();
    assert!(json_bytes.len() < (HDR_SIZE as usize - HEADER_SIZE) - 1);

    let primary = header(MAGIC_PRIMARY, spec.primary_seqid, 0);
    let secondary = header(MAGIC_SECONDARY, spec.secondary_seqid, HDR_SIZE);
    image[..HEADER_SIZE].copy_from_slice(&primary.to_bytes());
    image[HEADER_SIZE..HEADER_SIZE + json_bytes.len()].copy_from_slice(&json_bytes);
    let secondary_at = HDR_SIZE as usize;
    image[secondary_at..secondary_at + HEADER_SIZE].copy_from_slice(&secondary.to_bytes());
    image[secondary_at + HEADER_SIZE..secondary_at + HEADER_SIZE + json_bytes.len()]
        .copy_from_slice(&json_bytes);

    for (i, slot) in spec.slots.iter().enumerate() {
        let offset = area_offset(i as u64) as usize;
        image[offset..offset + AREA_SIZE].copy_from_slice(&keyslot_area(slot, i as u64));
    }

    image
}

/// Writes a recognizable payload, encrypted under the master key, at the
/// start of the segment.
fn write_payload(image: &mut [u8], segment_offset: u64) -> Vec<u8> {
    let plaintext: Vec<u8> = (0..512).map(|i| (i % 239) as u8).collect();
    let mut sector = plaintext.clone();
    let mut crypt = CryptoDisk::new(UUID, "luks2");
    crypt.set_cipher("aes", "xts-plain64").unwrap();
    crypt.set_key(&master_key()).unwrap();
    crypt.encrypt_sectors(&mut sector, 0, 9).unwrap();
    let offset = segment_offset as usize;
    image[offset..offset + 512].copy_from_slice(&sector);
    plaintext
}

// =============================================================================
// Header selection
// =============================================================================

#[test]
fn test_primary_header_wins_on_seqid() {
    let image = build_image(&ImageSpec {
        primary_seqid: 10,
        secondary_seqid: 9,
        ..Default::default()
    });
    let header = keygate::luks2::read_header(&mut Cursor::new(image), None).unwrap();
    assert_eq!(header.magic, MAGIC_PRIMARY);
    assert_eq!(header.seqid, 10);
}

#[test]
fn test_secondary_header_wins_on_seqid() {
    let image = build_image(&ImageSpec {
        primary_seqid: 9,
        secondary_seqid: 10,
        ..Default::default()
    });
    let header = keygate::luks2::read_header(&mut Cursor::new(image), None).unwrap();
    assert_eq!(header.magic, MAGIC_SECONDARY);
    assert_eq!(header.seqid, 10);
}

#[test]
fn test_seqid_tie_resolves_to_primary() {
    let image = build_image(&ImageSpec {
        primary_seqid: 7,
        secondary_seqid: 7,
        ..Default::default()
    });
    let header = keygate::luks2::read_header(&mut Cursor::new(image), None).unwrap();
    assert_eq!(header.magic, MAGIC_PRIMARY);
}

#[test]
fn test_bad_version_is_bad_signature() {
    let mut image = build_image(&ImageSpec::default());
    // version is big-endian at offset 6
    image[6] = 0;
    image[7] = 1;
    let err = keygate::luks2::read_header(&mut Cursor::new(image), None).unwrap_err();
    assert!(matches!(err, KeygateError::BadSignature(_)));
}

// =============================================================================
// Master key recovery
// =============================================================================

#[test]
fn test_single_slot_unlock_configures_descriptor() {
    let spec = ImageSpec::default();
    let mut image = build_image(&spec);
    let plaintext = write_payload(&mut image, spec.segment_offset);

    let mut source = Cursor::new(image.clone());
    let mut crypt = scan(&mut source, None, ScanOptions::default()).unwrap();
    recover_key(&mut source, &mut crypt, None, Some(PASSPHRASE)).unwrap();

    assert_eq!(crypt.uuid, UUID);
    assert_eq!(crypt.modname, "luks2");
    assert_eq!(crypt.offset_sectors, (1024 * 1024) / 512);
    assert_eq!(crypt.log_sector_size, 9);

    // The programmed master key decrypts the payload.
    let offset = spec.segment_offset as usize;
    let mut sector = image[offset..offset + 512].to_vec();
    crypt.decrypt_sectors(&mut sector, 0, 9).unwrap();
    assert_eq!(sector, plaintext);
}

#[test]
fn test_argon2_slot_skipped_pbkdf2_slot_opens() {
    let spec = ImageSpec {
        slots: vec![
            SlotSpec {
                kdf: SlotKdf::Argon2id,
                priority: None,
                passphrase: PASSPHRASE,
            },
            SlotSpec::pbkdf2(PASSPHRASE),
        ],
        ..Default::default()
    };
    let mut image = build_image(&spec);
    let plaintext = write_payload(&mut image, spec.segment_offset);

    let mut source = Cursor::new(image.clone());
    let mut crypt = CryptoDisk::new(UUID, "luks2");
    recover_key(&mut source, &mut crypt, None, Some(PASSPHRASE)).unwrap();

    let offset = spec.segment_offset as usize;
    let mut sector = image[offset..offset + 512].to_vec();
    crypt.decrypt_sectors(&mut sector, 0, 9).unwrap();
    assert_eq!(sector, plaintext);
}

#[test]
fn test_wrong_passphrase_is_access_denied() {
    let image = build_image(&ImageSpec::default());
    let mut source = Cursor::new(image);
    let mut crypt = CryptoDisk::new(UUID, "luks2");
    let err = recover_key(&mut source, &mut crypt, None, Some(b"wrong passphrase")).unwrap_err();
    assert!(matches!(err, KeygateError::AccessDenied(_)));
    assert!(err.to_string().contains("Invalid passphrase"));
}

#[test]
fn test_second_slot_opens_with_its_own_passphrase() {
    let spec = ImageSpec {
        slots: vec![
            SlotSpec::pbkdf2(b"first passphrase"),
            SlotSpec::pbkdf2(b"second passphrase"),
        ],
        ..Default::default()
    };
    let image = build_image(&spec);

    let mut source = Cursor::new(image);
    let mut crypt = CryptoDisk::new(UUID, "luks2");
    recover_key(&mut source, &mut crypt, None, Some(b"second passphrase")).unwrap();
}

#[test]
fn test_priority_zero_slot_is_skipped() {
    let spec = ImageSpec {
        slots: vec![SlotSpec {
            kdf: SlotKdf::Pbkdf2,
            priority: Some(0),
            passphrase: PASSPHRASE,
        }],
        ..Default::default()
    };
    let image = build_image(&spec);

    let mut source = Cursor::new(image);
    let mut crypt = CryptoDisk::new(UUID, "luks2");
    let err = recover_key(&mut source, &mut crypt, None, Some(PASSPHRASE)).unwrap_err();
    assert!(matches!(err, KeygateError::AccessDenied(_)));
}

#[test]
fn test_keyfile_passphrase_with_embedded_nul() {
    let spec = ImageSpec {
        slots: vec![SlotSpec::pbkdf2(b"key\0file\0bytes")],
        ..Default::default()
    };
    let image = build_image(&spec);

    let mut source = Cursor::new(image);
    let mut crypt = CryptoDisk::new(UUID, "luks2");
    recover_key(&mut source, &mut crypt, None, Some(b"key\0file\0bytes")).unwrap();
}

#[test]
fn test_digest_reference_out_of_range_skips_slot() {
    let spec = ImageSpec {
        digest_keyslots: Some(vec!["64".to_string()]),
        ..Default::default()
    };
    let image = build_image(&spec);

    let mut source = Cursor::new(image);
    let mut crypt = CryptoDisk::new(UUID, "luks2");
    let err = recover_key(&mut source, &mut crypt, None, Some(PASSPHRASE)).unwrap_err();
    assert!(matches!(err, KeygateError::AccessDenied(_)));
}

#[test]
fn test_unterminated_json_area_rejected() {
    let mut image = build_image(&ImageSpec::default());
    for byte in &mut image[HEADER_SIZE..HDR_SIZE as usize] {
        if *byte == 0 {
            *byte = b' ';
        }
    }
    let mut source = Cursor::new(image);
    let mut crypt = CryptoDisk::new(UUID, "luks2");
    let err = recover_key(&mut source, &mut crypt, None, Some(PASSPHRASE)).unwrap_err();
    assert!(matches!(err, KeygateError::BadArgument(_)));
}

// =============================================================================
// Segment geometry
// =============================================================================

#[test]
fn test_dynamic_segment_geometry() {
    // 20 MiB device, 16 MiB segment offset, 512-byte sectors.
    let spec = ImageSpec {
        device_size: 20 * 1024 * 1024,
        segment_offset: 16 * 1024 * 1024,
        ..Default::default()
    };
    let image = build_image(&spec);

    let mut source = Cursor::new(image);
    let mut crypt = CryptoDisk::new(UUID, "luks2");
    recover_key(&mut source, &mut crypt, None, Some(PASSPHRASE)).unwrap();

    assert_eq!(crypt.offset_sectors, 32768);
    assert_eq!(crypt.log_sector_size, 9);
    assert_eq!(crypt.total_sectors, 8192);
}

#[test]
fn test_fixed_segment_size() {
    let spec = ImageSpec {
        segment_size: "524288".to_string(),
        ..Default::default()
    };
    let image = build_image(&spec);

    let mut source = Cursor::new(image);
    let mut crypt = CryptoDisk::new(UUID, "luks2");
    recover_key(&mut source, &mut crypt, None, Some(PASSPHRASE)).unwrap();

    assert_eq!(crypt.total_sectors, 1024);
    assert_eq!(crypt.offset_sectors, 2048);
}

// =============================================================================
// Probe (scan)
// =============================================================================

#[test]
fn test_scan_returns_descriptor() {
    let image = build_image(&ImageSpec::default());
    let crypt = scan(&mut Cursor::new(image), None, ScanOptions::default()).unwrap();
    assert_eq!(crypt.uuid, UUID);
    assert_eq!(crypt.modname, "luks2");
}

#[test]
fn test_scan_uuid_probe_is_case_insensitive() {
    let image = build_image(&ImageSpec::default());
    let upper = UUID.to_uppercase();
    let options = ScanOptions {
        check_uuid: Some(&upper),
        check_boot: false,
    };
    assert!(scan(&mut Cursor::new(image), None, options).is_some());
}

#[test]
fn test_scan_uuid_mismatch_is_silent() {
    let image = build_image(&ImageSpec::default());
    let options = ScanOptions {
        check_uuid: Some("00000000-0000-0000-0000-000000000000"),
        check_boot: false,
    };
    assert!(scan(&mut Cursor::new(image), None, options).is_none());
}

#[test]
fn test_scan_non_luks_device_is_silent() {
    assert!(scan(
        &mut Cursor::new(vec![0u8; 65536]),
        None,
        ScanOptions::default()
    )
    .is_none());
}

#[test]
fn test_scan_boot_probe_refused() {
    let image = build_image(&ImageSpec::default());
    let options = ScanOptions {
        check_uuid: None,
        check_boot: true,
    };
    assert!(scan(&mut Cursor::new(image), None, options).is_none());
}

// =============================================================================
// Detached headers
// =============================================================================

#[test]
fn test_detached_header_unlock() {
    use std::io::Write;

    let spec = ImageSpec::default();
    let image = build_image(&spec);

    let mut header_file = tempfile::NamedTempFile::new().unwrap();
    header_file.write_all(&image).unwrap();
    header_file.flush().unwrap();

    // The data device carries no header at all.
    let mut source = Cursor::new(vec![0u8; spec.device_size]);
    let mut detached = FileSource::open(header_file.path()).unwrap();

    let mut crypt = scan(
        &mut source,
        Some(&mut detached),
        ScanOptions::default(),
    )
    .unwrap();
    recover_key(&mut source, &mut crypt, Some(&mut detached), Some(PASSPHRASE)).unwrap();
    assert_eq!(crypt.offset_sectors, 2048);
}

#[test]
fn test_headerless_device_fails_without_detached_header() {
    let spec = ImageSpec::default();
    let mut source = Cursor::new(vec![0u8; spec.device_size]);
    let mut crypt = CryptoDisk::new(UUID, "luks2");
    let err = recover_key(&mut source, &mut crypt, None, Some(PASSPHRASE)).unwrap_err();
    assert!(matches!(err, KeygateError::BadSignature(_)));
}
