//! Header journaling: passphrase changes, torn-write fallback, and the
//! legacy-to-journal migration.

mod common;

use std::fs;
use std::path::Path;

use secrecy::ExposeSecret;
use strongroom::config::{JOURNAL_MAGIC, LEGACY_MAGIC, MIN_INDEX_CAPACITY};
use strongroom::crypto::{self, Aead, KdfProfile, Sha256Stream, binding_aad, derive_kek};
use strongroom::header::legacy;
use strongroom::index::{self, Entry, EntryKind, FileId, Payload};
use strongroom::VaultError;

use common::{PASSPHRASE, patterned, test_vault, vault_path};

const SLOT0: usize = 28;
const SLOT1: usize = 28 + 128;
const HEADER_END: usize = 28 + 2 * 128;

#[test]
fn passphrase_change_rolls_the_journal() {
    let dir = tempfile::tempdir().unwrap();
    let path = vault_path(&dir);

    let vault = test_vault();
    vault.create(&path, PASSPHRASE).unwrap();
    let id = vault
        .import_bytes(b"hello", EntryKind::Text, "a.txt", "text/plain")
        .unwrap();
    vault.change_password(PASSPHRASE, b"a brand new passphrase").unwrap();
    vault.close();

    // New passphrase opens, old one fails.
    let vault = test_vault();
    vault.open(&path, b"a brand new passphrase").unwrap();
    assert_eq!(vault.read_file(&id).unwrap().as_slice(), b"hello");
    vault.close();

    assert!(matches!(
        test_vault().open(&path, PASSPHRASE),
        Err(VaultError::AuthFail)
    ));
}

#[test]
fn torn_slot_write_falls_back_to_previous_passphrase() {
    let dir = tempfile::tempdir().unwrap();
    let path = vault_path(&dir);

    // Create: seq 1 in slot 1. Change: seq 2 in slot 0.
    let vault = test_vault();
    vault.create(&path, PASSPHRASE).unwrap();
    let id = vault
        .import_bytes(b"survivor", EntryKind::Text, "s.txt", "text/plain")
        .unwrap();
    vault.change_password(PASSPHRASE, b"a brand new passphrase").unwrap();
    vault.close();

    // Simulate the crash mid-write by copying the old slot over the new one.
    let mut bytes = fs::read(&path).unwrap();
    let old_slot = bytes[SLOT1..HEADER_END].to_vec();
    bytes[SLOT0..SLOT1].copy_from_slice(&old_slot);
    fs::write(&path, &bytes).unwrap();

    // The surviving slot carries the pre-change credentials.
    let vault = test_vault();
    vault.open(&path, PASSPHRASE).unwrap();
    assert_eq!(vault.read_file(&id).unwrap().as_slice(), b"survivor");
}

#[test]
fn trashed_newest_slot_falls_back_to_older_seq() {
    let dir = tempfile::tempdir().unwrap();
    let path = vault_path(&dir);

    // Walk the journal to seq 7: slot 1 holds seq 7, slot 0 holds seq 6.
    let passes: Vec<Vec<u8>> = (1..=7).map(|i| format!("passphrase number {i}").into_bytes()).collect();
    let vault = test_vault();
    vault.create(&path, &passes[0]).unwrap();
    let id = vault
        .import_bytes(b"keep me", EntryKind::Text, "k.txt", "text/plain")
        .unwrap();
    for pair in passes.windows(2) {
        vault.change_password(&pair[0], &pair[1]).unwrap();
    }
    vault.close();

    // Destroy slot 1 (seq 7) with random bytes; its CRC now fails.
    let mut bytes = fs::read(&path).unwrap();
    let noise: Vec<u8> = (0..128).map(|i| (i * 37 + 11) as u8).collect();
    bytes[SLOT1..HEADER_END].copy_from_slice(&noise);
    fs::write(&path, &bytes).unwrap();

    // Seq 6 wins; that slot holds the passphrase of change number 5.
    let vault = test_vault();
    assert!(matches!(vault.open(&path, &passes[6]), Err(VaultError::AuthFail)));
    vault.open(&path, &passes[5]).unwrap();
    assert_eq!(vault.read_file(&id).unwrap().as_slice(), b"keep me");
}

/// Builds a pre-journal container the way the original writers did: legacy
/// header, sealed index, data region, SHA-256 trailer.
fn synthesize_legacy(path: &Path, passphrase: &[u8], files: &[(&str, Vec<u8>)]) -> Vec<FileId> {
    let salt: [u8; 16] = crypto::random_array();
    let vault_id: [u8; 16] = crypto::random_array();
    let mk: [u8; 32] = crypto::random_array();
    let kdf = KdfProfile::Low.params();

    let kek = derive_kek(passphrase, &salt, kdf).unwrap();
    let wrapped_mk: [u8; 72] = Aead::new(kek.expose_secret())
        .unwrap()
        .seal(&vault_id, &mk)
        .unwrap()
        .try_into()
        .unwrap();

    let header = legacy::encode(&vault_id, &salt, kdf, &wrapped_mk);

    let capacity = MIN_INDEX_CAPACITY;
    let data_start = legacy::HEADER_LEN as u64 + index::section_len(capacity);

    let mk_cipher = Aead::new(&mk).unwrap();
    let mut data = Vec::new();
    let mut entries = Vec::new();
    let mut ids = Vec::new();
    for (name, content) in files {
        let file_id: [u8; 16] = crypto::random_array();
        let dek: [u8; 32] = crypto::random_array();
        let aad = binding_aad(&vault_id, &file_id, 0);
        let wrapped_dek = mk_cipher.seal(&aad, &dek).unwrap();
        let blob = Aead::new(&dek).unwrap().seal(&aad, content).unwrap();

        entries.push(Entry {
            id: file_id,
            kind: EntryKind::Image,
            created_at: 1_600_000_000_000,
            name: (*name).to_string(),
            mime: "application/octet-stream".to_string(),
            size: content.len() as u64,
            wrapped_dek,
            payload: Payload::Blob {
                offset: data_start + data.len() as u64,
                length: blob.len() as u64,
            },
        });
        data.extend_from_slice(&blob);
        ids.push(file_id);
    }

    let plain = index::serialize(&entries, capacity).unwrap();
    let section = index::seal_section(&mk_cipher, &plain).unwrap();

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&section);
    bytes.extend_from_slice(&data);
    let mut trailer = Sha256Stream::new();
    trailer.update(&bytes);
    bytes.extend_from_slice(&trailer.finish());

    fs::write(path, &bytes).unwrap();
    ids
}

#[test]
fn legacy_container_opens_and_reads() {
    let dir = tempfile::tempdir().unwrap();
    let path = vault_path(&dir);
    let files = vec![("tiny", patterned(10)), ("mid", patterned(1 << 20))];
    let ids = synthesize_legacy(&path, PASSPHRASE, &files);

    let vault = test_vault();
    vault.open(&path, PASSPHRASE).unwrap();
    for (id, (_, content)) in ids.iter().zip(&files) {
        assert_eq!(vault.read_file(id).unwrap().as_slice(), &content[..]);
    }
}

#[test]
fn passphrase_change_migrates_legacy_to_journal() {
    let dir = tempfile::tempdir().unwrap();
    let path = vault_path(&dir);
    let files = vec![
        ("tiny", patterned(10)),
        ("mid", patterned(1 << 20)),
        ("big", patterned(5 << 20)),
    ];
    let ids = synthesize_legacy(&path, b"old passphrase!", &files);
    assert_eq!(&fs::read(&path).unwrap()[..8], LEGACY_MAGIC);

    let vault = test_vault();
    vault.open(&path, b"old passphrase!").unwrap();
    vault
        .change_password(b"old passphrase!", b"new passphrase!")
        .unwrap();

    // Entries are readable through the migrated geometry without a reopen.
    for (id, (_, content)) in ids.iter().zip(&files) {
        assert_eq!(vault.read_file(id).unwrap().as_slice(), &content[..]);
    }
    vault.close();

    let bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[..8], JOURNAL_MAGIC);

    let vault = test_vault();
    vault.open(&path, b"new passphrase!").unwrap();
    for (id, (_, content)) in ids.iter().zip(&files) {
        assert_eq!(vault.read_file(id).unwrap().as_slice(), &content[..]);
    }
    vault.close();

    assert!(matches!(
        test_vault().open(&path, b"old passphrase!"),
        Err(VaultError::AuthFail)
    ));
}

#[test]
fn migrated_container_journals_further_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = vault_path(&dir);
    let ids = synthesize_legacy(&path, b"old passphrase!", &[("f", patterned(512))]);

    let vault = test_vault();
    vault.open(&path, b"old passphrase!").unwrap();
    vault.change_password(b"old passphrase!", b"second passphrase").unwrap();
    vault.change_password(b"second passphrase", b"third passphrase!").unwrap();
    vault.close();

    let vault = test_vault();
    vault.open(&path, b"third passphrase!").unwrap();
    assert_eq!(vault.read_file(&ids[0]).unwrap().as_slice(), &patterned(512)[..]);
}
