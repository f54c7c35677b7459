//! Streaming imports: chunk round-trips, crash-safe resume, abort wipes
//! and stale-import cleanup.

mod common;

use std::fs;
use std::path::PathBuf;

use strongroom::{EntryKind, Vault, VaultError};

use common::{PASSPHRASE, patterned, test_vault, vault_path};

const MIB: usize = 1024 * 1024;
const CHUNK: usize = 4 * MIB;

fn source_hash(data: &[u8]) -> [u8; 32] {
    let first = &data[..MIB.min(data.len())];
    let last = if data.len() > 2 * MIB { &data[data.len() - MIB..] } else { &[] };
    Vault::streaming_compute_source_hash(first, last, data.len() as u64)
}

fn staging_root(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join(".pending_imports")
}

#[test]
fn chunked_import_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let vault = test_vault();
    vault.create(vault_path(&dir), PASSPHRASE).unwrap();
    vault.streaming_init().unwrap();

    let data = patterned(20 * MIB);
    let hash = source_hash(&data);
    let (import_id, resume_from) = vault
        .streaming_start("content://video/42", &hash, "clip.mp4", "video/mp4", EntryKind::Video, data.len() as u64)
        .unwrap();
    assert_eq!(resume_from, 0);

    for (i, chunk) in data.chunks(CHUNK).enumerate() {
        vault.streaming_write_chunk(&import_id, chunk, i as u32).unwrap();
    }
    let file_id = vault.streaming_finish(&import_id).unwrap();

    let entries = vault.list_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "clip.mp4");
    assert_eq!(entries[0].size, data.len() as u64);
    assert_eq!(entries[0].chunk_count, 5);

    let mut reassembled = Vec::new();
    for i in 0..5 {
        let chunk = vault.read_chunk(&file_id, i).unwrap();
        if i < 4 {
            assert_eq!(chunk.len(), CHUNK);
        }
        reassembled.extend_from_slice(&chunk);
    }
    assert_eq!(reassembled, data);

    // A chunked entry rejects the whole-file read path.
    assert!(matches!(vault.read_file(&file_id), Err(VaultError::InvalidParam(_))));

    // Staging is gone after a successful finish.
    assert_eq!(fs::read_dir(staging_root(&dir)).unwrap().count(), 0);
}

#[test]
fn resume_after_crash_completes_the_import() {
    let dir = tempfile::tempdir().unwrap();
    let path = vault_path(&dir);
    let data = patterned(20 * MIB);
    let hash = source_hash(&data);

    let vault = test_vault();
    vault.create(&path, PASSPHRASE).unwrap();
    let (import_id, _) = vault
        .streaming_start("content://video/42", &hash, "clip.mp4", "video/mp4", EntryKind::Video, data.len() as u64)
        .unwrap();
    for i in 0..3u32 {
        vault
            .streaming_write_chunk(&import_id, &data[i as usize * CHUNK..(i as usize + 1) * CHUNK], i)
            .unwrap();
    }

    // Crash: the handle goes away without finish or abort.
    drop(vault);

    let vault = test_vault();
    vault.open(&path, PASSPHRASE).unwrap();
    let (resumed_id, resume_from) = vault
        .streaming_start("content://video/42", &hash, "clip.mp4", "video/mp4", EntryKind::Video, data.len() as u64)
        .unwrap();
    assert_eq!(resumed_id, import_id);
    assert_eq!(resume_from, 3);

    for i in 3..5u32 {
        let end = ((i as usize + 1) * CHUNK).min(data.len());
        vault
            .streaming_write_chunk(&import_id, &data[i as usize * CHUNK..end], i)
            .unwrap();
    }
    let file_id = vault.streaming_finish(&import_id).unwrap();

    let mut reassembled = Vec::new();
    for i in 0..5 {
        reassembled.extend_from_slice(&vault.read_chunk(&file_id, i).unwrap());
    }
    assert_eq!(reassembled, data);
}

#[test]
fn starting_the_same_source_twice_returns_the_live_import() {
    let dir = tempfile::tempdir().unwrap();
    let vault = test_vault();
    vault.create(vault_path(&dir), PASSPHRASE).unwrap();

    let data = patterned(5 * MIB);
    let hash = source_hash(&data);
    let (a, _) = vault
        .streaming_start("u", &hash, "f", "video/mp4", EntryKind::Video, data.len() as u64)
        .unwrap();
    vault.streaming_write_chunk(&a, &data[..CHUNK], 0).unwrap();

    let (b, resume_from) = vault
        .streaming_start("u", &hash, "f", "video/mp4", EntryKind::Video, data.len() as u64)
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(resume_from, 1);
}

#[test]
fn abort_wipes_the_staging_directory() {
    let dir = tempfile::tempdir().unwrap();
    let vault = test_vault();
    vault.create(vault_path(&dir), PASSPHRASE).unwrap();

    let data = patterned(9 * MIB);
    let hash = source_hash(&data);
    let (import_id, _) = vault
        .streaming_start("u", &hash, "f", "video/mp4", EntryKind::Video, data.len() as u64)
        .unwrap();
    vault.streaming_write_chunk(&import_id, &data[..CHUNK], 0).unwrap();
    vault.streaming_write_chunk(&import_id, &data[CHUNK..2 * CHUNK], 1).unwrap();

    assert_eq!(fs::read_dir(staging_root(&dir)).unwrap().count(), 1);
    vault.streaming_abort(&import_id).unwrap();
    assert_eq!(fs::read_dir(staging_root(&dir)).unwrap().count(), 0);

    // The import is gone for good.
    assert!(matches!(
        vault.streaming_write_chunk(&import_id, &data[..CHUNK], 2),
        Err(VaultError::NotFound)
    ));
    assert!(matches!(vault.streaming_abort(&import_id), Err(VaultError::NotFound)));
    assert!(vault.list_entries().unwrap().is_empty());
}

#[test]
fn chunk_validation() {
    let dir = tempfile::tempdir().unwrap();
    let vault = test_vault();
    vault.create(vault_path(&dir), PASSPHRASE).unwrap();

    let data = patterned(6 * MIB);
    let hash = source_hash(&data);
    let (import_id, _) = vault
        .streaming_start("u", &hash, "f", "video/mp4", EntryKind::Video, data.len() as u64)
        .unwrap();

    // Out of order.
    assert!(matches!(
        vault.streaming_write_chunk(&import_id, &data[CHUNK..], 1),
        Err(VaultError::InvalidParam(_))
    ));
    // Out of range.
    assert!(matches!(
        vault.streaming_write_chunk(&import_id, &data[..CHUNK], 7),
        Err(VaultError::InvalidParam(_))
    ));
    // Wrong length for a non-final chunk.
    assert!(matches!(
        vault.streaming_write_chunk(&import_id, &data[..CHUNK - 1], 0),
        Err(VaultError::InvalidParam(_))
    ));
    // Finish before completion.
    assert!(matches!(
        vault.streaming_finish(&import_id),
        Err(VaultError::InvalidParam(_))
    ));
}

#[test]
fn size_limits() {
    let dir = tempfile::tempdir().unwrap();
    let vault = test_vault();
    vault.create(vault_path(&dir), PASSPHRASE).unwrap();

    assert!(matches!(
        vault.streaming_start("u", &[0; 32], "f", "video/mp4", EntryKind::Video, 51 * 1024 * 1024 * 1024),
        Err(VaultError::FileTooLarge)
    ));
    assert!(matches!(
        vault.streaming_start("u", &[0; 32], "f", "video/mp4", EntryKind::Video, 0),
        Err(VaultError::InvalidParam(_))
    ));
}

#[test]
fn at_most_four_active_imports() {
    let dir = tempfile::tempdir().unwrap();
    let vault = test_vault();
    vault.create(vault_path(&dir), PASSPHRASE).unwrap();

    for i in 0..4u8 {
        vault
            .streaming_start("u", &[i; 32], &format!("f{i}"), "video/mp4", EntryKind::Video, MIB as u64)
            .unwrap();
    }
    assert!(matches!(
        vault.streaming_start("u", &[9; 32], "f9", "video/mp4", EntryKind::Video, MIB as u64),
        Err(VaultError::InvalidParam(_))
    ));
}

#[test]
fn list_pending_reports_progress_without_the_source_uri() {
    let dir = tempfile::tempdir().unwrap();
    let vault = test_vault();
    vault.create(vault_path(&dir), PASSPHRASE).unwrap();

    let data = patterned(6 * MIB);
    let hash = source_hash(&data);
    let (import_id, _) = vault
        .streaming_start("content://secret/source", &hash, "f.mp4", "video/mp4", EntryKind::Video, data.len() as u64)
        .unwrap();
    vault.streaming_write_chunk(&import_id, &data[..CHUNK], 0).unwrap();

    let pending = vault.streaming_list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].import_id, import_id);
    assert_eq!(pending[0].file_name, "f.mp4");
    assert_eq!(pending[0].total_chunks, 2);
    assert_eq!(pending[0].completed_chunks, 1);
    assert_eq!(pending[0].bytes_written, CHUNK as u64);

    // The staging directory never holds the source location.
    let root = staging_root(&dir);
    for entry in fs::read_dir(root).unwrap() {
        let state = fs::read(entry.unwrap().path().join(".state")).unwrap();
        assert!(!state.windows(6).any(|w| w == b"secret"));
    }
}

#[test]
fn cleanup_removes_stale_imports() {
    let dir = tempfile::tempdir().unwrap();
    let vault = test_vault();
    vault.create(vault_path(&dir), PASSPHRASE).unwrap();

    let data = patterned(5 * MIB);
    let hash = source_hash(&data);
    let (import_id, _) = vault
        .streaming_start("u", &hash, "f", "video/mp4", EntryKind::Video, data.len() as u64)
        .unwrap();
    vault.streaming_write_chunk(&import_id, &data[..CHUNK], 0).unwrap();

    // Nothing is older than an hour.
    assert_eq!(vault.streaming_cleanup_old(3_600_000).unwrap(), 0);

    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(vault.streaming_cleanup_old(5).unwrap(), 1);
    assert_eq!(fs::read_dir(staging_root(&dir)).unwrap().count(), 0);
    assert!(matches!(
        vault.streaming_write_chunk(&import_id, &data[CHUNK..], 1),
        Err(VaultError::NotFound)
    ));
}
