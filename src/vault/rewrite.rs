//! The slow path: full container rewrites through a staged temp file.
//!
//! Index growth, legacy migration and compaction all funnel into one
//! routine that streams a new container image into `<path>.tmp` and
//! atomically renames it into place. The data region of the new image is
//! described as a sequence of runs: byte ranges copied from the old file
//! plus freshly sealed segments.

use std::fs::File;
use std::io::Write;

use tracing::{debug, info};

use crate::config::{REWRITE_BUF_SIZE, SALT_LEN, TRAILER_LEN, WRAPPED_KEY_LEN};
use crate::crypto::KdfParams;
use crate::error::{Result, VaultError};
use crate::header::{journal, legacy};
use crate::index::{self, Entry, Payload};
use crate::vault::state::VaultState;
use crate::vault::{Vault, io, ops};

/// One piece of the new data region.
pub(crate) enum DataRun {
    /// Copy `len` bytes from `offset` in the old container.
    Copy { offset: u64, len: u64 },
    /// Write these freshly produced bytes.
    Write(Vec<u8>),
}

impl Vault {
    /// Rewrites the container so the data region holds exactly the live
    /// blobs, contiguously.
    ///
    /// A no-op while less than a quarter of the container is reclaimable.
    /// Every blob is decrypted on the way through, so latent corruption
    /// surfaces here instead of being carried into the new image.
    pub fn compact(&self) -> Result<()> {
        let mut guard = self.write_state();
        let state = guard.as_mut().ok_or(VaultError::NotOpen)?;

        let free = state.free_space();
        if free * 4 < state.total_size {
            debug!(free, total = state.total_size, "compaction skipped");
            return Ok(());
        }

        for entry in &state.entries {
            match &entry.payload {
                Payload::Blob { .. } => {
                    ops::load_file_plain(state, entry)?;
                }
                Payload::Chunks(chunks) => {
                    for i in 0..chunks.len() as u32 {
                        ops::load_chunk_plain(state, entry, i)?;
                    }
                }
            }
        }

        let mut entries = state.entries.clone();
        let required = index::serialized_len(&entries);
        let capacity = index::choose_capacity(required, 0);

        let mut runs = Vec::new();
        let mut cursor = state.header_len + index::section_len(capacity);
        for e in &mut entries {
            match &mut e.payload {
                Payload::Blob { offset, length } => {
                    runs.push(DataRun::Copy { offset: *offset, len: *length });
                    *offset = cursor;
                    cursor += *length;
                }
                Payload::Chunks(chunks) => {
                    for c in chunks {
                        runs.push(DataRun::Copy { offset: c.offset, len: u64::from(c.length) });
                        c.offset = cursor;
                        cursor += u64::from(c.length);
                    }
                }
            }
        }

        let header_bytes = read_header_bytes(state)?;
        let before = state.total_size;
        rewrite_container(state, &header_bytes, capacity, entries, runs)?;
        info!(reclaimed = before - state.total_size, "vault compacted");
        Ok(())
    }
}

/// Slow-path append: grow the index, shift every offset by the growth
/// delta, and rewrite with the new segments behind the copied data region.
pub(crate) fn grow_append(state: &mut VaultState, mut next: Vec<Entry>, segments: Vec<Vec<u8>>) -> Result<()> {
    let required = index::serialized_len(&next);
    let capacity = index::choose_capacity(required, state.index_capacity);
    let delta = capacity as i64 - state.index_capacity as i64;
    ops::shift_entries(&mut next, delta);

    let mut runs = vec![DataRun::Copy {
        offset: state.data_start(),
        len: state.data_end() - state.data_start(),
    }];
    runs.extend(segments.into_iter().map(DataRun::Write));

    let header_bytes = read_header_bytes(state)?;
    rewrite_container(state, &header_bytes, capacity, next, runs)
}

/// Slow-path index-only update (rename that outgrows the capacity).
pub(crate) fn index_rewrite(state: &mut VaultState, mut next: Vec<Entry>) -> Result<()> {
    let required = index::serialized_len(&next);
    let capacity = index::choose_capacity(required, state.index_capacity);
    let delta = capacity as i64 - state.index_capacity as i64;
    ops::shift_entries(&mut next, delta);

    let runs = vec![DataRun::Copy {
        offset: state.data_start(),
        len: state.data_end() - state.data_start(),
    }];

    let header_bytes = read_header_bytes(state)?;
    rewrite_container(state, &header_bytes, capacity, next, runs)
}

/// Migrates a legacy container to the journaled header form.
///
/// The new header is larger than the legacy one, so every data offset
/// shifts by the difference; the data region bytes themselves are copied
/// unchanged and the trailer is zeroed.
pub(crate) fn migrate_to_journal(
    state: &mut VaultState,
    new_salt: [u8; SALT_LEN],
    new_kdf: KdfParams,
    new_wrapped_mk: [u8; WRAPPED_KEY_LEN],
) -> Result<()> {
    let slot = journal::Slot {
        seq: 1,
        vault_id: state.vault_id,
        salt: new_salt,
        kdf: new_kdf,
        wrapped_mk: new_wrapped_mk,
    };
    let header_bytes = journal::encode_region(None, Some(&slot));
    let delta = journal::HEADER_LEN as i64 - legacy::HEADER_LEN as i64;

    let mut entries = state.entries.clone();
    ops::shift_entries(&mut entries, delta);

    let runs = vec![DataRun::Copy {
        offset: state.data_start(),
        len: state.data_end() - state.data_start(),
    }];

    let capacity = state.index_capacity;
    rewrite_container(state, &header_bytes, capacity, entries, runs)?;

    state.journaled = true;
    state.header_seq = 1;
    info!("legacy container migrated to journaled header");
    Ok(())
}

/// Reads the current header region verbatim.
fn read_header_bytes(state: &VaultState) -> Result<Vec<u8>> {
    let file = File::open(&state.path)?;
    let mut buf = vec![0u8; state.header_len as usize];
    io::read_exact_at(&file, &mut buf, 0)?;
    Ok(buf)
}

/// Streams the new container image into `<path>.tmp` and renames it over
/// the old file. `entries` must already carry their final offsets.
fn rewrite_container(
    state: &mut VaultState,
    header_bytes: &[u8],
    capacity: usize,
    entries: Vec<Entry>,
    runs: Vec<DataRun>,
) -> Result<()> {
    let plain = index::serialize(&entries, capacity)?;
    let section = index::seal_section(&state.cipher()?, &plain)?;
    let src = File::open(&state.path)?;

    let mut data_len = 0u64;
    io::replace_file(&state.path, |dst| {
        dst.write_all(header_bytes)?;
        dst.write_all(&section)?;

        let mut buf = vec![0u8; REWRITE_BUF_SIZE];
        for run in &runs {
            match run {
                DataRun::Copy { offset, len } => {
                    let mut at = *offset;
                    let mut remaining = *len;
                    while remaining > 0 {
                        let n = (buf.len() as u64).min(remaining) as usize;
                        io::read_exact_at(&src, &mut buf[..n], at)?;
                        dst.write_all(&buf[..n])?;
                        at += n as u64;
                        remaining -= n as u64;
                    }
                    data_len += len;
                }
                DataRun::Write(bytes) => {
                    dst.write_all(bytes)?;
                    data_len += bytes.len() as u64;
                }
            }
        }

        dst.write_all(&[0u8; TRAILER_LEN])?;
        Ok(())
    })?;

    state.header_len = header_bytes.len() as u64;
    state.index_capacity = capacity;
    state.index_padded = capacity > index::serialized_len(&entries);
    state.entries = entries;
    state.total_size = header_bytes.len() as u64 + section.len() as u64 + data_len + TRAILER_LEN as u64;
    state.validate_extents()?;
    Ok(())
}
