//! Mutating container operations.
//!
//! The append primitive is the heart of every write: direct imports,
//! streaming finishes and entry copies all reduce to "append these sealed
//! segments and commit a new index". Small metadata edits (rename, delete)
//! go through the index-only path instead. Either path escalates to a full
//! rewrite when the index outgrows its capacity.

use std::fs::File;

use secrecy::ExposeSecret;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::config::{
    KEY_LEN, MAX_MIME_LEN, MAX_NAME_LEN, MIN_PASSPHRASE_LEN, NONCE_LEN, RESERVED_NAME_PREFIX,
    SYSTEM_NAME_ALLOWLIST, TAG_LEN, TRAILER_LEN, WRAPPED_KEY_LEN,
};
use crate::crypto::{Aead, SecretBytes, binding_aad, ct_eq, derive_kek, random_array};
use crate::error::{Result, VaultError};
use crate::header::journal;
use crate::index::{self, Entry, EntryKind, FileId, Payload};
use crate::vault::state::VaultState;
use crate::vault::{Vault, derive_with_fallback, io, rewrite};

impl Vault {
    /// Imports a byte buffer as a new single-blob entry.
    ///
    /// # Arguments
    /// * `data` - The plaintext file content
    /// * `kind` - Content class stored in the entry
    /// * `name` - Entry name, UTF-8, at most 4096 bytes
    /// * `mime` - MIME type, at most 512 bytes
    pub fn import_bytes(&self, data: &[u8], kind: EntryKind, name: &str, mime: &str) -> Result<FileId> {
        let mut guard = self.write_state();
        let state = guard.as_mut().ok_or(VaultError::NotOpen)?;

        validate_create_name(name)?;
        if mime.len() > MAX_MIME_LEN {
            return Err(VaultError::InvalidParam("mime type too long"));
        }

        let file_id: FileId = random_array();
        let dek = SecretBytes::from(random_array::<KEY_LEN>().to_vec());
        let wrapped_dek = state.wrap_dek(&file_id, &dek)?;

        let aad = binding_aad(&state.vault_id, &file_id, 0);
        let blob = Aead::new(dek.expose_secret())?.seal(&aad, data)?;

        let entry = Entry {
            id: file_id,
            kind,
            created_at: io::now_ms(),
            name: name.to_string(),
            mime: mime.to_string(),
            size: data.len() as u64,
            wrapped_dek,
            payload: Payload::Blob { offset: 0, length: 0 },
        };
        append_entry(state, entry, vec![blob])?;

        debug!(size = data.len(), "entry imported");
        Ok(file_id)
    }

    /// Renames an entry. Renaming to the current name is a no-op.
    ///
    /// Names with the reserved `__` prefix are only accepted when the entry
    /// already lives in the system namespace or `allow_system` is set, and
    /// even then only for the closed allow-list.
    pub fn rename(&self, id: &FileId, new_name: &str, allow_system: bool) -> Result<()> {
        let mut guard = self.write_state();
        let state = guard.as_mut().ok_or(VaultError::NotOpen)?;
        let pos = state.position(id).ok_or(VaultError::NotFound)?;

        if state.entries[pos].name == new_name {
            return Ok(());
        }
        validate_rename_name(new_name, &state.entries[pos].name, allow_system)?;

        let mut next = state.entries.clone();
        next[pos].name = new_name.to_string();
        index_only_update(state, next)
    }

    /// Soft-deletes an entry: the index record goes away, the ciphertext
    /// stays in the data region until the next compaction.
    pub fn delete(&self, id: &FileId) -> Result<()> {
        let mut guard = self.write_state();
        let state = guard.as_mut().ok_or(VaultError::NotOpen)?;
        let pos = state.position(id).ok_or(VaultError::NotFound)?;

        let mut next = state.entries.clone();
        next.remove(pos);
        index_only_update(state, next)?;

        debug!("entry deleted");
        Ok(())
    }

    /// Copies an entry, re-encrypting its content under a fresh DEK.
    pub fn copy(&self, id: &FileId) -> Result<FileId> {
        let mut guard = self.write_state();
        let state = guard.as_mut().ok_or(VaultError::NotOpen)?;
        let source = state.find(id).ok_or(VaultError::NotFound)?.clone();

        let new_id: FileId = random_array();
        let dek = SecretBytes::from(random_array::<KEY_LEN>().to_vec());
        let wrapped_dek = state.wrap_dek(&new_id, &dek)?;
        let cipher = Aead::new(dek.expose_secret())?;

        let mut segments = Vec::new();
        let payload = match &source.payload {
            Payload::Blob { .. } => {
                let plain = load_file_plain(state, &source)?;
                let aad = binding_aad(&state.vault_id, &new_id, 0);
                segments.push(cipher.seal(&aad, &plain)?);
                Payload::Blob { offset: 0, length: 0 }
            }
            Payload::Chunks(chunks) => {
                let mut refs = Vec::with_capacity(chunks.len());
                for i in 0..chunks.len() as u32 {
                    let plain = load_chunk_plain(state, &source, i)?;
                    let nonce: [u8; NONCE_LEN] = random_array();
                    let aad = binding_aad(&state.vault_id, &new_id, i);
                    segments.push(cipher.seal_with_nonce(&nonce, &aad, &plain)?);
                    refs.push(index::ChunkRef { offset: 0, length: 0, nonce });
                }
                Payload::Chunks(refs)
            }
        };

        let entry = Entry {
            id: new_id,
            kind: source.kind,
            created_at: io::now_ms(),
            name: source.name.clone(),
            mime: source.mime.clone(),
            size: source.size,
            wrapped_dek,
            payload,
        };
        append_entry(state, entry, segments)?;

        debug!("entry copied");
        Ok(new_id)
    }

    /// Changes the vault passphrase.
    ///
    /// The old passphrase is verified by unwrapping the stored master key
    /// and comparing it to the in-memory copy in constant time. Journaled
    /// containers update a single header slot; legacy containers are
    /// migrated to the journaled form through a full rewrite.
    pub fn change_password(&self, old: &[u8], new: &[u8]) -> Result<()> {
        let mut guard = self.write_state();
        let state = guard.as_mut().ok_or(VaultError::NotOpen)?;
        if new.len() < MIN_PASSPHRASE_LEN {
            return Err(VaultError::PassphraseTooShort);
        }

        let old_kek = derive_kek(old, &state.salt, state.kdf)?;
        let (nonce, ct) = state.wrapped_mk.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| VaultError::Corrupted("wrapped key has unexpected length"))?;
        let unwrapped = Aead::new(old_kek.expose_secret())?.open(&nonce, &state.vault_id, ct)?;
        if !ct_eq(&unwrapped, state.master_key.expose()) {
            return Err(VaultError::AuthFail);
        }

        let new_salt = random_array();
        let (new_kek, new_kdf) = derive_with_fallback(new, &new_salt, self.profile())?;
        let wrapped = Aead::new(new_kek.expose_secret())?.seal(&state.vault_id, state.master_key.expose())?;
        let new_wrapped_mk: [u8; WRAPPED_KEY_LEN] = wrapped
            .try_into()
            .map_err(|_| VaultError::Crypto("wrapped key has unexpected length"))?;

        if state.journaled {
            let (new_seq, rewrite_both) = journal::next_seq(state.header_seq);
            let file = io::open_rw(&state.path)?;
            if rewrite_both {
                // Sequence wrapped: re-seed both slots as {1, 2}. The old
                // credentials keep seq 1 so a torn write still opens.
                let old_slot = journal::Slot {
                    seq: 1,
                    vault_id: state.vault_id,
                    salt: state.salt,
                    kdf: state.kdf,
                    wrapped_mk: state.wrapped_mk,
                };
                let new_slot = journal::Slot {
                    seq: new_seq,
                    vault_id: state.vault_id,
                    salt: new_salt,
                    kdf: new_kdf,
                    wrapped_mk: new_wrapped_mk,
                };
                io::write_all_at(&file, &old_slot.encode(), journal::slot_offset(1))?;
                io::write_all_at(&file, &new_slot.encode(), journal::slot_offset(new_seq % 2))?;
            } else {
                let new_slot = journal::Slot {
                    seq: new_seq,
                    vault_id: state.vault_id,
                    salt: new_salt,
                    kdf: new_kdf,
                    wrapped_mk: new_wrapped_mk,
                };
                io::write_all_at(&file, &new_slot.encode(), journal::slot_offset(new_seq % 2))?;
            }
            file.sync_all()?;
            state.header_seq = new_seq;
        } else {
            rewrite::migrate_to_journal(state, new_salt, new_kdf, new_wrapped_mk)?;
        }

        state.salt = new_salt;
        state.kdf = new_kdf;
        state.wrapped_mk = new_wrapped_mk;
        info!("passphrase changed");
        Ok(())
    }
}

/// Appends a new entry whose payload segments are already sealed.
///
/// Offsets are assigned here: the new bytes land at the current end of the
/// data region. Fits-in-capacity appends take the in-place fast path; an
/// index that must grow forces the full rewrite.
pub(crate) fn append_entry(state: &mut VaultState, mut entry: Entry, segments: Vec<Vec<u8>>) -> Result<()> {
    let old_data_end = state.data_end();
    let mut cursor = old_data_end;
    match &mut entry.payload {
        Payload::Blob { offset, length } => {
            let seg = segments
                .first()
                .ok_or(VaultError::InvalidParam("blob entry needs one segment"))?;
            *offset = cursor;
            *length = seg.len() as u64;
            cursor += seg.len() as u64;
        }
        Payload::Chunks(chunks) => {
            if chunks.len() != segments.len() {
                return Err(VaultError::InvalidParam("segment count does not match chunk count"));
            }
            for (c, seg) in chunks.iter_mut().zip(&segments) {
                c.offset = cursor;
                c.length = seg.len() as u32;
                cursor += seg.len() as u64;
            }
        }
    }

    let mut next = state.entries.clone();
    next.push(entry);

    let required = index::serialized_len(&next);
    if required <= state.index_capacity {
        debug!(required, capacity = state.index_capacity, "append: fast path");
        fast_append(state, next, &segments, old_data_end)
    } else {
        debug!(required, capacity = state.index_capacity, "append: index growth, rewriting");
        rewrite::grow_append(state, next, segments)
    }
}

/// In-place append: payload and trailer first, fsync, then the index
/// section overwritten in a single positioned write, fsync again.
///
/// A crash before the index write leaves unreferenced tail bytes (benign,
/// reclaimed by compaction); a crash tearing the index write itself is the
/// accepted fast-path risk.
fn fast_append(state: &mut VaultState, next: Vec<Entry>, segments: &[Vec<u8>], old_data_end: u64) -> Result<()> {
    let file = io::open_rw(&state.path)?;

    let mut offset = old_data_end;
    for seg in segments {
        io::write_all_at(&file, seg, offset)?;
        offset += seg.len() as u64;
    }
    io::write_all_at(&file, &[0u8; TRAILER_LEN], offset)?;
    file.sync_all()?;

    write_index_in_place(state, &file, &next)?;

    state.entries = next;
    state.total_size = offset + TRAILER_LEN as u64;
    Ok(())
}

/// Commits a modified entry table without touching the data region.
///
/// Fits-in-capacity updates overwrite the index section in place; anything
/// larger escalates to the full rewrite.
pub(crate) fn index_only_update(state: &mut VaultState, next: Vec<Entry>) -> Result<()> {
    let required = index::serialized_len(&next);
    if required <= state.index_capacity {
        let file = io::open_rw(&state.path)?;
        write_index_in_place(state, &file, &next)?;
        state.entries = next;
        Ok(())
    } else {
        debug!(required, capacity = state.index_capacity, "index growth, rewriting");
        rewrite::index_rewrite(state, next)
    }
}

/// Seals and overwrites the index section at its fixed offset. The sealed
/// section length is invariant for a fixed capacity, so the write never
/// moves a byte of the data region.
fn write_index_in_place(state: &mut VaultState, file: &File, entries: &[Entry]) -> Result<()> {
    let plain = index::serialize(entries, state.index_capacity)?;
    let section = index::seal_section(&state.cipher()?, &plain)?;
    io::write_all_at(file, &section, state.header_len)?;
    file.sync_all()?;
    state.index_padded = state.index_capacity > index::serialized_len(entries);
    Ok(())
}

/// Loads and decrypts a single-blob entry. Lock-free: callers hold the
/// state lock.
pub(crate) fn load_file_plain(state: &VaultState, entry: &Entry) -> Result<Zeroizing<Vec<u8>>> {
    let Payload::Blob { offset, length } = entry.payload else {
        return Err(VaultError::InvalidParam("entry is chunked; use read_chunk"));
    };
    if length < (NONCE_LEN + TAG_LEN) as u64 {
        return Err(VaultError::Corrupted("blob shorter than nonce and tag"));
    }

    let file = File::open(&state.path)?;
    let mut blob = vec![0u8; length as usize];
    io::read_exact_at(&file, &mut blob, offset)?;

    let (nonce, ct) = blob.split_at(NONCE_LEN);
    let nonce: [u8; NONCE_LEN] = nonce
        .try_into()
        .map_err(|_| VaultError::Corrupted("blob shorter than nonce and tag"))?;

    let dek = state.unwrap_dek(entry)?;
    let aad = binding_aad(&state.vault_id, &entry.id, 0);
    Aead::new(dek.expose_secret())?.open(&nonce, &aad, ct)
}

/// Loads and decrypts one chunk of a chunked entry.
pub(crate) fn load_chunk_plain(state: &VaultState, entry: &Entry, chunk_index: u32) -> Result<Zeroizing<Vec<u8>>> {
    let Payload::Chunks(chunks) = &entry.payload else {
        return Err(VaultError::InvalidParam("entry is not chunked; use read_file"));
    };
    let chunk = chunks
        .get(chunk_index as usize)
        .ok_or(VaultError::InvalidParam("chunk index out of range"))?;
    if chunk.length < TAG_LEN as u32 {
        return Err(VaultError::Corrupted("chunk shorter than its tag"));
    }

    let file = File::open(&state.path)?;
    let mut ct = vec![0u8; chunk.length as usize];
    io::read_exact_at(&file, &mut ct, chunk.offset)?;

    let dek = state.unwrap_dek(entry)?;
    let aad = binding_aad(&state.vault_id, &entry.id, chunk_index);
    Aead::new(dek.expose_secret())?.open(&chunk.nonce, &aad, &ct)
}

/// Shifts every data offset in a table by `delta` bytes.
pub(crate) fn shift_entries(entries: &mut [Entry], delta: i64) {
    for e in entries {
        match &mut e.payload {
            Payload::Blob { offset, .. } => *offset = offset.wrapping_add_signed(delta),
            Payload::Chunks(chunks) => {
                for c in chunks {
                    c.offset = c.offset.wrapping_add_signed(delta);
                }
            }
        }
    }
}

/// Name policy for newly created entries: the reserved `__` prefix is only
/// usable for the exact allow-listed system names.
pub(crate) fn validate_create_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(VaultError::InvalidParam("entry name too long"));
    }
    if name.starts_with(RESERVED_NAME_PREFIX) && !SYSTEM_NAME_ALLOWLIST.contains(&name) {
        return Err(VaultError::InvalidParam("reserved name outside the system allow-list"));
    }
    Ok(())
}

/// Name policy for renames into the system namespace.
fn validate_rename_name(new_name: &str, current_name: &str, allow_system: bool) -> Result<()> {
    if new_name.len() > MAX_NAME_LEN {
        return Err(VaultError::InvalidParam("entry name too long"));
    }
    if new_name.starts_with(RESERVED_NAME_PREFIX) {
        let within_system = current_name.starts_with(RESERVED_NAME_PREFIX);
        if !within_system && !allow_system {
            return Err(VaultError::InvalidParam("reserved name requires allow_system"));
        }
        if !SYSTEM_NAME_ALLOWLIST.contains(&new_name) {
            return Err(VaultError::InvalidParam("reserved name outside the system allow-list"));
        }
    }
    Ok(())
}
