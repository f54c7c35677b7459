//! Crash-safe streaming imports.
//!
//! Files too large to hold in memory are ingested chunk by chunk into a
//! per-import staging directory next to the container. Each chunk is sealed
//! and committed to its own file before the progress counter advances, so a
//! crash at any point can be resumed by source fingerprint. The container
//! file itself is untouched until `streaming_finish` hands the assembled
//! chunked entry to the append primitive.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::{
    IMPORT_STATE_FLUSH_INTERVAL, KEY_LEN, MAX_ACTIVE_IMPORTS, MAX_MIME_LEN, MAX_STREAM_SIZE,
    NONCE_LEN, STAGING_DIR_NAME, STREAM_CHUNK_SIZE, TAG_LEN,
};
use crate::crypto::{Aead, SecretBytes, binding_aad, random_array, source_fingerprint};
use crate::error::{Result, VaultError};
use crate::index::{ChunkRef, Entry, EntryKind, FileId, Payload};
use crate::vault::state::VaultState;
use crate::vault::{Vault, io, ops};

pub mod state;

pub use state::{ImportId, ImportState};

/// Progress snapshot of a pending import.
#[derive(Debug, Clone)]
pub struct ImportView {
    pub import_id: ImportId,
    pub file_name: String,
    pub mime_type: String,
    pub kind: EntryKind,
    pub file_size: u64,
    pub chunk_size: u32,
    pub total_chunks: u32,
    pub completed_chunks: u32,
    pub bytes_written: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<&ImportState> for ImportView {
    fn from(st: &ImportState) -> Self {
        Self {
            import_id: st.import_id,
            file_name: st.file_name.clone(),
            mime_type: st.mime_type.clone(),
            kind: st.kind,
            file_size: st.file_size,
            chunk_size: st.chunk_size,
            total_chunks: st.total_chunks,
            completed_chunks: st.completed_chunks,
            bytes_written: st.bytes_written,
            created_at: st.created_at,
            updated_at: st.updated_at,
        }
    }
}

struct ActiveImport {
    state: ImportState,
    dir: PathBuf,
}

/// Imports currently attached to this engine handle.
///
/// The map holds at most [`MAX_ACTIVE_IMPORTS`] entries; resumable imports
/// not in the map live only as staging directories on disk.
#[derive(Default)]
pub struct ActiveImports {
    map: HashMap<ImportId, ActiveImport>,
}

impl ActiveImports {
    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }

    fn find_by_hash(&self, hash: &[u8; 32]) -> Option<&ImportState> {
        self.map.values().map(|a| &a.state).find(|s| &s.source_hash == hash)
    }
}

impl Vault {
    /// Prepares the staging root next to the open container.
    pub fn streaming_init(&self) -> Result<()> {
        let guard = self.read_state();
        let state = guard.as_ref().ok_or(VaultError::NotOpen)?;
        io::ensure_dir_owner_only(&staging_root(state))
    }

    /// Computes the resume fingerprint of an external source file.
    pub fn streaming_compute_source_hash(first: &[u8], last: &[u8], size: u64) -> [u8; 32] {
        source_fingerprint(first, last, size)
    }

    /// Starts or resumes a streaming import.
    ///
    /// Returns the import id and the first chunk index still to be written.
    /// A staging directory whose `.state` carries the same source hash is
    /// adopted instead of starting over.
    pub fn streaming_start(
        &self,
        source_uri: &str,
        source_hash: &[u8; 32],
        name: &str,
        mime: &str,
        kind: EntryKind,
        size: u64,
    ) -> Result<(ImportId, u32)> {
        let guard = self.write_state();
        let state = guard.as_ref().ok_or(VaultError::NotOpen)?;

        if size == 0 {
            return Err(VaultError::InvalidParam("empty source; use import_bytes"));
        }
        if size > MAX_STREAM_SIZE {
            return Err(VaultError::FileTooLarge);
        }
        ops::validate_create_name(name)?;
        if mime.len() > MAX_MIME_LEN {
            return Err(VaultError::InvalidParam("mime type too long"));
        }

        let root = staging_root(state);
        io::ensure_dir_owner_only(&root)?;

        let mut imports = self.lock_imports();
        if let Some(existing) = imports.find_by_hash(source_hash) {
            return Ok((existing.import_id, existing.completed_chunks));
        }

        // A resumable import may exist on disk from an earlier process life.
        for dir in staging_dirs(&root)? {
            let Ok(mut st) = ImportState::load(&dir) else {
                continue;
            };
            if &st.source_hash != source_hash {
                continue;
            }
            if imports.map.len() >= MAX_ACTIVE_IMPORTS {
                return Err(VaultError::InvalidParam("too many active imports"));
            }
            st.source_uri = source_uri.to_string();
            let resume_from = st.completed_chunks;
            let import_id = st.import_id;
            imports.map.insert(import_id, ActiveImport { state: st, dir });
            info!(resume_from, "streaming import resumed");
            return Ok((import_id, resume_from));
        }

        if imports.map.len() >= MAX_ACTIVE_IMPORTS {
            return Err(VaultError::InvalidParam("too many active imports"));
        }

        let import_id: ImportId = random_array();
        let file_id: FileId = random_array();
        let dek = SecretBytes::from(random_array::<KEY_LEN>().to_vec());
        let wrapped_dek = state.wrap_dek(&file_id, &dek)?;

        let now = io::now_ms();
        let st = ImportState {
            import_id,
            file_id,
            source_hash: *source_hash,
            kind,
            file_size: size,
            chunk_size: STREAM_CHUNK_SIZE,
            total_chunks: size.div_ceil(u64::from(STREAM_CHUNK_SIZE)) as u32,
            completed_chunks: 0,
            bytes_written: 0,
            created_at: now,
            updated_at: now,
            source_uri: source_uri.to_string(),
            file_name: name.to_string(),
            mime_type: mime.to_string(),
            wrapped_dek,
        };

        let dir = root.join(hex::encode(import_id));
        io::ensure_dir_owner_only(&dir)?;
        st.save(&dir, true)?;

        debug!(total_chunks = st.total_chunks, "streaming import started");
        imports.map.insert(import_id, ActiveImport { state: st, dir });
        Ok((import_id, 0))
    }

    /// Seals and commits one plaintext chunk.
    ///
    /// Chunks must arrive in order; `completed_chunks` is both the count and
    /// the next expected index. The container lock is held only long enough
    /// to unwrap the DEK, not across the chunk file write.
    pub fn streaming_write_chunk(&self, import_id: &ImportId, plaintext: &[u8], chunk_index: u32) -> Result<()> {
        let (dir, file_id, wrapped_dek, expected_len) = {
            let imports = self.lock_imports();
            let active = imports.map.get(import_id).ok_or(VaultError::NotFound)?;
            let st = &active.state;

            if chunk_index >= st.total_chunks {
                return Err(VaultError::InvalidParam("chunk index out of range"));
            }
            if chunk_index != st.completed_chunks {
                return Err(VaultError::InvalidParam("chunks must be written in order"));
            }
            (active.dir.clone(), st.file_id, st.wrapped_dek.clone(), st.expected_plain_len(chunk_index))
        };
        if plaintext.len() as u64 != expected_len {
            return Err(VaultError::InvalidParam("chunk has unexpected length"));
        }

        // Briefly under the container lock: unwrap the DEK, then release
        // before the chunk file write, which never touches the container.
        let (dek, vault_id) = {
            let guard = self.read_state();
            let state = guard.as_ref().ok_or(VaultError::NotOpen)?;
            (state.unwrap_dek_raw(&file_id, &wrapped_dek)?, state.vault_id)
        };

        let nonce: [u8; NONCE_LEN] = random_array();
        let aad = binding_aad(&vault_id, &file_id, chunk_index);
        let ct = Aead::new(dek.expose_secret())?.seal_with_nonce(&nonce, &aad, plaintext)?;

        let path = state::chunk_path(&dir, chunk_index);
        {
            use std::io::Write;
            let mut file = io::create_owner_only(&path)?;
            file.write_all(&nonce)?;
            file.write_all(&ct)?;
            file.sync_all()?;
        }

        let mut imports = self.lock_imports();
        let active = imports.map.get_mut(import_id).ok_or(VaultError::NotFound)?;
        let st = &mut active.state;
        st.completed_chunks = chunk_index + 1;
        st.bytes_written += plaintext.len() as u64;
        st.updated_at = io::now_ms();

        let last = st.completed_chunks == st.total_chunks;
        let sync = last || st.completed_chunks % IMPORT_STATE_FLUSH_INTERVAL == 0;
        st.save(&active.dir, sync)?;
        Ok(())
    }

    /// Assembles the staged chunks into a chunked entry and appends it.
    ///
    /// On success the staging directory is securely wiped; on failure it is
    /// left intact so the caller may retry or abort.
    pub fn streaming_finish(&self, import_id: &ImportId) -> Result<FileId> {
        let mut guard = self.write_state();
        let state = guard.as_mut().ok_or(VaultError::NotOpen)?;

        let (st, dir) = {
            let imports = self.lock_imports();
            let active = imports.map.get(import_id).ok_or(VaultError::NotFound)?;
            (active.state.clone(), active.dir.clone())
        };
        if st.completed_chunks != st.total_chunks {
            return Err(VaultError::InvalidParam("import is not complete"));
        }

        let mut refs = Vec::with_capacity(st.total_chunks as usize);
        let mut segments = Vec::with_capacity(st.total_chunks as usize);
        for i in 0..st.total_chunks {
            let bytes = fs::read(state::chunk_path(&dir, i))?;
            let expected = NONCE_LEN as u64 + st.expected_plain_len(i) + TAG_LEN as u64;
            if bytes.len() as u64 != expected {
                return Err(VaultError::Corrupted("staged chunk has unexpected length"));
            }
            let nonce: [u8; NONCE_LEN] = bytes[..NONCE_LEN]
                .try_into()
                .map_err(|_| VaultError::Corrupted("staged chunk has unexpected length"))?;
            refs.push(ChunkRef { offset: 0, length: (bytes.len() - NONCE_LEN) as u32, nonce });
            segments.push(bytes[NONCE_LEN..].to_vec());
        }

        let entry = Entry {
            id: st.file_id,
            kind: st.kind,
            created_at: io::now_ms(),
            name: st.file_name.clone(),
            mime: st.mime_type.clone(),
            size: st.file_size,
            wrapped_dek: st.wrapped_dek.clone(),
            payload: Payload::Chunks(refs),
        };
        ops::append_entry(state, entry, segments)?;

        if let Err(e) = wipe_staging_dir(&dir) {
            warn!(error = %e, "staged chunks appended but staging cleanup failed");
        }
        self.lock_imports().map.remove(import_id);

        info!(chunks = st.total_chunks, "streaming import finished");
        Ok(st.file_id)
    }

    /// Aborts an import, securely wiping its staging directory.
    pub fn streaming_abort(&self, import_id: &ImportId) -> Result<()> {
        let guard = self.write_state();
        let state = guard.as_ref().ok_or(VaultError::NotOpen)?;

        let dir = match self.lock_imports().map.remove(import_id) {
            Some(active) => active.dir,
            None => {
                let dir = staging_root(state).join(hex::encode(import_id));
                if !dir.is_dir() {
                    return Err(VaultError::NotFound);
                }
                dir
            }
        };

        wipe_staging_dir(&dir)?;
        info!("streaming import aborted");
        Ok(())
    }

    /// Lists every resumable import found in the staging root.
    pub fn streaming_list_pending(&self) -> Result<Vec<ImportView>> {
        let guard = self.read_state();
        let state = guard.as_ref().ok_or(VaultError::NotOpen)?;

        let root = staging_root(state);
        let mut views = Vec::new();
        for dir in staging_dirs(&root)? {
            match ImportState::load(&dir) {
                Ok(st) => views.push(ImportView::from(&st)),
                Err(e) => warn!(error = %e, "skipping unreadable staging directory"),
            }
        }
        Ok(views)
    }

    /// Aborts every import whose last update is older than `max_age_ms`.
    ///
    /// Returns the number of staging directories removed.
    pub fn streaming_cleanup_old(&self, max_age_ms: u64) -> Result<u32> {
        let guard = self.write_state();
        let state = guard.as_ref().ok_or(VaultError::NotOpen)?;

        let now = io::now_ms();
        let mut removed = 0u32;
        for dir in staging_dirs(&staging_root(state))? {
            let Ok(st) = ImportState::load(&dir) else {
                continue;
            };
            if now.saturating_sub(st.updated_at) <= max_age_ms {
                continue;
            }
            self.lock_imports().map.remove(&st.import_id);
            wipe_staging_dir(&dir)?;
            removed += 1;
        }

        if removed > 0 {
            info!(removed, "stale streaming imports cleaned up");
        }
        Ok(removed)
    }
}

/// The staging root, a sibling of the container file.
fn staging_root(state: &VaultState) -> PathBuf {
    let parent = state
        .path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parent.join(STAGING_DIR_NAME)
}

/// Subdirectories of the staging root. A missing root is an empty list.
fn staging_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let iter = match fs::read_dir(root) {
        Ok(iter) => iter,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(e.into()),
    };
    for entry in iter {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

/// Overwrites every file in a staging directory with random bytes, unlinks
/// them, and removes the directory itself.
fn wipe_staging_dir(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            io::secure_wipe(&entry.path())?;
        }
    }
    fs::remove_dir(dir)?;
    Ok(())
}
