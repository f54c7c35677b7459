//! The container engine.
//!
//! [`Vault`] is an owned handle to at most one open container. Read-only
//! operations share a read lock; every mutating operation takes the write
//! lock for its whole duration, which is the single serialization point the
//! on-disk format assumes.

use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use secrecy::ExposeSecret;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{
    MAX_INDEX_CIPHERTEXT, MIN_INDEX_CAPACITY, MIN_PASSPHRASE_LEN, NONCE_LEN, SALT_LEN, TAG_LEN,
    TRAILER_LEN, VAULT_ID_LEN, WRAPPED_KEY_LEN,
};
use crate::crypto::{
    Aead, KdfParams, KdfProfile, MasterKey, SecretBytes, derive_kek, random_array,
};
use crate::error::{Result, VaultError};
use crate::header::{self, journal};
use crate::import::ActiveImports;
use crate::index::{self, EntryView, FileId};

pub mod io;
pub mod state;

pub(crate) mod ops;
mod rewrite;

use state::VaultState;

/// An encrypted vault container engine.
///
/// One `Vault` holds at most one open container. The handle is cheap while
/// closed; while open it owns the master key and the in-memory entry table.
pub struct Vault {
    state: RwLock<Option<VaultState>>,
    pub(crate) imports: Mutex<ActiveImports>,
    profile: Mutex<KdfProfile>,
}

impl Vault {
    /// Creates a closed engine handle with the default KDF profile.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            imports: Mutex::new(ActiveImports::default()),
            profile: Mutex::new(KdfProfile::Medium),
        }
    }

    /// Selects the KDF profile used by subsequent `create` calls from the
    /// device's physical RAM.
    pub fn set_kdf_profile_by_ram(&self, ram_mib: u64) {
        let profile = KdfProfile::for_ram_mib(ram_mib);
        *self.lock_profile() = profile;
        debug!(?profile, ram_mib, "kdf profile selected");
    }

    /// The KDF parameters in effect: the open container's header parameters,
    /// or the creation profile's when no container is open.
    pub fn kdf_params(&self) -> KdfParams {
        match self.read_state().as_ref() {
            Some(state) => state.kdf,
            None => self.lock_profile().params(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.read_state().is_some()
    }

    /// Creates a new container at `path` and leaves it open.
    ///
    /// The file is staged through `<path>.tmp` and atomically renamed into
    /// place, so a crash mid-create leaves no half-written container.
    pub fn create(&self, path: impl AsRef<Path>, passphrase: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let mut guard = self.write_state();
        if guard.is_some() {
            return Err(VaultError::InvalidParam("another vault is open"));
        }
        if passphrase.len() < MIN_PASSPHRASE_LEN {
            return Err(VaultError::PassphraseTooShort);
        }
        if path.exists() {
            return Err(VaultError::AlreadyExists);
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            io::ensure_dir_owner_only(parent)?;
        }

        let salt: [u8; SALT_LEN] = random_array();
        let vault_id: [u8; VAULT_ID_LEN] = random_array();
        let master_key = MasterKey::generate();

        let (kek, kdf) = derive_with_fallback(passphrase, &salt, self.profile())?;
        let wrapped = Aead::new(kek.expose_secret())?.seal(&vault_id, master_key.expose())?;
        let wrapped_mk: [u8; WRAPPED_KEY_LEN] = wrapped
            .try_into()
            .map_err(|_| VaultError::Crypto("wrapped key has unexpected length"))?;

        // Slot index always equals seq % 2, so the first passphrase change
        // (seq 2, slot 0) never overwrites the only valid slot.
        let slot = journal::Slot { seq: 1, vault_id, salt, kdf, wrapped_mk };
        let header_bytes = journal::encode_region(None, Some(&slot));

        let cipher = Aead::new(master_key.expose())?;
        let plain = index::serialize(&[], MIN_INDEX_CAPACITY)?;
        let section = index::seal_section(&cipher, &plain)?;

        io::replace_file(path, |f| {
            use std::io::Write;
            f.write_all(&header_bytes)?;
            f.write_all(&section)?;
            f.write_all(&[0u8; TRAILER_LEN])?;
            Ok(())
        })?;

        let total_size = (header_bytes.len() + section.len() + TRAILER_LEN) as u64;
        *guard = Some(VaultState {
            path: path.to_path_buf(),
            vault_id,
            master_key,
            salt,
            kdf,
            wrapped_mk,
            journaled: true,
            header_seq: 1,
            header_len: journal::HEADER_LEN as u64,
            index_capacity: MIN_INDEX_CAPACITY,
            index_padded: true,
            entries: Vec::new(),
            total_size,
        });
        info!(path = %path.display(), "vault created");
        Ok(())
    }

    /// Opens an existing container.
    ///
    /// A wrong passphrase surfaces as `AuthFail`; structural damage to the
    /// header or index surfaces as `Corrupted`. The file is not modified.
    pub fn open(&self, path: impl AsRef<Path>, passphrase: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let mut guard = self.write_state();
        if guard.is_some() {
            return Err(VaultError::InvalidParam("another vault is open"));
        }

        let file = io::open_rw(path)?;
        let total_size = file.metadata()?.len();

        let head_len = (journal::HEADER_LEN as u64).min(total_size) as usize;
        let mut head = vec![0u8; head_len];
        io::read_exact_at(&file, &mut head, 0)?;
        let info = header::parse(&head)?;

        let kek = derive_kek(passphrase, &info.salt, info.kdf)?;
        let (wrap_nonce, wrap_ct) = info.wrapped_mk.split_at(NONCE_LEN);
        let wrap_nonce: [u8; NONCE_LEN] = wrap_nonce
            .try_into()
            .map_err(|_| VaultError::Corrupted("wrapped key has unexpected length"))?;
        let mk_bytes = Aead::new(kek.expose_secret())?.open(&wrap_nonce, &info.vault_id, wrap_ct)?;
        let master_key = MasterKey::from_slice(&mk_bytes)?;

        let mut section_head = [0u8; NONCE_LEN + 8];
        io::read_exact_at(&file, &mut section_head, info.header_len)?;
        let section_nonce: [u8; NONCE_LEN] = section_head[..NONCE_LEN]
            .try_into()
            .map_err(|_| VaultError::Corrupted("index section truncated"))?;
        let ct_len = u64::from_le_bytes(
            section_head[NONCE_LEN..]
                .try_into()
                .map_err(|_| VaultError::Corrupted("index section truncated"))?,
        );
        if ct_len > MAX_INDEX_CIPHERTEXT || ct_len < TAG_LEN as u64 {
            return Err(VaultError::Corrupted("index length out of range"));
        }
        let section_end = info.header_len + (NONCE_LEN + 8) as u64 + ct_len;
        if section_end + TRAILER_LEN as u64 > total_size {
            return Err(VaultError::Corrupted("index overruns file"));
        }

        let mut ct = vec![0u8; ct_len as usize];
        io::read_exact_at(&file, &mut ct, info.header_len + (NONCE_LEN + 8) as u64)?;

        let cipher = Aead::new(master_key.expose())?;
        let (entries, index_padded) = index::open_section(&cipher, &section_nonce, &ct)?;

        let state = VaultState {
            path: path.to_path_buf(),
            vault_id: info.vault_id,
            master_key,
            salt: info.salt,
            kdf: info.kdf,
            wrapped_mk: info.wrapped_mk,
            journaled: info.journaled,
            header_seq: info.seq,
            header_len: info.header_len,
            index_capacity: ct_len as usize - TAG_LEN,
            index_padded,
            entries,
            total_size,
        };
        state.validate_extents()?;

        info!(
            path = %path.display(),
            entries = state.entries.len(),
            journaled = state.journaled,
            "vault opened"
        );
        *guard = Some(state);
        Ok(())
    }

    /// Closes the container, zeroizing the master key and all derived state.
    ///
    /// Closing a closed engine is a no-op. Active streaming imports are
    /// detached; their staging directories stay on disk for resume.
    pub fn close(&self) {
        let had_state = self.write_state().take().is_some();
        self.lock_imports().clear();
        if had_state {
            info!("vault closed");
        }
    }

    /// Lists all live entries.
    pub fn list_entries(&self) -> Result<Vec<EntryView>> {
        let guard = self.read_state();
        let state = guard.as_ref().ok_or(VaultError::NotOpen)?;
        Ok(state.entries.iter().map(EntryView::from).collect())
    }

    /// Total byte size of the container file.
    pub fn total_size(&self) -> Result<u64> {
        let guard = self.read_state();
        let state = guard.as_ref().ok_or(VaultError::NotOpen)?;
        Ok(state.total_size)
    }

    /// Bytes in the data region no longer referenced by any entry.
    pub fn free_space(&self) -> Result<u64> {
        let guard = self.read_state();
        let state = guard.as_ref().ok_or(VaultError::NotOpen)?;
        Ok(state.free_space())
    }

    /// Reads and decrypts a single-blob entry in full.
    ///
    /// Chunked entries reject this call; read them chunk by chunk.
    pub fn read_file(&self, id: &FileId) -> Result<Zeroizing<Vec<u8>>> {
        let guard = self.read_state();
        let state = guard.as_ref().ok_or(VaultError::NotOpen)?;
        let entry = state.find(id).ok_or(VaultError::NotFound)?;
        ops::load_file_plain(state, entry)
    }

    /// Reads and decrypts one chunk of a chunked entry.
    pub fn read_chunk(&self, id: &FileId, chunk_index: u32) -> Result<Zeroizing<Vec<u8>>> {
        let guard = self.read_state();
        let state = guard.as_ref().ok_or(VaultError::NotOpen)?;
        let entry = state.find(id).ok_or(VaultError::NotFound)?;
        ops::load_chunk_plain(state, entry, chunk_index)
    }

    fn profile(&self) -> KdfProfile {
        *self.lock_profile()
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, Option<VaultState>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_state(&self) -> RwLockWriteGuard<'_, Option<VaultState>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_imports(&self) -> std::sync::MutexGuard<'_, ActiveImports> {
        self.imports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_profile(&self) -> std::sync::MutexGuard<'_, KdfProfile> {
        self.profile.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives a KEK at the requested profile, falling back to LOW once when the
/// derivation fails for lack of memory. The returned params are the ones
/// that actually produced the key and must be persisted.
fn derive_with_fallback(
    passphrase: &[u8],
    salt: &[u8; SALT_LEN],
    profile: KdfProfile,
) -> Result<(SecretBytes, KdfParams)> {
    match derive_kek(passphrase, salt, profile.params()) {
        Ok(kek) => Ok((kek, profile.params())),
        Err(VaultError::Memory | VaultError::Crypto(_)) if profile != KdfProfile::Low => {
            warn!("kdf failed at selected profile, retrying at low");
            let low = KdfProfile::Low.params();
            let kek = derive_kek(passphrase, salt, low)?;
            Ok((kek, low))
        }
        Err(e) => Err(e),
    }
}
