//! In-memory mirror of an open container.
//!
//! Between mutating operations this state is consistent with the file on
//! disk; after a crash, `open` rebuilds it from disk and there is no other
//! recovery log beyond the header journal itself.

use std::path::PathBuf;

use secrecy::ExposeSecret;

use crate::config::{KEY_LEN, NONCE_LEN, SALT_LEN, TRAILER_LEN, VAULT_ID_LEN, WRAPPED_KEY_LEN};
use crate::crypto::{Aead, KdfParams, MasterKey, SecretBytes, binding_aad};
use crate::error::{Result, VaultError};
use crate::index::{self, Entry, FileId, Payload};

/// Book-keeping for one open container.
pub struct VaultState {
    pub path: PathBuf,
    pub vault_id: [u8; VAULT_ID_LEN],
    pub master_key: MasterKey,
    pub salt: [u8; SALT_LEN],
    pub kdf: KdfParams,
    pub wrapped_mk: [u8; WRAPPED_KEY_LEN],
    /// False only for a not-yet-migrated legacy container.
    pub journaled: bool,
    pub header_seq: u32,
    /// Byte offset where the index section starts.
    pub header_len: u64,
    /// Plaintext capacity reserved for the serialized index.
    pub index_capacity: usize,
    pub index_padded: bool,
    pub entries: Vec<Entry>,
    pub total_size: u64,
}

impl VaultState {
    /// On-disk length of the index section.
    pub fn index_section_len(&self) -> u64 {
        index::section_len(self.index_capacity)
    }

    /// First byte of the data region.
    pub fn data_start(&self) -> u64 {
        self.header_len + self.index_section_len()
    }

    /// One past the last byte of the data region (the trailer starts here).
    pub fn data_end(&self) -> u64 {
        self.total_size - TRAILER_LEN as u64
    }

    /// Bytes in the data region not referenced by any live entry.
    ///
    /// Counts holes left by soft-deleted entries as well as unreferenced
    /// tail bytes; this is exactly what compaction can reclaim.
    pub fn free_space(&self) -> u64 {
        let live: u64 = self
            .entries
            .iter()
            .map(|e| match &e.payload {
                Payload::Blob { length, .. } => *length,
                Payload::Chunks(chunks) => chunks.iter().map(|c| u64::from(c.length)).sum(),
            })
            .sum();
        (self.data_end() - self.data_start()).saturating_sub(live)
    }

    /// AEAD cipher keyed with the master key.
    pub fn cipher(&self) -> Result<Aead> {
        Aead::new(self.master_key.expose())
    }

    pub fn find(&self, id: &FileId) -> Option<&Entry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn position(&self, id: &FileId) -> Option<usize> {
        self.entries.iter().position(|e| &e.id == id)
    }

    /// Checks that every entry's extent lies inside the data region.
    pub fn validate_extents(&self) -> Result<()> {
        let start = self.data_start();
        let end = self.data_end();
        for e in &self.entries {
            if e.extent_start() < start || e.extent_end() > end || e.extent_start() > e.extent_end() {
                return Err(VaultError::Corrupted("entry extent outside data region"));
            }
        }
        Ok(())
    }

    /// Wraps a fresh DEK under the master key, bound to `file_id`.
    pub fn wrap_dek(&self, file_id: &FileId, dek: &SecretBytes) -> Result<Vec<u8>> {
        let aad = binding_aad(&self.vault_id, file_id, 0);
        self.cipher()?.seal(&aad, dek.expose_secret())
    }

    /// Unwraps an entry's DEK; a tag mismatch surfaces as `AuthFail`.
    pub fn unwrap_dek(&self, entry: &Entry) -> Result<SecretBytes> {
        self.unwrap_dek_raw(&entry.id, &entry.wrapped_dek)
    }

    /// Unwraps a wrapped DEK bound to `file_id`.
    pub fn unwrap_dek_raw(&self, file_id: &FileId, wrapped_dek: &[u8]) -> Result<SecretBytes> {
        if wrapped_dek.len() != WRAPPED_KEY_LEN {
            return Err(VaultError::Corrupted("wrapped key has unexpected length"));
        }
        let (nonce, ct) = wrapped_dek.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| VaultError::Corrupted("wrapped key has unexpected length"))?;

        let aad = binding_aad(&self.vault_id, file_id, 0);
        let dek = self.cipher()?.open(&nonce, &aad, ct)?;
        if dek.len() != KEY_LEN {
            return Err(VaultError::Corrupted("unwrapped key has unexpected length"));
        }
        Ok(SecretBytes::from(dek.to_vec()))
    }
}
