//! The `.state` sidecar of a streaming import.
//!
//! Each staging directory carries one `.state` file describing the import:
//! identity, source fingerprint, chunk geometry, progress counters and the
//! wrapped DEK. The source URI is deliberately persisted as an empty string
//! so an abandoned staging directory never leaks where a file came from.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{
    FILE_ID_LEN, IMPORT_STATE_MAGIC, IMPORT_STATE_VERSION, MAX_MIME_LEN, MAX_NAME_LEN,
    MAX_WRAPPED_DEK_LEN,
};
use crate::error::{Result, VaultError};
use crate::index::{EntryKind, FileId};
use crate::vault::io;
use crate::wire::{Reader, Writer};

/// Identifier of one streaming import.
pub type ImportId = [u8; FILE_ID_LEN];

/// Name of the sidecar inside a staging directory.
const STATE_FILE_NAME: &str = ".state";

/// Persistent record of one streaming import.
#[derive(Debug, Clone)]
pub struct ImportState {
    pub import_id: ImportId,
    pub file_id: FileId,
    pub source_hash: [u8; 32],
    pub kind: EntryKind,
    pub file_size: u64,
    pub chunk_size: u32,
    pub total_chunks: u32,
    /// High-water mark: chunks `0..completed_chunks` are all on disk.
    pub completed_chunks: u32,
    pub bytes_written: u64,
    pub created_at: u64,
    pub updated_at: u64,
    /// Session-only; encoded as an empty string on disk.
    pub source_uri: String,
    pub file_name: String,
    pub mime_type: String,
    pub wrapped_dek: Vec<u8>,
}

impl ImportState {
    /// Plaintext length of chunk `index` (the final chunk may be short).
    pub fn expected_plain_len(&self, index: u32) -> u64 {
        let start = u64::from(index) * u64::from(self.chunk_size);
        (self.file_size - start).min(u64::from(self.chunk_size))
    }

    /// Serializes the record. The source URI is always written empty.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(128 + self.file_name.len() + self.mime_type.len());
        w.bytes(&IMPORT_STATE_MAGIC);
        w.u32(IMPORT_STATE_VERSION);
        w.bytes(&self.import_id);
        w.bytes(&self.file_id);
        w.bytes(&self.source_hash);
        w.u8(self.kind.tag());
        w.u64(self.file_size);
        w.u32(self.chunk_size);
        w.u32(self.total_chunks);
        w.u32(self.completed_chunks);
        w.u64(self.bytes_written);
        w.u64(self.created_at);
        w.u64(self.updated_at);
        w.u16(0); // source_uri, withheld
        w.u16(self.file_name.len() as u16);
        w.bytes(self.file_name.as_bytes());
        w.u16(self.mime_type.len() as u16);
        w.bytes(self.mime_type.as_bytes());
        w.u16(self.wrapped_dek.len() as u16);
        w.bytes(&self.wrapped_dek);
        w.into_inner()
    }

    /// Parses a sidecar record.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        if r.array::<6>()? != IMPORT_STATE_MAGIC {
            return Err(VaultError::Corrupted("bad import state magic"));
        }
        if r.u32()? != IMPORT_STATE_VERSION {
            return Err(VaultError::Corrupted("unsupported import state version"));
        }

        let import_id = r.array()?;
        let file_id = r.array()?;
        let source_hash = r.array()?;
        let kind = EntryKind::from_tag(r.u8()?)?;
        let file_size = r.u64()?;
        let chunk_size = r.u32()?;
        let total_chunks = r.u32()?;
        let completed_chunks = r.u32()?;
        let bytes_written = r.u64()?;
        let created_at = r.u64()?;
        let updated_at = r.u64()?;

        if chunk_size == 0 || completed_chunks > total_chunks {
            return Err(VaultError::Corrupted("import state counters out of range"));
        }

        let uri_len = r.u16()? as usize;
        let _ = r.take(uri_len)?;

        let name_len = r.u16()? as usize;
        if name_len > MAX_NAME_LEN {
            return Err(VaultError::Corrupted("import name too long"));
        }
        let file_name = String::from_utf8(r.take(name_len)?.to_vec())
            .map_err(|_| VaultError::Corrupted("import name not utf-8"))?;

        let mime_len = r.u16()? as usize;
        if mime_len > MAX_MIME_LEN {
            return Err(VaultError::Corrupted("import mime type too long"));
        }
        let mime_type = String::from_utf8(r.take(mime_len)?.to_vec())
            .map_err(|_| VaultError::Corrupted("import mime type not utf-8"))?;

        let dek_len = r.u16()? as usize;
        if dek_len > MAX_WRAPPED_DEK_LEN {
            return Err(VaultError::Corrupted("wrapped key too long"));
        }
        let wrapped_dek = r.take(dek_len)?.to_vec();

        Ok(Self {
            import_id,
            file_id,
            source_hash,
            kind,
            file_size,
            chunk_size,
            total_chunks,
            completed_chunks,
            bytes_written,
            created_at,
            updated_at,
            source_uri: String::new(),
            file_name,
            mime_type,
            wrapped_dek,
        })
    }

    /// Writes the sidecar into `dir` via a temp file and rename.
    ///
    /// `sync` controls whether the bytes are fsynced; progress updates flush
    /// only every few chunks, the final update always does.
    pub fn save(&self, dir: &Path, sync: bool) -> Result<()> {
        let target = state_path(dir);
        let tmp = io::tmp_path(&target);
        {
            use std::io::Write;
            let mut file = io::create_owner_only(&tmp)?;
            file.write_all(&self.encode())?;
            if sync {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    /// Loads the sidecar of a staging directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let bytes = fs::read(state_path(dir))?;
        Self::decode(&bytes)
    }
}

/// Path of the `.state` sidecar inside a staging directory.
pub fn state_path(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE_NAME)
}

/// Path of the committed chunk file `index` inside a staging directory.
pub fn chunk_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("chunk_{index:08x}.enc"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ImportState {
        ImportState {
            import_id: [1; 16],
            file_id: [2; 16],
            source_hash: [3; 32],
            kind: EntryKind::Video,
            file_size: 20 * 1024 * 1024,
            chunk_size: 4 * 1024 * 1024,
            total_chunks: 5,
            completed_chunks: 3,
            bytes_written: 12 * 1024 * 1024,
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_100,
            source_uri: "content://media/external/video/42".to_string(),
            file_name: "clip.mp4".to_string(),
            mime_type: "video/mp4".to_string(),
            wrapped_dek: vec![9; 72],
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let st = sample();
        let decoded = ImportState::decode(&st.encode()).unwrap();
        assert_eq!(decoded.import_id, st.import_id);
        assert_eq!(decoded.file_id, st.file_id);
        assert_eq!(decoded.completed_chunks, 3);
        assert_eq!(decoded.file_name, "clip.mp4");
        assert_eq!(decoded.wrapped_dek, st.wrapped_dek);
    }

    #[test]
    fn source_uri_is_withheld() {
        let st = sample();
        let encoded = st.encode();
        assert!(!encoded.windows(7).any(|w| w == b"content"));
        assert!(ImportState::decode(&encoded).unwrap().source_uri.is_empty());
    }

    #[test]
    fn final_chunk_is_short() {
        let mut st = sample();
        st.file_size = 18 * 1024 * 1024 + 5;
        assert_eq!(st.expected_plain_len(0), 4 * 1024 * 1024);
        assert_eq!(st.expected_plain_len(4), 2 * 1024 * 1024 + 5);
    }

    #[test]
    fn bad_magic_is_corrupted() {
        let mut bytes = sample().encode();
        bytes[0] ^= 0xFF;
        assert!(matches!(ImportState::decode(&bytes), Err(VaultError::Corrupted(_))));
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let st = sample();
        st.save(dir.path(), true).unwrap();
        let loaded = ImportState::load(dir.path()).unwrap();
        assert_eq!(loaded.source_hash, st.source_hash);
        assert!(loaded.source_uri.is_empty());
    }
}
