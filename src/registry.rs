//! Plaintext multi-vault registry.
//!
//! A JSON sidecar listing the vault files an application manages: id,
//! filename, creation time and size. No secret material is ever written
//! here; the registry exists so a host can enumerate vaults without opening
//! any of them.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MAX_REGISTRY_VAULTS;
use crate::error::{Result, VaultError};
use crate::vault::io;

/// One registered vault file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultRecord {
    pub id: String,
    pub filename: String,
    pub created_at: u64,
    pub size_bytes: u64,
}

/// The registry sidecar.
pub struct Registry {
    path: PathBuf,
    records: Vec<VaultRecord>,
}

impl Registry {
    /// Loads the registry at `path`; a missing file is an empty registry.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|_| VaultError::Corrupted("registry is not valid json"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, records })
    }

    pub fn records(&self) -> &[VaultRecord] {
        &self.records
    }

    /// Registers a vault file, assigning it a fresh UUID.
    pub fn add(&mut self, filename: &str, size_bytes: u64) -> Result<&VaultRecord> {
        if self.records.len() >= MAX_REGISTRY_VAULTS {
            return Err(VaultError::InvalidParam("registry is full"));
        }
        if self.records.iter().any(|r| r.filename == filename) {
            return Err(VaultError::AlreadyExists);
        }

        self.records.push(VaultRecord {
            id: Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            created_at: io::now_ms(),
            size_bytes,
        });
        self.save()?;
        Ok(self.records.last().expect("record just pushed"))
    }

    /// Removes a vault by id.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        let pos = self
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or(VaultError::NotFound)?;
        self.records.remove(pos);
        self.save()
    }

    /// Updates the recorded size of a vault after a mutation.
    pub fn update_size(&mut self, id: &str, size_bytes: u64) -> Result<()> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(VaultError::NotFound)?;
        record.size_bytes = size_bytes;
        self.save()
    }

    fn save(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.records)
            .map_err(|_| VaultError::Corrupted("registry serialization failed"))?;
        io::replace_file(&self.path, |f| {
            f.write_all(&json)?;
            Ok(())
        })
    }
}
