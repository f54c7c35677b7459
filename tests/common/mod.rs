//! Shared helpers for the integration suites.

use std::path::PathBuf;

use strongroom::Vault;

pub const PASSPHRASE: &[u8] = b"correct horse battery";

/// An engine handle pinned to the LOW KDF profile so tests stay fast.
pub fn test_vault() -> Vault {
    let vault = Vault::new();
    vault.set_kdf_profile_by_ram(1024);
    vault
}

/// A fresh temp directory and a container path inside it.
pub fn vault_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("v.dat")
}

/// Deterministic pseudo-content: byte `i` is `i % 251`.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
