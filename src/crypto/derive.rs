//! Key derivation using Argon2id.
//!
//! The KEK that wraps the master key is derived from the user passphrase
//! with parameters that are persisted in the container header. Creation
//! picks a profile; opening always honors whatever the header says, within
//! the accepted bounds.

use argon2::{Argon2, Params, Version};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::config::{KEY_LEN, SALT_LEN};
use crate::crypto::secret::SecretBytes;
use crate::error::{Result, VaultError};

/// Adaptive KDF cost profiles.
///
/// The profile only matters at vault creation; the chosen parameters are
/// written into the header and opening re-reads them from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfProfile {
    Low,
    Medium,
    High,
}

impl KdfProfile {
    /// Picks a profile from the device's physical RAM in MiB.
    pub fn for_ram_mib(ram_mib: u64) -> Self {
        if ram_mib >= 8192 {
            Self::High
        } else if ram_mib >= 3072 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// The concrete Argon2id parameters of this profile.
    pub fn params(self) -> KdfParams {
        match self {
            Self::Low => KdfParams { memory_bytes: 32 * 1024 * 1024, iterations: 3, parallelism: 1 },
            Self::Medium => KdfParams { memory_bytes: 128 * 1024 * 1024, iterations: 10, parallelism: 2 },
            Self::High => KdfParams { memory_bytes: 256 * 1024 * 1024, iterations: 12, parallelism: 2 },
        }
    }
}

/// Argon2id tuning parameters, exactly as persisted in the header.
///
/// Memory is stored in bytes; the conversion to Argon2's KiB unit happens
/// only at derivation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_bytes: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfParams {
    /// Validates header-supplied parameters against the accepted bounds.
    ///
    /// Anything outside `[Low, High]` memory, `[3, 12]` iterations or
    /// `[1, 2]` parallelism is treated as header corruption.
    pub fn validate(self) -> Result<Self> {
        let low = KdfProfile::Low.params();
        let high = KdfProfile::High.params();

        if self.memory_bytes < low.memory_bytes || self.memory_bytes > high.memory_bytes {
            return Err(VaultError::Corrupted("kdf memory out of range"));
        }
        if self.iterations < low.iterations || self.iterations > high.iterations {
            return Err(VaultError::Corrupted("kdf iterations out of range"));
        }
        if self.parallelism < 1 || self.parallelism > 2 {
            return Err(VaultError::Corrupted("kdf parallelism out of range"));
        }
        Ok(self)
    }
}

/// Derives the 32-byte KEK from a passphrase and salt.
///
/// # Arguments
/// * `passphrase` - The user passphrase bytes
/// * `salt` - The per-vault random salt
/// * `params` - Tuning parameters, from a profile or from the header
pub fn derive_kek(passphrase: &[u8], salt: &[u8; SALT_LEN], params: KdfParams) -> Result<SecretBytes> {
    let argon_params = Params::new(
        params.memory_bytes / 1024,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|_| VaultError::Crypto("invalid argon2 parameters"))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut kek = Zeroizing::new(vec![0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase, salt, &mut kek)
        .map_err(|e| match e {
            argon2::Error::MemoryTooLittle | argon2::Error::MemoryTooMuch => VaultError::Memory,
            _ => VaultError::Crypto("key derivation failed"),
        })?;

    Ok(SecretBytes::from(std::mem::take(&mut *kek)))
}

/// Fills a fixed-size array with cryptographically secure random bytes.
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// Fills a buffer of arbitrary length with cryptographically secure random bytes.
pub fn random_bytes(buf: &mut [u8]) {
    rand::rng().fill_bytes(buf);
}
