//! Error taxonomy for the vault engine.
//!
//! Every fallible operation in the crate returns [`VaultError`]. The variants
//! are deliberately coarse: callers dispatch on the kind of failure, not on
//! its exact site, so internal detail lives in the `&'static str` payloads.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = VaultError> = std::result::Result<T, E>;

/// All errors surfaced by the vault engine.
#[derive(Debug, Error)]
pub enum VaultError {
    /// A caller-supplied argument is out of range or otherwise unusable.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// An allocation or memory-related primitive failed.
    ///
    /// `mlock` failure is explicitly *not* reported through this variant;
    /// page locking is best-effort.
    #[error("out of memory")]
    Memory,

    /// A filesystem or device error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A cryptographic primitive failed (KDF, RNG).
    #[error("crypto failure: {0}")]
    Crypto(&'static str),

    /// AEAD tag mismatch: wrong passphrase, wrong key, or tampered blob.
    #[error("authentication failed")]
    AuthFail,

    /// The container (or a sidecar) violates the on-disk format.
    #[error("container corrupted: {0}")]
    Corrupted(&'static str),

    /// Unknown file id or import id.
    #[error("not found")]
    NotFound,

    /// The target path already exists on create.
    #[error("already exists")]
    AlreadyExists,

    /// The operation requires an open vault.
    #[error("vault is not open")]
    NotOpen,

    /// The passphrase is shorter than the required minimum.
    #[error("passphrase too short")]
    PassphraseTooShort,

    /// A streaming import exceeds the maximum supported size.
    #[error("file too large")]
    FileTooLarge,
}
