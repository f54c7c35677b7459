//! Secret-holding buffers and constant-time comparison.
//!
//! Key material never relies on a normal return path for cleanup: the KEK
//! and DEKs live in [`SecretBytes`] (zeroized on drop), and the master key
//! lives in [`MasterKey`], which additionally page-locks its backing memory
//! for the lifetime of the open container.

use secrecy::SecretSlice;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::config::KEY_LEN;
use crate::crypto::derive::random_array;
use crate::error::{Result, VaultError};

/// Secret bytes with zeroize-on-drop semantics.
pub type SecretBytes = SecretSlice<u8>;

/// The vault master key, held in page-locked memory while the vault is open.
///
/// `mlock` is best-effort: on failure the key still works, it just may be
/// swapped. The key bytes are zeroed (and the pages unlocked) on drop.
pub struct MasterKey {
    key: Box<[u8; KEY_LEN]>,
    locked: bool,
}

impl MasterKey {
    /// Generates a fresh random master key.
    pub fn generate() -> Self {
        Self::from_bytes(random_array::<KEY_LEN>())
    }

    /// Wraps existing key bytes; the caller's copy should be zeroized.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        let key = Box::new(bytes);
        let locked = lock_pages(key.as_ptr(), KEY_LEN);
        if !locked {
            tracing::debug!("mlock unavailable; master key pages not pinned");
        }
        Self { key, locked }
    }

    /// Parses a 32-byte slice into a master key.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| VaultError::Corrupted("master key must be 32 bytes"))?;
        Ok(Self::from_bytes(key))
    }

    pub fn expose(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.key.zeroize();
        if self.locked {
            unlock_pages(self.key.as_ptr(), KEY_LEN);
        }
    }
}

/// Constant-time equality for secret byte strings.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(unix)]
fn lock_pages(ptr: *const u8, len: usize) -> bool {
    unsafe { libc::mlock(ptr.cast(), len) == 0 }
}

#[cfg(unix)]
fn unlock_pages(ptr: *const u8, len: usize) {
    unsafe {
        libc::munlock(ptr.cast(), len);
    }
}

#[cfg(not(unix))]
fn lock_pages(_ptr: *const u8, _len: usize) -> bool {
    false
}

#[cfg(not(unix))]
fn unlock_pages(_ptr: *const u8, _len: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_distinct_keys() {
        let a = MasterKey::generate();
        let b = MasterKey::generate();
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(MasterKey::from_slice(&[0u8; 31]).is_err());
        assert!(MasterKey::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn ct_eq_semantics() {
        assert!(ct_eq(b"same", b"same"));
        assert!(!ct_eq(b"same", b"diff"));
        assert!(!ct_eq(b"short", b"longer"));
    }
}
