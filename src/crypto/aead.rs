//! XChaCha20-Poly1305 authenticated encryption.
//!
//! Every ciphertext in the container is an AEAD message. The AAD is either
//! empty (index section only) or the fixed binding tuple produced by
//! [`binding_aad`], which ties a message to its vault, file, chunk index and
//! format version.

use chacha20poly1305::aead::{Aead as _, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

use crate::config::{BINDING_AAD_LEN, FILE_ID_LEN, FORMAT_VERSION, KEY_LEN, NONCE_LEN, VAULT_ID_LEN};
use crate::crypto::derive::random_array;
use crate::error::{Result, VaultError};

/// XChaCha20-Poly1305 cipher bound to one key.
pub struct Aead {
    inner: XChaCha20Poly1305,
}

impl Aead {
    /// Creates a cipher from a 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(VaultError::InvalidParam("aead key must be 32 bytes"));
        }
        let inner = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| VaultError::InvalidParam("aead key must be 32 bytes"))?;
        Ok(Self { inner })
    }

    /// Encrypts with a fresh random nonce; returns `nonce ‖ ciphertext`.
    pub fn seal(&self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce: [u8; NONCE_LEN] = random_array();
        let ct = self.seal_with_nonce(&nonce, aad, plaintext)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Encrypts under a caller-supplied nonce; returns the ciphertext only.
    pub fn seal_with_nonce(&self, nonce: &[u8; NONCE_LEN], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.inner
            .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
            .map_err(|_| VaultError::Crypto("aead encryption failed"))
    }

    /// Decrypts and authenticates; tag mismatch surfaces as `AuthFail`.
    pub fn open(&self, nonce: &[u8; NONCE_LEN], aad: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let plaintext = self
            .inner
            .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| VaultError::AuthFail)?;
        Ok(Zeroizing::new(plaintext))
    }
}

/// Builds the fixed 40-byte AAD binding tuple.
///
/// `chunk_index` is 0 for single-blob payloads and for DEK wrapping.
pub fn binding_aad(vault_id: &[u8; VAULT_ID_LEN], file_id: &[u8; FILE_ID_LEN], chunk_index: u32) -> [u8; BINDING_AAD_LEN] {
    let mut aad = [0u8; BINDING_AAD_LEN];
    aad[..VAULT_ID_LEN].copy_from_slice(vault_id);
    aad[VAULT_ID_LEN..VAULT_ID_LEN + FILE_ID_LEN].copy_from_slice(file_id);
    aad[32..36].copy_from_slice(&chunk_index.to_le_bytes());
    aad[36..40].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> Aead {
        Aead::new(&[0x42u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn seal_open_roundtrip() {
        let c = cipher();
        let sealed = c.seal(b"aad", b"vault bytes").unwrap();

        let (nonce, ct) = sealed.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce.try_into().unwrap();
        let plain = c.open(&nonce, b"aad", ct).unwrap();
        assert_eq!(plain.as_slice(), b"vault bytes");
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let c = cipher();
        let nonce = [9u8; NONCE_LEN];
        let ct = c.seal_with_nonce(&nonce, b"", b"").unwrap();
        assert_eq!(ct.len(), 16);
        assert!(c.open(&nonce, b"", &ct).unwrap().is_empty());
    }

    #[test]
    fn tamper_fails_auth() {
        let c = cipher();
        let nonce = [1u8; NONCE_LEN];
        let mut ct = c.seal_with_nonce(&nonce, b"", b"payload").unwrap();
        ct[0] ^= 0x01;
        assert!(matches!(c.open(&nonce, b"", &ct), Err(VaultError::AuthFail)));
    }

    #[test]
    fn aad_mismatch_fails_auth() {
        let c = cipher();
        let nonce = [1u8; NONCE_LEN];
        let ct = c.seal_with_nonce(&nonce, b"one", b"payload").unwrap();
        assert!(matches!(c.open(&nonce, b"two", &ct), Err(VaultError::AuthFail)));
    }

    #[test]
    fn chunk_index_binds_ciphertext() {
        let c = cipher();
        let vault_id = [1u8; VAULT_ID_LEN];
        let file_id = [2u8; FILE_ID_LEN];
        let nonce = [3u8; NONCE_LEN];

        let ct = c.seal_with_nonce(&nonce, &binding_aad(&vault_id, &file_id, 0), b"chunk").unwrap();
        assert!(c.open(&nonce, &binding_aad(&vault_id, &file_id, 1), &ct).is_err());
        assert!(c.open(&nonce, &binding_aad(&vault_id, &file_id, 0), &ct).is_ok());
    }

    #[test]
    fn binding_aad_layout() {
        let aad = binding_aad(&[0xAA; 16], &[0xBB; 16], 7);
        assert_eq!(&aad[..16], &[0xAA; 16]);
        assert_eq!(&aad[16..32], &[0xBB; 16]);
        assert_eq!(&aad[32..36], &7u32.to_le_bytes());
        assert_eq!(&aad[36..40], &FORMAT_VERSION.to_le_bytes());
    }
}
