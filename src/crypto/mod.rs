//! Cryptographic primitives for the vault engine.

pub mod aead;
pub mod derive;
pub mod hash;
pub mod secret;

pub use aead::{Aead, binding_aad};
pub use derive::{KdfParams, KdfProfile, derive_kek, random_array, random_bytes};
pub use hash::{Sha256Stream, crc32, source_fingerprint};
pub use secret::{MasterKey, SecretBytes, ct_eq};
