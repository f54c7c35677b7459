//! Strongroom - an embedded encrypted file vault.
//!
//! One container file holds an arbitrary collection of user files under a
//! single passphrase, with authenticated confidentiality for both content
//! and metadata:
//! - XChaCha20-Poly1305 for every blob, chunk and the index itself
//! - Argon2id passphrase hardening with adaptive cost profiles
//! - A/B header journaling so passphrase changes survive power loss
//! - Streaming chunked imports with crash-safe resume by source fingerprint
//! - In-place fast paths for appends and metadata edits, staged full
//!   rewrites for everything that changes the container geometry

pub mod config;
pub mod crypto;
pub mod error;
pub mod header;
pub mod import;
pub mod index;
pub mod registry;
pub mod vault;
pub mod wire;

pub use error::{Result, VaultError};
pub use import::{ImportId, ImportView};
pub use index::{EntryKind, EntryView, FileId};
pub use registry::{Registry, VaultRecord};
pub use vault::Vault;
