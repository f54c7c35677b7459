//! Container format constants and engine limits.
//!
//! Every number that appears on disk or bounds a parser lives here; the rest
//! of the crate treats this module as the single source of truth for the
//! file format.

/// Magic bytes of the legacy single-record header.
///
/// Legacy containers are read-only for this engine; they are migrated to the
/// journaled form on the first passphrase change.
pub const LEGACY_MAGIC: [u8; 8] = *b"VAULTv1\0";

/// Magic bytes of the journaled header superblock.
pub const JOURNAL_MAGIC: [u8; 8] = *b"VAULTJ1\0";

/// Current on-disk format version, also bound into every AEAD message.
pub const FORMAT_VERSION: u32 = 1;

/// Length of the per-container random identifier.
pub const VAULT_ID_LEN: usize = 16;

/// Length of a file or import identifier.
pub const FILE_ID_LEN: usize = 16;

/// Length of the Argon2id salt persisted in the header.
pub const SALT_LEN: usize = 16;

/// Length of every symmetric key in the hierarchy (KEK, MK, DEK).
pub const KEY_LEN: usize = 32;

/// XChaCha20-Poly1305 nonce length.
///
/// 192-bit nonces make fresh random generation safe per message.
pub const NONCE_LEN: usize = 24;

/// Poly1305 authentication tag length.
pub const TAG_LEN: usize = 16;

/// Length of a wrapped key on disk: nonce, 32-byte key, tag.
pub const WRAPPED_KEY_LEN: usize = NONCE_LEN + KEY_LEN + TAG_LEN;

/// Length of the AAD binding tuple: vault_id, file_id, chunk index, version.
pub const BINDING_AAD_LEN: usize = VAULT_ID_LEN + FILE_ID_LEN + 4 + 4;

/// Reserved trailer at the end of the container.
///
/// Legacy writers stored a SHA-256 of the preceding bytes here; modern
/// writers emit zeros. The trailer is never consulted on open.
pub const TRAILER_LEN: usize = 32;

/// Minimum accepted passphrase length in bytes.
pub const MIN_PASSPHRASE_LEN: usize = 12;

/// Smallest plaintext capacity ever reserved for the serialized index.
pub const MIN_INDEX_CAPACITY: usize = 64 * 1024;

/// Extra slack added when the index capacity must grow.
pub const INDEX_GROWTH_SLACK: usize = 32 * 1024;

/// Upper bound a reader accepts for the index ciphertext length.
pub const MAX_INDEX_CIPHERTEXT: u64 = 100 * 1024 * 1024;

/// Upper bound a deserializer accepts for the entry count.
pub const MAX_ENTRY_COUNT: u32 = 1_000_000;

/// Maximum UTF-8 byte length of an entry name.
pub const MAX_NAME_LEN: usize = 4096;

/// Maximum UTF-8 byte length of an entry MIME type.
pub const MAX_MIME_LEN: usize = 512;

/// Maximum stored length of a wrapped per-entry key.
pub const MAX_WRAPPED_DEK_LEN: usize = 512;

/// Top bit of the index count field: set iff the buffer carries padding.
pub const INDEX_PADDED_FLAG: u32 = 0x8000_0000;

/// Plaintext chunk size used by streaming imports.
pub const STREAM_CHUNK_SIZE: u32 = 4 * 1024 * 1024;

/// Maximum total plaintext size of one streaming import.
pub const MAX_STREAM_SIZE: u64 = 50 * 1024 * 1024 * 1024;

/// Maximum number of concurrently active streaming imports per process.
pub const MAX_ACTIVE_IMPORTS: usize = 4;

/// Name of the staging directory, a sibling of the container file.
pub const STAGING_DIR_NAME: &str = ".pending_imports";

/// Magic bytes of the streaming-import state sidecar.
pub const IMPORT_STATE_MAGIC: [u8; 6] = *b"STRMV1";

/// Version of the streaming-import state sidecar.
pub const IMPORT_STATE_VERSION: u32 = 1;

/// Span of leading and trailing bytes hashed into a source fingerprint.
pub const FINGERPRINT_SPAN: usize = 1024 * 1024;

/// Number of chunk commits between `.state` persists during an import.
pub const IMPORT_STATE_FLUSH_INTERVAL: u32 = 10;

/// Maximum number of vaults tracked by the plaintext registry.
pub const MAX_REGISTRY_VAULTS: usize = 25;

/// Prefix marking reserved system entry names.
pub const RESERVED_NAME_PREFIX: &str = "__";

/// The only reserved names that may ever be created or renamed to.
pub const SYSTEM_NAME_ALLOWLIST: &[&str] = &[
    "__folder_map__",
    "__folder_map__.tmp",
    "__vault_title__",
    "__vault_title__.tmp",
];

/// Copy buffer size used by full-container rewrites.
pub const REWRITE_BUF_SIZE: usize = 4 * 1024 * 1024;
