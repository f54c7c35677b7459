//! SHA-256 and CRC32 helpers.

use sha2::{Digest, Sha256};

use crate::config::FINGERPRINT_SPAN;

/// Streaming SHA-256 hasher.
pub struct Sha256Stream {
    inner: Sha256,
}

impl Sha256Stream {
    pub fn new() -> Self {
        Self { inner: Sha256::new() }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finish(self) -> [u8; 32] {
        self.inner.finalize().into()
    }
}

impl Default for Sha256Stream {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the resume fingerprint of an external source file.
///
/// The fingerprint is `SHA-256(first_1MiB ‖ last_1MiB ‖ size_le)`; for files
/// of at most 2 MiB the trailing span is omitted and `last` must be empty.
///
/// # Arguments
/// * `first` - Up to the first 1 MiB of the source
/// * `last` - Up to the last 1 MiB of the source, empty for small files
/// * `size` - Total source size in bytes
pub fn source_fingerprint(first: &[u8], last: &[u8], size: u64) -> [u8; 32] {
    let mut hasher = Sha256Stream::new();
    hasher.update(&first[..first.len().min(FINGERPRINT_SPAN)]);
    hasher.update(&last[..last.len().min(FINGERPRINT_SPAN)]);
    hasher.update(&size.to_le_bytes());
    hasher.finish()
}

/// CRC32 (IEEE, polynomial 0xEDB88320) over a byte slice.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
