//! Container header codecs.
//!
//! Two header forms exist on disk. The legacy form is a single CRC-guarded
//! record; the journaled form is a superblock followed by two fixed-size
//! slots, of which the valid one with the highest sequence number wins.
//! Writers only ever emit the journaled form; legacy containers are migrated
//! on their first passphrase change.

use crate::config::{JOURNAL_MAGIC, LEGACY_MAGIC, SALT_LEN, VAULT_ID_LEN, WRAPPED_KEY_LEN};
use crate::crypto::KdfParams;
use crate::error::{Result, VaultError};

pub mod journal;
pub mod legacy;

/// Everything `open` needs out of a parsed header.
#[derive(Debug, Clone)]
pub struct HeaderInfo {
    /// True for the journaled form.
    pub journaled: bool,
    /// Sequence number of the winning slot; 0 for legacy headers.
    pub seq: u32,
    pub vault_id: [u8; VAULT_ID_LEN],
    pub salt: [u8; SALT_LEN],
    pub kdf: KdfParams,
    pub wrapped_mk: [u8; WRAPPED_KEY_LEN],
    /// Byte length of the header region; the index section starts here.
    pub header_len: u64,
}

/// Parses the header region from the leading bytes of a container file.
///
/// The caller must supply at least [`journal::HEADER_LEN`] bytes when the
/// file is that long; shorter files can only ever hold shorter headers.
pub fn parse(bytes: &[u8]) -> Result<HeaderInfo> {
    if bytes.len() < 8 {
        return Err(VaultError::Corrupted("file too small for a header"));
    }
    match &bytes[..8] {
        m if m == JOURNAL_MAGIC => journal::parse(bytes),
        m if m == LEGACY_MAGIC => legacy::parse(bytes),
        _ => Err(VaultError::Corrupted("unknown header magic")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_magic_is_corrupted() {
        let bytes = [0u8; 300];
        assert!(matches!(parse(&bytes), Err(VaultError::Corrupted(_))));
    }

    #[test]
    fn short_buffer_is_corrupted() {
        assert!(matches!(parse(b"VAU"), Err(VaultError::Corrupted(_))));
    }
}
