//! Journaled A/B-slot header codec.
//!
//! Layout: a 28-byte superblock, then two 128-byte slots. Each slot carries
//! a sequence number, the vault identity, the KDF parameters and the wrapped
//! master key, all guarded by a trailing CRC32. A passphrase change writes
//! only the slot `new_seq % 2`, leaving the other slot intact as the
//! fallback after a torn write.

use crate::config::{FORMAT_VERSION, JOURNAL_MAGIC, SALT_LEN, VAULT_ID_LEN, WRAPPED_KEY_LEN};
use crate::crypto::{KdfParams, crc32};
use crate::error::{Result, VaultError};
use crate::header::HeaderInfo;
use crate::wire::{Reader, Writer};

/// Byte length of the superblock.
pub const SUPERBLOCK_LEN: usize = 28;

/// Byte length of one slot: 124 bytes of data plus the CRC.
pub const SLOT_LEN: usize = 128;

/// Total byte length of the journaled header region.
pub const HEADER_LEN: usize = SUPERBLOCK_LEN + 2 * SLOT_LEN;

/// One versioned copy of the vault credentials.
#[derive(Debug, Clone)]
pub struct Slot {
    pub seq: u32,
    pub vault_id: [u8; VAULT_ID_LEN],
    pub salt: [u8; SALT_LEN],
    pub kdf: KdfParams,
    pub wrapped_mk: [u8; WRAPPED_KEY_LEN],
}

impl Slot {
    /// Serializes the slot, computing its CRC.
    pub fn encode(&self) -> [u8; SLOT_LEN] {
        let mut w = Writer::with_capacity(SLOT_LEN);
        w.u32(self.seq);
        w.bytes(&self.vault_id);
        w.bytes(&self.salt);
        w.u32(self.kdf.memory_bytes);
        w.u32(self.kdf.iterations);
        w.u32(self.kdf.parallelism);
        w.u32(WRAPPED_KEY_LEN as u32);
        w.bytes(&self.wrapped_mk);

        let mut out = [0u8; SLOT_LEN];
        let body = w.into_inner();
        out[..SLOT_LEN - 4].copy_from_slice(&body);
        out[SLOT_LEN - 4..].copy_from_slice(&crc32(&body).to_le_bytes());
        out
    }

    /// Decodes one slot; returns `None` for empty or structurally bad slots.
    ///
    /// Empty means seq == 0. Structural damage (CRC mismatch, wrong wrapped
    /// key length) also yields `None` so that slot selection can fall back
    /// to the sibling.
    fn decode(bytes: &[u8]) -> Option<Slot> {
        let stored = u32::from_le_bytes(bytes[SLOT_LEN - 4..].try_into().ok()?);
        if crc32(&bytes[..SLOT_LEN - 4]) != stored {
            return None;
        }

        let mut r = Reader::new(bytes);
        let seq = r.u32().ok()?;
        if seq == 0 {
            return None;
        }
        let vault_id = r.array().ok()?;
        let salt = r.array().ok()?;
        let kdf = KdfParams {
            memory_bytes: r.u32().ok()?,
            iterations: r.u32().ok()?,
            parallelism: r.u32().ok()?,
        };
        if r.u32().ok()? != WRAPPED_KEY_LEN as u32 {
            return None;
        }
        let wrapped_mk = r.array().ok()?;

        Some(Slot { seq, vault_id, salt, kdf, wrapped_mk })
    }
}

/// Serializes the superblock.
pub fn encode_superblock() -> [u8; SUPERBLOCK_LEN] {
    let mut w = Writer::with_capacity(SUPERBLOCK_LEN);
    w.bytes(&JOURNAL_MAGIC);
    w.u32(FORMAT_VERSION);
    w.u32(SLOT_LEN as u32);
    w.u32(2);
    w.u32(0);

    let mut out = [0u8; SUPERBLOCK_LEN];
    let body = w.into_inner();
    out[..24].copy_from_slice(&body);
    out[24..].copy_from_slice(&crc32(&body).to_le_bytes());
    out
}

/// Serializes the full header region from up to two slots.
///
/// A `None` slot is emitted as zeros, which a reader treats as empty.
pub fn encode_region(slot0: Option<&Slot>, slot1: Option<&Slot>) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(&encode_superblock());
    for slot in [slot0, slot1] {
        match slot {
            Some(s) => out.extend_from_slice(&s.encode()),
            None => out.extend_from_slice(&[0u8; SLOT_LEN]),
        }
    }
    out
}

/// Byte offset of slot `index` inside the header region.
pub fn slot_offset(index: u32) -> u64 {
    SUPERBLOCK_LEN as u64 + u64::from(index) * SLOT_LEN as u64
}

/// The sequence number a passphrase change must write next.
///
/// Returns `(new_seq, rewrite_both)`; when the counter would wrap to 0 both
/// slots are rewritten as {1, 2} and 2 is the new sequence.
pub fn next_seq(cur: u32) -> (u32, bool) {
    match cur.checked_add(1) {
        Some(next) => (next, false),
        None => (2, true),
    }
}

/// Parses the journaled header region and selects the winning slot.
pub fn parse(bytes: &[u8]) -> Result<HeaderInfo> {
    if bytes.len() < HEADER_LEN {
        return Err(VaultError::Corrupted("journal header truncated"));
    }

    let mut r = Reader::new(bytes);
    let magic: [u8; 8] = r.array()?;
    if magic != JOURNAL_MAGIC {
        return Err(VaultError::Corrupted("bad journal magic"));
    }
    let version = r.u32()?;
    let slot_size = r.u32()?;
    let slot_count = r.u32()?;
    let _flags = r.u32()?;
    let stored_crc = r.u32()?;
    if crc32(&bytes[..24]) != stored_crc {
        return Err(VaultError::Corrupted("superblock crc mismatch"));
    }
    if version != FORMAT_VERSION {
        return Err(VaultError::Corrupted("unsupported header version"));
    }
    if slot_size != SLOT_LEN as u32 || slot_count != 2 {
        return Err(VaultError::Corrupted("unexpected journal geometry"));
    }

    let slot0 = Slot::decode(&bytes[SUPERBLOCK_LEN..SUPERBLOCK_LEN + SLOT_LEN]);
    let slot1 = Slot::decode(&bytes[SUPERBLOCK_LEN + SLOT_LEN..HEADER_LEN]);

    let winner = match (slot0, slot1) {
        (Some(a), Some(b)) => {
            if a.seq >= b.seq {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return Err(VaultError::Corrupted("no valid header slot")),
    };

    let kdf = winner.kdf.validate()?;

    Ok(HeaderInfo {
        journaled: true,
        seq: winner.seq,
        vault_id: winner.vault_id,
        salt: winner.salt,
        kdf,
        wrapped_mk: winner.wrapped_mk,
        header_len: HEADER_LEN as u64,
    })
}
