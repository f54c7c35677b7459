//! Encrypted index codec: the serialized entry table.
//!
//! The index is the only map of the data region. It serializes to a padded
//! plaintext buffer (so small metadata edits do not change the ciphertext
//! length) and is sealed as one AEAD message under the master key. The top
//! bit of the leading count field records whether padding is present; the
//! pad bytes themselves are ignored on read.

use zeroize::Zeroizing;

use crate::config::{
    FILE_ID_LEN, INDEX_GROWTH_SLACK, INDEX_PADDED_FLAG, MAX_ENTRY_COUNT, MAX_MIME_LEN,
    MAX_NAME_LEN, MAX_WRAPPED_DEK_LEN, MIN_INDEX_CAPACITY, NONCE_LEN, TAG_LEN,
};
use crate::crypto::Aead;
use crate::error::{Result, VaultError};
use crate::wire::{Reader, Writer};

/// Identifier of one logical file inside a container.
pub type FileId = [u8; FILE_ID_LEN];

/// Byte length of one serialized chunk record.
const CHUNK_REF_LEN: usize = 8 + 4 + NONCE_LEN;

/// Fixed bytes of a serialized entry before its variable-length fields.
const ENTRY_FIXED_LEN: usize = FILE_ID_LEN + 1 + 8 + 2 + 2 + 8 + 2 + 4;

/// Content class of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Text = 1,
    Image = 2,
    Video = 3,
}

impl EntryKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(Self::Text),
            2 => Ok(Self::Image),
            3 => Ok(Self::Video),
            _ => Err(VaultError::Corrupted("unknown entry type tag")),
        }
    }
}

/// One independently sealed segment of a chunked entry.
///
/// The chunk's nonce lives here in the index record, not in the data region;
/// the extent holds only ciphertext and tag.
#[derive(Debug, Clone)]
pub struct ChunkRef {
    pub offset: u64,
    pub length: u32,
    pub nonce: [u8; NONCE_LEN],
}

/// Where an entry's bytes live in the data region.
#[derive(Debug, Clone)]
pub enum Payload {
    /// One AEAD blob, `nonce ‖ ciphertext`, at a single extent.
    Blob { offset: u64, length: u64 },
    /// A sequence of chunk extents; on disk this is `chunk_count > 0`.
    Chunks(Vec<ChunkRef>),
}

/// One logical file in the container.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: FileId,
    pub kind: EntryKind,
    pub created_at: u64,
    pub name: String,
    pub mime: String,
    /// Declared plaintext size in bytes.
    pub size: u64,
    pub wrapped_dek: Vec<u8>,
    pub payload: Payload,
}

impl Entry {
    pub fn chunk_count(&self) -> u32 {
        match &self.payload {
            Payload::Blob { .. } => 0,
            Payload::Chunks(chunks) => chunks.len() as u32,
        }
    }

    /// Smallest data-region offset used by this entry.
    pub fn extent_start(&self) -> u64 {
        match &self.payload {
            Payload::Blob { offset, .. } => *offset,
            Payload::Chunks(chunks) => chunks.iter().map(|c| c.offset).min().unwrap_or(0),
        }
    }

    /// One past the largest data-region offset used by this entry.
    pub fn extent_end(&self) -> u64 {
        match &self.payload {
            Payload::Blob { offset, length } => offset + length,
            Payload::Chunks(chunks) => chunks
                .iter()
                .map(|c| c.offset + u64::from(c.length))
                .max()
                .unwrap_or(0),
        }
    }

    fn serialized_len(&self) -> usize {
        let variable = self.name.len() + self.mime.len() + self.wrapped_dek.len();
        let payload = match &self.payload {
            Payload::Blob { .. } => 16,
            Payload::Chunks(chunks) => chunks.len() * CHUNK_REF_LEN,
        };
        ENTRY_FIXED_LEN + variable + payload
    }
}

/// Read-only projection of an entry for callers outside the engine.
///
/// Offsets and wrapped key material stay internal.
#[derive(Debug, Clone)]
pub struct EntryView {
    pub id: FileId,
    pub kind: EntryKind,
    pub created_at: u64,
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub chunk_count: u32,
}

impl From<&Entry> for EntryView {
    fn from(e: &Entry) -> Self {
        Self {
            id: e.id,
            kind: e.kind,
            created_at: e.created_at,
            name: e.name.clone(),
            mime: e.mime.clone(),
            size: e.size,
            chunk_count: e.chunk_count(),
        }
    }
}

/// Bytes needed to serialize this entry set without padding.
pub fn serialized_len(entries: &[Entry]) -> usize {
    4 + entries.iter().map(Entry::serialized_len).sum::<usize>()
}

/// Picks the plaintext capacity for an index that must hold `required` bytes.
///
/// Capacity never shrinks on the normal write paths (`current` is the live
/// capacity); growth adds slack so a steady stream of appends does not force
/// a full rewrite every time. Compaction passes `current = 0` to allow the
/// capacity to come back down.
pub fn choose_capacity(required: usize, current: usize) -> usize {
    let base = current.max(MIN_INDEX_CAPACITY);
    if required <= base {
        base
    } else {
        (required + INDEX_GROWTH_SLACK).max(required + required / 2)
    }
}

/// Serializes the entry table into a buffer of exactly `capacity` bytes.
pub fn serialize(entries: &[Entry], capacity: usize) -> Result<Zeroizing<Vec<u8>>> {
    let required = serialized_len(entries);
    if capacity < required {
        return Err(VaultError::InvalidParam("index capacity below required size"));
    }
    if entries.len() as u32 > MAX_ENTRY_COUNT {
        return Err(VaultError::InvalidParam("too many entries"));
    }

    let mut w = Writer::with_capacity(capacity);
    let mut count_field = entries.len() as u32;
    if capacity > required {
        count_field |= INDEX_PADDED_FLAG;
    }
    w.u32(count_field);

    for e in entries {
        if e.name.len() > MAX_NAME_LEN {
            return Err(VaultError::InvalidParam("entry name too long"));
        }
        if e.mime.len() > MAX_MIME_LEN {
            return Err(VaultError::InvalidParam("mime type too long"));
        }
        if e.wrapped_dek.len() > MAX_WRAPPED_DEK_LEN {
            return Err(VaultError::InvalidParam("wrapped key too long"));
        }

        w.bytes(&e.id);
        w.u8(e.kind.tag());
        w.u64(e.created_at);
        w.u16(e.name.len() as u16);
        w.bytes(e.name.as_bytes());
        w.u16(e.mime.len() as u16);
        w.bytes(e.mime.as_bytes());
        w.u64(e.size);
        w.u16(e.wrapped_dek.len() as u16);
        w.bytes(&e.wrapped_dek);

        match &e.payload {
            Payload::Blob { offset, length } => {
                w.u32(0);
                w.u64(*offset);
                w.u64(*length);
            }
            Payload::Chunks(chunks) => {
                // chunk_count 0 is the single-blob discriminator on disk.
                if chunks.is_empty() {
                    return Err(VaultError::InvalidParam("chunked entry needs at least one chunk"));
                }
                w.u32(chunks.len() as u32);
                for c in chunks {
                    w.u64(c.offset);
                    w.u32(c.length);
                    w.bytes(&c.nonce);
                }
            }
        }
    }

    let mut buf = Zeroizing::new(w.into_inner());
    buf.resize(capacity, 0);
    Ok(buf)
}

/// Deserializes the entry table from a (possibly padded) plaintext buffer.
///
/// Returns the entries and whether the padded flag was set. Bytes after the
/// last record are padding and are not interpreted.
pub fn deserialize(buf: &[u8]) -> Result<(Vec<Entry>, bool)> {
    let mut r = Reader::new(buf);
    let count_field = r.u32()?;
    let padded = count_field & INDEX_PADDED_FLAG != 0;
    let count = count_field & !INDEX_PADDED_FLAG;
    if count > MAX_ENTRY_COUNT {
        return Err(VaultError::Corrupted("entry count out of range"));
    }

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id: FileId = r.array()?;
        let kind = EntryKind::from_tag(r.u8()?)?;
        let created_at = r.u64()?;

        let name_len = r.u16()? as usize;
        if name_len > MAX_NAME_LEN {
            return Err(VaultError::Corrupted("entry name too long"));
        }
        let name = String::from_utf8(r.take(name_len)?.to_vec())
            .map_err(|_| VaultError::Corrupted("entry name not utf-8"))?;

        let mime_len = r.u16()? as usize;
        if mime_len > MAX_MIME_LEN {
            return Err(VaultError::Corrupted("mime type too long"));
        }
        let mime = String::from_utf8(r.take(mime_len)?.to_vec())
            .map_err(|_| VaultError::Corrupted("mime type not utf-8"))?;

        let size = r.u64()?;

        let dek_len = r.u16()? as usize;
        if dek_len > MAX_WRAPPED_DEK_LEN {
            return Err(VaultError::Corrupted("wrapped key too long"));
        }
        let wrapped_dek = r.take(dek_len)?.to_vec();

        let chunk_count = r.u32()? as usize;
        let payload = if chunk_count == 0 {
            Payload::Blob { offset: r.u64()?, length: r.u64()? }
        } else {
            if chunk_count.saturating_mul(CHUNK_REF_LEN) > r.remaining() {
                return Err(VaultError::Corrupted("chunk table truncated"));
            }
            let mut chunks = Vec::with_capacity(chunk_count);
            for _ in 0..chunk_count {
                chunks.push(ChunkRef {
                    offset: r.u64()?,
                    length: r.u32()?,
                    nonce: r.array()?,
                });
            }
            Payload::Chunks(chunks)
        };

        entries.push(Entry { id, kind, created_at, name, mime, size, wrapped_dek, payload });
    }

    Ok((entries, padded))
}

/// On-disk length of the index section for a given plaintext capacity.
pub fn section_len(capacity: usize) -> u64 {
    (NONCE_LEN + 8 + capacity + TAG_LEN) as u64
}

/// Seals a padded plaintext index into its on-disk section form:
/// `nonce(24) ‖ ct_len(u64) ‖ ciphertext`.
pub fn seal_section(cipher: &Aead, padded_plaintext: &[u8]) -> Result<Vec<u8>> {
    let sealed = cipher.seal(b"", padded_plaintext)?;
    let (nonce, ct) = sealed.split_at(NONCE_LEN);

    let mut out = Vec::with_capacity(NONCE_LEN + 8 + ct.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(&(ct.len() as u64).to_le_bytes());
    out.extend_from_slice(ct);
    Ok(out)
}

/// Opens a sealed index section and parses the entry table.
///
/// The section sits behind the authenticated header, so an AEAD failure here
/// means the ciphertext was tampered with or torn: `Corrupted`, not
/// `AuthFail`.
pub fn open_section(cipher: &Aead, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<(Vec<Entry>, bool)> {
    let plaintext = cipher
        .open(nonce, b"", ciphertext)
        .map_err(|_| VaultError::Corrupted("index authentication failed"))?;
    deserialize(&plaintext)
}
