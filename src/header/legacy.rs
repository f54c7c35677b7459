//! Legacy single-record header codec.
//!
//! The original container format before header journaling: one fixed record
//! with a CRC over its fixed-width fields. This engine reads the form and
//! can emit it for migration testing, but never writes it to a live vault.

use crate::config::{FORMAT_VERSION, LEGACY_MAGIC, SALT_LEN, VAULT_ID_LEN, WRAPPED_KEY_LEN};
use crate::crypto::{KdfParams, crc32};
use crate::error::{Result, VaultError};
use crate::header::HeaderInfo;
use crate::wire::{Reader, Writer};

/// Total byte length of the legacy header.
pub const HEADER_LEN: usize = 136;

/// Length of the CRC-covered prefix (everything before the wrapped MK).
const CRC_SPAN: usize = 60;

/// Parses a legacy header.
pub fn parse(bytes: &[u8]) -> Result<HeaderInfo> {
    if bytes.len() < HEADER_LEN {
        return Err(VaultError::Corrupted("legacy header truncated"));
    }

    let stored_crc = u32::from_le_bytes(
        bytes[HEADER_LEN - 4..HEADER_LEN]
            .try_into()
            .map_err(|_| VaultError::Corrupted("legacy header truncated"))?,
    );
    if crc32(&bytes[..CRC_SPAN]) != stored_crc {
        return Err(VaultError::Corrupted("legacy header crc mismatch"));
    }

    let mut r = Reader::new(bytes);
    let magic: [u8; 8] = r.array()?;
    if magic != LEGACY_MAGIC {
        return Err(VaultError::Corrupted("bad legacy magic"));
    }
    if r.u32()? != FORMAT_VERSION {
        return Err(VaultError::Corrupted("unsupported header version"));
    }
    let vault_id = r.array()?;
    let salt = r.array()?;
    let kdf = KdfParams {
        memory_bytes: r.u32()?,
        iterations: r.u32()?,
        parallelism: r.u32()?,
    }
    .validate()?;
    if r.u32()? != WRAPPED_KEY_LEN as u32 {
        return Err(VaultError::Corrupted("unexpected wrapped key length"));
    }
    let wrapped_mk = r.array()?;

    Ok(HeaderInfo {
        journaled: false,
        seq: 0,
        vault_id,
        salt,
        kdf,
        wrapped_mk,
        header_len: HEADER_LEN as u64,
    })
}

/// Serializes a legacy header.
///
/// Used to synthesize pre-journal containers for migration coverage.
pub fn encode(
    vault_id: &[u8; VAULT_ID_LEN],
    salt: &[u8; SALT_LEN],
    kdf: KdfParams,
    wrapped_mk: &[u8; WRAPPED_KEY_LEN],
) -> Vec<u8> {
    let mut w = Writer::with_capacity(HEADER_LEN);
    w.bytes(&LEGACY_MAGIC);
    w.u32(FORMAT_VERSION);
    w.bytes(vault_id);
    w.bytes(salt);
    w.u32(kdf.memory_bytes);
    w.u32(kdf.iterations);
    w.u32(kdf.parallelism);
    w.u32(WRAPPED_KEY_LEN as u32);

    let mut out = w.into_inner();
    let crc = crc32(&out[..CRC_SPAN]);
    out.extend_from_slice(wrapped_mk);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use crate::crypto::KdfProfile;

    use super::*;

    #[test]
    fn encode_parse_roundtrip() {
        let bytes = encode(
            &[1; VAULT_ID_LEN],
            &[2; SALT_LEN],
            KdfProfile::Low.params(),
            &[3; WRAPPED_KEY_LEN],
        );
        assert_eq!(bytes.len(), HEADER_LEN);

        let info = parse(&bytes).unwrap();
        assert!(!info.journaled);
        assert_eq!(info.seq, 0);
        assert_eq!(info.vault_id, [1; VAULT_ID_LEN]);
        assert_eq!(info.salt, [2; SALT_LEN]);
        assert_eq!(info.wrapped_mk, [3; WRAPPED_KEY_LEN]);
        assert_eq!(info.header_len, 136);
    }

    #[test]
    fn crc_guards_fixed_fields() {
        let mut bytes = encode(
            &[1; VAULT_ID_LEN],
            &[2; SALT_LEN],
            KdfProfile::Low.params(),
            &[3; WRAPPED_KEY_LEN],
        );
        bytes[20] ^= 0x01;
        assert!(matches!(parse(&bytes), Err(VaultError::Corrupted(_))));
    }

    #[test]
    fn crc_ignores_wrapped_mk_bytes() {
        // The CRC spans only the fixed fields; a flipped wrapped-MK byte
        // passes the header parse and must fail later at AEAD unwrap.
        let mut bytes = encode(
            &[1; VAULT_ID_LEN],
            &[2; SALT_LEN],
            KdfProfile::Low.params(),
            &[3; WRAPPED_KEY_LEN],
        );
        bytes[70] ^= 0x01;
        assert!(parse(&bytes).is_ok());
    }
}
