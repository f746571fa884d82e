//! Container format v2.
//!
//! V2 File Format:
//! ```text
//! MAGIC (4) | VERSION (1) | HEADER_LEN (4, BE) | HEADER | HEADER_HMAC (32) | NONCE (12) | CIPHERTEXT
//! ```

use super::{ContainerFile, MAGIC, MAGIC_LEN, VER_LEN};
use crate::crypto::HMAC_LEN;
use crate::error::{Cdoc2Error, Result};

/// Current container format version.
pub const VERSION_V2: u8 = 2;

const HEADER_LEN_LEN: usize = 4;

const PREFIX_LEN: usize = MAGIC_LEN + VER_LEN + HEADER_LEN_LEN;

/// Parses a v2 container.
///
/// # Errors
///
/// Returns an error if the file is shorter than its declared header.
pub fn parse(data: &[u8]) -> Result<ContainerFile> {
    if data.len() < PREFIX_LEN {
        return Err(Cdoc2Error::InvalidContainer("file too short for v2".into()));
    }

    let mut offset = MAGIC_LEN + VER_LEN;

    let mut len = [0u8; HEADER_LEN_LEN];
    len.copy_from_slice(&data[offset..offset + HEADER_LEN_LEN]);
    let header_len = u32::from_be_bytes(len) as usize;
    offset += HEADER_LEN_LEN;

    let rest = data.len() - offset;
    if rest < header_len || rest - header_len < HMAC_LEN {
        return Err(Cdoc2Error::InvalidContainer("truncated header".into()));
    }

    let header = data[offset..offset + header_len].to_vec();
    offset += header_len;

    let mut header_hmac = [0u8; HMAC_LEN];
    header_hmac.copy_from_slice(&data[offset..offset + HMAC_LEN]);
    offset += HMAC_LEN;

    let payload = data[offset..].to_vec();

    Ok(ContainerFile::new(header, header_hmac, payload))
}

/// Serializes a ContainerFile to v2 bytes.
///
/// # Errors
///
/// Returns an error if the version is not v2 or the header does not fit the length field.
pub fn serialize(file: &ContainerFile) -> Result<Vec<u8>> {
    if file.version() != VERSION_V2 {
        return Err(Cdoc2Error::InvalidContainer("wrong version for v2 serializer".into()));
    }

    let header_len = u32::try_from(file.header().len())
        .map_err(|_| Cdoc2Error::InvalidContainer("header too large".into()))?;

    let mut buf =
        Vec::with_capacity(PREFIX_LEN + file.header().len() + HMAC_LEN + file.payload().len());

    buf.extend_from_slice(MAGIC);
    buf.push(VERSION_V2);
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(file.header());
    buf.extend_from_slice(file.header_hmac());
    buf.extend_from_slice(file.payload());

    Ok(buf)
}
