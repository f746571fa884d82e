//! Container file format.
//!
//! Provides version-aware framing of a container (magic, header, header HMAC
//! and encrypted payload) and the binary recipient header codec.

use crate::crypto::HMAC_LEN;
use crate::error::{Cdoc2Error, Result};

pub mod header;
pub mod v2;

pub use header::{Header, PayloadEncryptionMethod};

/// Magic bytes identifying a CDOC container ("CDOC").
pub const MAGIC: &[u8; 4] = b"CDOC";
/// Length of magic bytes.
pub const MAGIC_LEN: usize = 4;
/// Length of version field.
pub const VER_LEN: usize = 1;
/// Latest format version
pub const CURRENT_VERSION: u8 = v2::VERSION_V2;

/// A framed container with its header still in serialized form.
///
/// The header bytes are kept exactly as read so the HMAC is checked over
/// what was on disk rather than over a re-encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFile {
    version: u8,
    header: Vec<u8>,
    header_hmac: [u8; HMAC_LEN],
    payload: Vec<u8>,
}

impl ContainerFile {
    pub fn new(header: Vec<u8>, header_hmac: [u8; HMAC_LEN], payload: Vec<u8>) -> Self {
        Self {
            version: CURRENT_VERSION,
            header,
            header_hmac,
            payload,
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Serialized recipient header.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn header_hmac(&self) -> &[u8; HMAC_LEN] {
        &self.header_hmac
    }

    /// Nonce followed by the AEAD ciphertext.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    /// Everything that precedes the payload; bound to it as AEAD associated data.
    pub fn authenticated_prefix(&self) -> Result<Vec<u8>> {
        serialize(&Self {
            version: self.version,
            header: self.header.clone(),
            header_hmac: self.header_hmac,
            payload: Vec::new(),
        })
    }
}

/// Parses a container and returns a ContainerFile.
///
/// Automatically dispatches to the appropriate version parser.
///
/// # Errors
///
/// Returns an error if:
/// - The file is too short
/// - The magic bytes are invalid
/// - The version is unsupported
pub fn parse(data: &[u8]) -> Result<ContainerFile> {
    if data.len() < MAGIC_LEN + VER_LEN {
        return Err(Cdoc2Error::InvalidContainer("file too short".into()));
    }

    if &data[..MAGIC_LEN] != MAGIC {
        return Err(Cdoc2Error::InvalidContainer("invalid magic".into()));
    }

    match data[MAGIC_LEN] {
        v2::VERSION_V2 => v2::parse(data),
        other => Err(Cdoc2Error::InvalidContainer(format!("unsupported version {other}"))),
    }
}

/// Serializes a ContainerFile to bytes.
///
/// # Errors
///
/// Returns an error if the version is unsupported.
pub fn serialize(file: &ContainerFile) -> Result<Vec<u8>> {
    match file.version() {
        v2::VERSION_V2 => v2::serialize(file),
        other => Err(Cdoc2Error::InvalidContainer(format!("unsupported version {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_magic_fails() {
        let mut data = vec![0u8; 64];
        data[..4].copy_from_slice(b"FAIL");
        assert!(matches!(parse(&data), Err(Cdoc2Error::InvalidContainer(_))));
    }

    #[test]
    fn unsupported_version_fails() {
        let mut data = vec![0u8; 64];
        data[..4].copy_from_slice(MAGIC);
        data[4] = 99;
        assert!(parse(&data).is_err());
    }

    #[test]
    fn too_short_fails() {
        assert!(parse(b"CDO").is_err());
    }

    #[test]
    fn prefix_excludes_payload() {
        let file = ContainerFile::new(vec![1, 2, 3], [7u8; HMAC_LEN], vec![9u8; 40]);
        let full = serialize(&file).unwrap();
        let prefix = file.authenticated_prefix().unwrap();

        assert_eq!(prefix.len(), full.len() - 40);
        assert_eq!(&full[..prefix.len()], prefix.as_slice());
    }
}
