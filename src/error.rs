use thiserror::Error;

use crate::capsule::CapsuleError;

pub type Result<T> = std::result::Result<T, Cdoc2Error>;

#[derive(Debug, Error)]
pub enum Cdoc2Error {
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("{material} key material cannot be used for {recipient} recipient")]
    UnsupportedKeyMaterial {
        recipient: &'static str,
        material: &'static str,
    },

    #[error("no recipient could be decrypted with the provided key material")]
    NoMatchingRecipient,

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("unknown recipient record type: {0}")]
    UnknownRecipientVariant(u8),

    #[error("unsupported FMK encryption method: {0}")]
    UnsupportedFmkEncryptionMethod(u8),

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("invalid key label: {0}")]
    InvalidKeyLabel(String),

    #[error("invalid container: {0}")]
    InvalidContainer(String),

    #[error("at least one recipient is required")]
    NoRecipients,

    #[error("payload decryption failed")]
    PayloadDecryptionFailed,

    #[error(transparent)]
    Capsule(#[from] CapsuleError),

    #[error("OS random generator unavailable")]
    Random,
}

impl Cdoc2Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedHeader(msg.into())
    }

    pub(crate) fn kdf(msg: impl std::fmt::Display) -> Self {
        Self::KeyDerivationFailed(msg.to_string())
    }

    /// Errors that only disqualify a single recipient record while parsing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownRecipientVariant(_) | Self::UnsupportedFmkEncryptionMethod(_)
        )
    }
}
