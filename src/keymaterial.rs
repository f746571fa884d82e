//! Key material describing what a caller can encrypt for or decrypt as.
//!
//! Both sides are closed tagged unions: a value always carries exactly one
//! secret origin, so the "nothing present" state cannot be constructed.

use serde::Serialize;
use std::fmt;
use zeroize::Zeroizing;

use crate::error::{Cdoc2Error, Result};
use crate::keys::{KeyPair, PublicKey, SecretKey};
use crate::label::{self, KeyLabelParams};
use crate::recipient::RecipientId;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionKeyOrigin {
    IdCard,
    Certificate,
    PublicKey,
    Secret,
    Password,
}

/// Check password length in characters.
pub fn validate_password(password: &str) -> Result<()> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(Cdoc2Error::InvalidKeyMaterial(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(Cdoc2Error::InvalidKeyMaterial(format!(
            "password must be at most {MAX_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub enum EncryptionPayload {
    PublicKey(PublicKey),
    Password(Zeroizing<String>),
    Secret(SecretKey),
}

impl EncryptionPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EncryptionPayload::PublicKey(_) => "public key",
            EncryptionPayload::Password(_) => "password",
            EncryptionPayload::Secret(_) => "secret key",
        }
    }
}

/// What is needed to add one recipient to a container.
#[derive(Clone)]
pub struct EncryptionKeyMaterial {
    label: String,
    origin: EncryptionKeyOrigin,
    payload: EncryptionPayload,
}

impl EncryptionKeyMaterial {
    pub fn from_public_key(key: PublicKey, label: &KeyLabelParams) -> Self {
        Self {
            label: label.format(),
            origin: label.key_type().origin(),
            payload: EncryptionPayload::PublicKey(key),
        }
    }

    /// Public key taken from an eID authentication certificate.
    pub fn from_eid(key: PublicKey, cn: &str, serial_number: &str) -> Self {
        Self::from_public_key(key, &KeyLabelParams::id_card(cn, serial_number))
    }

    pub fn from_password(password: Zeroizing<String>, label: &str) -> Result<Self> {
        validate_password(&password)?;
        Ok(Self {
            label: label.to_string(),
            origin: EncryptionKeyOrigin::Password,
            payload: EncryptionPayload::Password(password),
        })
    }

    pub fn from_secret_key(key: SecretKey, label: &str) -> Self {
        Self {
            label: label.to_string(),
            origin: EncryptionKeyOrigin::Secret,
            payload: EncryptionPayload::Secret(key),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn key_origin(&self) -> EncryptionKeyOrigin {
        self.origin
    }

    pub fn payload(&self) -> &EncryptionPayload {
        &self.payload
    }

    pub fn public_key(&self) -> Result<&PublicKey> {
        match &self.payload {
            EncryptionPayload::PublicKey(key) => Ok(key),
            other => Err(absent("public key", other.name())),
        }
    }

    pub fn password(&self) -> Result<&str> {
        match &self.payload {
            EncryptionPayload::Password(password) => Ok(password.as_str()),
            other => Err(absent("password", other.name())),
        }
    }

    pub fn secret_key(&self) -> Result<&SecretKey> {
        match &self.payload {
            EncryptionPayload::Secret(key) => Ok(key),
            other => Err(absent("secret key", other.name())),
        }
    }
}

impl fmt::Debug for EncryptionKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("EncryptionKeyMaterial");
        s.field("label", &self.label).field("origin", &self.origin);
        match &self.payload {
            EncryptionPayload::PublicKey(key) => s.field("public_key", key),
            EncryptionPayload::Password(_) => s.field("password", &"[hidden]"),
            EncryptionPayload::Secret(_) => s.field("secret", &"[hidden]"),
        };
        s.finish()
    }
}

#[derive(Clone)]
pub enum DecryptionPayload {
    KeyPair(KeyPair),
    Secret(SecretKey),
    Password(Zeroizing<String>),
}

impl DecryptionPayload {
    pub fn name(&self) -> &'static str {
        match self {
            DecryptionPayload::KeyPair(KeyPair::Ec(_)) => "EC key pair",
            DecryptionPayload::KeyPair(KeyPair::Rsa(_)) => "RSA key pair",
            DecryptionPayload::Secret(_) => "secret key",
            DecryptionPayload::Password(_) => "password",
        }
    }
}

/// What a caller holds when opening a container.
#[derive(Clone)]
pub struct DecryptionKeyMaterial {
    recipient_id: RecipientId,
    payload: DecryptionPayload,
}

impl DecryptionKeyMaterial {
    pub fn from_key_pair(pair: KeyPair) -> Self {
        Self {
            recipient_id: RecipientId::PublicKey(pair.public_key()),
            payload: DecryptionPayload::KeyPair(pair),
        }
    }

    pub fn from_secret_key(label: &str, key: SecretKey) -> Self {
        Self {
            recipient_id: RecipientId::Label(label::extract_key_label(label)),
            payload: DecryptionPayload::Secret(key),
        }
    }

    pub fn from_password(password: Zeroizing<String>, label: &str) -> Self {
        Self {
            recipient_id: RecipientId::Label(label::extract_key_label(label)),
            payload: DecryptionPayload::Password(password),
        }
    }

    /// Identity matched against [`crate::Recipient::recipient_id`].
    pub fn recipient_id(&self) -> &RecipientId {
        &self.recipient_id
    }

    pub fn key_origin(&self) -> EncryptionKeyOrigin {
        match self.payload {
            DecryptionPayload::KeyPair(_) => EncryptionKeyOrigin::PublicKey,
            DecryptionPayload::Secret(_) => EncryptionKeyOrigin::Secret,
            DecryptionPayload::Password(_) => EncryptionKeyOrigin::Password,
        }
    }

    pub fn payload(&self) -> &DecryptionPayload {
        &self.payload
    }

    pub fn key_pair(&self) -> Result<&KeyPair> {
        match &self.payload {
            DecryptionPayload::KeyPair(pair) => Ok(pair),
            other => Err(absent("key pair", other.name())),
        }
    }

    pub fn secret_key(&self) -> Result<&SecretKey> {
        match &self.payload {
            DecryptionPayload::Secret(key) => Ok(key),
            other => Err(absent("secret key", other.name())),
        }
    }

    pub fn password(&self) -> Result<&str> {
        match &self.payload {
            DecryptionPayload::Password(password) => Ok(password.as_str()),
            other => Err(absent("password", other.name())),
        }
    }
}

impl fmt::Debug for DecryptionKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionKeyMaterial")
            .field("recipient_id", &self.recipient_id)
            .field("payload", &self.payload.name())
            .finish()
    }
}

fn absent(wanted: &str, present: &str) -> Cdoc2Error {
    Cdoc2Error::InvalidKeyMaterial(format!("expected {wanted}, key material holds {present}"))
}
