//! Recipient records: a wrapped FMK plus the public parameters needed to
//! re-derive the KEK that unwraps it.

use rsa::RsaPublicKey;
use rsa::traits::PublicKeyParts;
use std::fmt;
use subtle::ConstantTimeEq;

use crate::crypto::{FMK_LEN, Fmk, Kek, Pbkdf2Params, SALT_LEN};
use crate::error::{Cdoc2Error, Result};
use crate::keys::PublicKey;
use crate::label;

/// How the FMK is wrapped with the KEK.
///
/// Dispatched on at unwrap time so further methods can be added alongside XOR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FmkEncryptionMethod {
    Xor = 1,
}

impl FmkEncryptionMethod {
    /// Name mixed into KEK derivation info.
    pub fn name(&self) -> &'static str {
        match self {
            FmkEncryptionMethod::Xor => "XOR",
        }
    }

    pub fn wrap(&self, fmk: &Fmk, kek: &Kek) -> [u8; FMK_LEN] {
        match self {
            FmkEncryptionMethod::Xor => xor(fmk.as_bytes(), kek.as_bytes()),
        }
    }

    pub fn unwrap(&self, encrypted_fmk: &[u8; FMK_LEN], kek: &Kek) -> Fmk {
        match self {
            FmkEncryptionMethod::Xor => {
                let mut fmk = Fmk::zeroed();
                xor_into(fmk.as_mut_bytes(), encrypted_fmk, kek.as_bytes());
                fmk
            }
        }
    }
}

impl TryFrom<u8> for FmkEncryptionMethod {
    type Error = Cdoc2Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FmkEncryptionMethod::Xor),
            other => Err(Cdoc2Error::UnsupportedFmkEncryptionMethod(other)),
        }
    }
}

fn xor(a: &[u8; FMK_LEN], b: &[u8; FMK_LEN]) -> [u8; FMK_LEN] {
    let mut out = [0u8; FMK_LEN];
    xor_into(&mut out, a, b);
    out
}

fn xor_into(out: &mut [u8; FMK_LEN], a: &[u8; FMK_LEN], b: &[u8; FMK_LEN]) {
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EllipticCurve {
    Secp256r1 = 1,
}

impl TryFrom<u8> for EllipticCurve {
    type Error = Cdoc2Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(EllipticCurve::Secp256r1),
            other => Err(Cdoc2Error::malformed(format!("unsupported curve {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KdfAlgorithm {
    Pbkdf2HmacSha256 = 1,
}

impl TryFrom<u8> for KdfAlgorithm {
    type Error = Cdoc2Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(KdfAlgorithm::Pbkdf2HmacSha256),
            other => Err(Cdoc2Error::malformed(format!("unsupported KDF algorithm {other}"))),
        }
    }
}

/// Password recipient parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pbkdf2Capsule {
    pub encryption_salt: [u8; SALT_LEN],
    pub password_salt: [u8; SALT_LEN],
    pub kdf_algorithm: KdfAlgorithm,
    pub params: Pbkdf2Params,
}

/// EC recipient parameters. The sender key is ephemeral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcCapsule {
    pub curve: EllipticCurve,
    pub recipient_key: p256::PublicKey,
    pub sender_key: p256::PublicKey,
}

/// RSA recipient parameters: the KEK encrypted with RSA-OAEP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaCapsule {
    recipient_key: RsaPublicKey,
    encrypted_kek: Vec<u8>,
}

impl RsaCapsule {
    pub fn new(recipient_key: RsaPublicKey, encrypted_kek: &[u8]) -> Result<Self> {
        if encrypted_kek.len() != recipient_key.size() {
            return Err(Cdoc2Error::malformed(format!(
                "encrypted KEK is {} bytes, RSA modulus is {}",
                encrypted_kek.len(),
                recipient_key.size()
            )));
        }
        Ok(Self {
            recipient_key,
            encrypted_kek: encrypted_kek.to_vec(),
        })
    }

    pub fn recipient_key(&self) -> &RsaPublicKey {
        &self.recipient_key
    }

    pub fn encrypted_kek(&self) -> &[u8] {
        &self.encrypted_kek
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricKeyCapsule {
    pub salt: [u8; SALT_LEN],
}

/// Recipient whose key material is escrowed on a key capsule server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyServerCapsule {
    recipient_key: PublicKey,
    key_server_id: String,
    transaction_id: String,
}

impl KeyServerCapsule {
    pub fn new(recipient_key: PublicKey, key_server_id: &str, transaction_id: &str) -> Result<Self> {
        if key_server_id.is_empty() {
            return Err(Cdoc2Error::malformed("empty key server id"));
        }
        if transaction_id.is_empty() {
            return Err(Cdoc2Error::malformed("empty capsule transaction id"));
        }
        Ok(Self {
            recipient_key,
            key_server_id: key_server_id.to_string(),
            transaction_id: transaction_id.to_string(),
        })
    }

    pub fn recipient_key(&self) -> &PublicKey {
        &self.recipient_key
    }

    pub fn key_server_id(&self) -> &str {
        &self.key_server_id
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientKind {
    Ec(EcCapsule),
    Rsa(RsaCapsule),
    KeyServer(KeyServerCapsule),
    Symmetric(SymmetricKeyCapsule),
    Pbkdf2(Pbkdf2Capsule),
}

impl RecipientKind {
    pub const TAG_EC: u8 = 1;
    pub const TAG_RSA: u8 = 2;
    pub const TAG_KEY_SERVER: u8 = 3;
    pub const TAG_SYMMETRIC: u8 = 4;
    pub const TAG_PBKDF2: u8 = 5;

    /// Union discriminator written to the header.
    pub fn tag(&self) -> u8 {
        match self {
            RecipientKind::Ec(_) => Self::TAG_EC,
            RecipientKind::Rsa(_) => Self::TAG_RSA,
            RecipientKind::KeyServer(_) => Self::TAG_KEY_SERVER,
            RecipientKind::Symmetric(_) => Self::TAG_SYMMETRIC,
            RecipientKind::Pbkdf2(_) => Self::TAG_PBKDF2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecipientKind::Ec(_) => "EC",
            RecipientKind::Rsa(_) => "RSA",
            RecipientKind::KeyServer(_) => "key server",
            RecipientKind::Symmetric(_) => "symmetric key",
            RecipientKind::Pbkdf2(_) => "password",
        }
    }
}

/// Value a recipient is looked up by.
#[derive(Debug, Clone)]
pub enum RecipientId {
    PublicKey(PublicKey),
    Label(String),
}

impl PartialEq for RecipientId {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RecipientId::PublicKey(a), RecipientId::PublicKey(b)) => a == b,
            (RecipientId::Label(a), RecipientId::Label(b)) => a.as_bytes().ct_eq(b.as_bytes()).into(),
            _ => false,
        }
    }
}

impl Eq for RecipientId {}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipientId::PublicKey(key) => write!(f, "{} {}-bit public key", key.algorithm(), key.bits()),
            RecipientId::Label(label) => write!(f, "label {label:?}"),
        }
    }
}

/// One header entry. Immutable once built.
#[derive(Debug, Clone)]
pub struct Recipient {
    encrypted_fmk: [u8; FMK_LEN],
    key_label: String,
    fmk_method: FmkEncryptionMethod,
    kind: RecipientKind,
}

impl Recipient {
    pub fn new(kind: RecipientKind, key_label: &str, encrypted_fmk: [u8; FMK_LEN]) -> Self {
        Self::with_method(kind, key_label, FmkEncryptionMethod::Xor, encrypted_fmk)
    }

    pub fn with_method(
        kind: RecipientKind,
        key_label: &str,
        fmk_method: FmkEncryptionMethod,
        encrypted_fmk: [u8; FMK_LEN],
    ) -> Self {
        Self {
            encrypted_fmk,
            key_label: key_label.to_string(),
            fmk_method,
            kind,
        }
    }

    /// Build from a length-unchecked wrapped FMK, as read from a header.
    pub fn from_parts(
        kind: RecipientKind,
        key_label: &str,
        fmk_method: FmkEncryptionMethod,
        encrypted_fmk: &[u8],
    ) -> Result<Self> {
        let encrypted_fmk: [u8; FMK_LEN] = encrypted_fmk.try_into().map_err(|_| {
            Cdoc2Error::malformed(format!(
                "encrypted FMK must be {FMK_LEN} bytes, got {}",
                encrypted_fmk.len()
            ))
        })?;
        Ok(Self::with_method(kind, key_label, fmk_method, encrypted_fmk))
    }

    pub fn encrypted_fmk(&self) -> &[u8; FMK_LEN] {
        &self.encrypted_fmk
    }

    pub fn key_label(&self) -> &str {
        &self.key_label
    }

    pub fn fmk_method(&self) -> FmkEncryptionMethod {
        self.fmk_method
    }

    pub fn kind(&self) -> &RecipientKind {
        &self.kind
    }

    /// Public key for key-based recipients, extracted label otherwise.
    pub fn recipient_id(&self) -> RecipientId {
        match &self.kind {
            RecipientKind::Ec(capsule) => RecipientId::PublicKey(PublicKey::Ec(capsule.recipient_key.clone())),
            RecipientKind::Rsa(capsule) => RecipientId::PublicKey(PublicKey::Rsa(capsule.recipient_key.clone())),
            RecipientKind::KeyServer(capsule) => RecipientId::PublicKey(capsule.recipient_key.clone()),
            RecipientKind::Symmetric(_) | RecipientKind::Pbkdf2(_) => {
                RecipientId::Label(label::extract_key_label(&self.key_label))
            }
        }
    }
}

impl PartialEq for Recipient {
    fn eq(&self, other: &Self) -> bool {
        let fmk_eq: bool = self.encrypted_fmk.ct_eq(&other.encrypted_fmk).into();
        fmk_eq
            && self.key_label == other.key_label
            && self.fmk_method == other.fmk_method
            && self.kind == other.kind
    }
}

impl Eq for Recipient {}
