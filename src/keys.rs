//! Asymmetric and symmetric key types accepted by the envelope.

use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::{ec, oaep};
use crate::error::{Cdoc2Error, Result};

/// Minimum length of a pre-shared symmetric secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Recipient public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Ec(p256::PublicKey),
    Rsa(RsaPublicKey),
}

impl PublicKey {
    /// Header encoding: SEC1 uncompressed point for EC, PKCS#1 DER for RSA.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            PublicKey::Ec(key) => Ok(ec::encode_public_key(key)),
            PublicKey::Rsa(key) => oaep::encode_public_key(key),
        }
    }

    pub fn algorithm(&self) -> &'static str {
        match self {
            PublicKey::Ec(_) => "EC",
            PublicKey::Rsa(_) => "RSA",
        }
    }

    /// Key size in bits.
    pub fn bits(&self) -> usize {
        match self {
            PublicKey::Ec(_) => 256,
            PublicKey::Rsa(key) => key.size() * 8,
        }
    }

    /// Load an SPKI (`PUBLIC KEY`) or PKCS#1 (`RSA PUBLIC KEY`) PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        if let Ok(key) = p256::PublicKey::from_public_key_pem(pem) {
            return Ok(PublicKey::Ec(key));
        }
        if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
            return Ok(PublicKey::Rsa(key));
        }
        if let Ok(key) = RsaPublicKey::from_pkcs1_pem(pem) {
            return Ok(PublicKey::Rsa(key));
        }
        Err(Cdoc2Error::InvalidKeyMaterial(
            "unsupported public key PEM (expected P-256 or RSA)".into(),
        ))
    }

    pub fn to_pem(&self) -> Result<String> {
        let pem = match self {
            PublicKey::Ec(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::Rsa(key) => key.to_public_key_pem(LineEnding::LF),
        };
        pem.map_err(|e| Cdoc2Error::InvalidKeyMaterial(format!("PEM encoding failed: {e}")))
    }
}

impl From<p256::PublicKey> for PublicKey {
    fn from(key: p256::PublicKey) -> Self {
        PublicKey::Ec(key)
    }
}

impl From<RsaPublicKey> for PublicKey {
    fn from(key: RsaPublicKey) -> Self {
        PublicKey::Rsa(key)
    }
}

/// Recipient private key together with its public half.
#[derive(Clone)]
pub enum KeyPair {
    Ec(p256::SecretKey),
    Rsa(RsaPrivateKey),
}

impl KeyPair {
    pub fn generate_ec() -> Self {
        KeyPair::Ec(ec::generate_secret_key())
    }

    pub fn generate_rsa(bits: usize) -> Result<Self> {
        oaep::generate_private_key(bits).map(KeyPair::Rsa)
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            KeyPair::Ec(secret) => PublicKey::Ec(secret.public_key()),
            KeyPair::Rsa(private) => PublicKey::Rsa(private.to_public_key()),
        }
    }

    /// Load a PKCS#8 (`PRIVATE KEY`), SEC1 (`EC PRIVATE KEY`) or PKCS#1
    /// (`RSA PRIVATE KEY`) PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        if let Ok(key) = p256::SecretKey::from_pkcs8_pem(pem) {
            return Ok(KeyPair::Ec(key));
        }
        if let Ok(key) = p256::SecretKey::from_sec1_pem(pem) {
            return Ok(KeyPair::Ec(key));
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
            return Ok(KeyPair::Rsa(key));
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs1_pem(pem) {
            return Ok(KeyPair::Rsa(key));
        }
        Err(Cdoc2Error::InvalidKeyMaterial(
            "unsupported private key PEM (expected P-256 or RSA)".into(),
        ))
    }

    /// PKCS#8 PEM encoding of the private key.
    pub fn to_pem(&self) -> Result<Zeroizing<String>> {
        let pem = match self {
            KeyPair::Ec(key) => key.to_pkcs8_pem(LineEnding::LF),
            KeyPair::Rsa(key) => key.to_pkcs8_pem(LineEnding::LF),
        };
        pem.map_err(|e| Cdoc2Error::InvalidKeyMaterial(format!("PEM encoding failed: {e}")))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

impl From<p256::SecretKey> for KeyPair {
    fn from(key: p256::SecretKey) -> Self {
        KeyPair::Ec(key)
    }
}

impl From<RsaPrivateKey> for KeyPair {
    fn from(key: RsaPrivateKey) -> Self {
        KeyPair::Rsa(key)
    }
}

/// Pre-shared symmetric secret. Zeroed on drop.
#[derive(Clone)]
pub struct SecretKey(Zeroizing<Vec<u8>>);

impl SecretKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        let bytes = Zeroizing::new(bytes);
        if bytes.len() < MIN_SECRET_LEN {
            return Err(Cdoc2Error::InvalidKeyMaterial(format!(
                "secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice().ct_eq(other.0.as_slice()).into()
    }
}

impl Eq for SecretKey {}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([hidden; {}])", self.0.len())
    }
}
