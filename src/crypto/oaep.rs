//! RSA-OAEP (SHA-256) wrapping and PKCS#1 public key encoding.

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Cdoc2Error, Result};

/// Smallest modulus accepted for new keys.
pub const MIN_KEY_BITS: usize = 2048;

/// Encode as an RFC 8017 `RSAPublicKey` DER structure.
pub fn encode_public_key(key: &RsaPublicKey) -> Result<Vec<u8>> {
    key.to_pkcs1_der()
        .map(|der| der.as_bytes().to_vec())
        .map_err(|e| Cdoc2Error::InvalidKeyMaterial(format!("RSA public key encoding: {e}")))
}

pub fn decode_public_key(bytes: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_pkcs1_der(bytes)
        .map_err(|e| Cdoc2Error::malformed(format!("invalid RSA public key: {e}")))
}

pub fn generate_private_key(bits: usize) -> Result<RsaPrivateKey> {
    if bits < MIN_KEY_BITS {
        return Err(Cdoc2Error::InvalidKeyMaterial(format!(
            "RSA keys must be at least {MIN_KEY_BITS} bits"
        )));
    }
    RsaPrivateKey::new(&mut OsRng, bits).map_err(Cdoc2Error::kdf)
}

pub fn encrypt(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>> {
    key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), data)
        .map_err(|e| Cdoc2Error::kdf(format!("RSA-OAEP encryption failed: {e}")))
}

pub fn decrypt(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    key.decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map(Zeroizing::new)
        .map_err(|e| Cdoc2Error::kdf(format!("RSA-OAEP decryption failed: {e}")))
}
