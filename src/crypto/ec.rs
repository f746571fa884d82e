//! P-256 key agreement and SEC1 point encoding.

use p256::ecdh::{EphemeralSecret, diffie_hellman};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::{Cdoc2Error, Result};

/// Uncompressed SEC1 point length for P-256.
pub const EC_PUBLIC_KEY_LEN: usize = 65;
/// Length of the ECDH shared secret (x coordinate).
pub const SHARED_SECRET_LEN: usize = 32;

pub fn encode_public_key(key: &PublicKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes().to_vec()
}

pub fn decode_public_key(bytes: &[u8]) -> Result<PublicKey> {
    if bytes.len() != EC_PUBLIC_KEY_LEN {
        return Err(Cdoc2Error::malformed(format!(
            "EC public key must be {EC_PUBLIC_KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    PublicKey::from_sec1_bytes(bytes).map_err(|_| Cdoc2Error::malformed("invalid EC public key"))
}

pub fn generate_secret_key() -> SecretKey {
    SecretKey::random(&mut OsRng)
}

/// ECDH against `recipient` with a fresh ephemeral key.
///
/// Returns the ephemeral public key and the shared x coordinate.
pub fn ephemeral_agreement(
    recipient: &PublicKey,
) -> (PublicKey, Zeroizing<[u8; SHARED_SECRET_LEN]>) {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let shared = ephemeral.diffie_hellman(recipient);

    let mut secret = Zeroizing::new([0u8; SHARED_SECRET_LEN]);
    secret.copy_from_slice(shared.raw_secret_bytes());
    (ephemeral.public_key(), secret)
}

/// ECDH between the recipient's static key and the sender's ephemeral key.
pub fn agreement(secret: &SecretKey, sender: &PublicKey) -> Zeroizing<[u8; SHARED_SECRET_LEN]> {
    let shared = diffie_hellman(secret.to_nonzero_scalar(), sender.as_affine());

    let mut out = Zeroizing::new([0u8; SHARED_SECRET_LEN]);
    out.copy_from_slice(shared.raw_secret_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree() {
        let recipient = generate_secret_key();
        let (sender, encrypt_side) = ephemeral_agreement(&recipient.public_key());
        let decrypt_side = agreement(&recipient, &sender);

        assert_eq!(*encrypt_side, *decrypt_side);
    }

    #[test]
    fn public_key_encoding_roundtrip() {
        let key = generate_secret_key().public_key();
        let bytes = encode_public_key(&key);

        assert_eq!(bytes.len(), EC_PUBLIC_KEY_LEN);
        assert_eq!(bytes[0], 0x04);
        assert_eq!(decode_public_key(&bytes).unwrap(), key);
    }

    #[test]
    fn rejects_point_not_on_curve() {
        let mut bytes = [0u8; EC_PUBLIC_KEY_LEN];
        bytes[0] = 0x04;
        bytes[64] = 1;
        assert!(decode_public_key(&bytes).is_err());
    }

    #[test]
    fn rejects_compressed_point() {
        let key = generate_secret_key().public_key();
        let compressed = key.to_encoded_point(true);
        assert!(decode_public_key(compressed.as_bytes()).is_err());
    }
}
