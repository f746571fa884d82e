use super::{CEK_LEN, NONCE_LEN, SALT_LEN};
use crate::error::{Cdoc2Error, Result};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use getrandom::fill;
use zeroize::Zeroizing;

/// Fill buffer with cryptographically secure random bytes
pub fn secure_random(buf: &mut [u8]) -> Result<()> {
    fill(buf).map_err(|_| Cdoc2Error::Random)
}

/// Generate salt
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    secure_random(&mut salt)?;
    Ok(salt)
}

/// Encrypt payload, returning `nonce || ciphertext`.
///
/// `aad` binds the ciphertext to the container prefix (magic, version,
/// header and header HMAC).
pub fn encrypt_payload(cek: &[u8; CEK_LEN], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(cek));

    let mut nonce = [0u8; NONCE_LEN];
    secure_random(&mut nonce)?;

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Cdoc2Error::InvalidContainer("payload encryption failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt `nonce || ciphertext` produced by [`encrypt_payload`].
pub fn decrypt_payload(
    cek: &[u8; CEK_LEN],
    aad: &[u8],
    payload: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if payload.len() < NONCE_LEN {
        return Err(Cdoc2Error::InvalidContainer("payload too short".into()));
    }
    let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(cek));

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| Cdoc2Error::PayloadDecryptionFailed)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salts_are_random() {
        assert_ne!(generate_salt().unwrap(), generate_salt().unwrap());
    }

    #[test]
    fn payload_roundtrip() {
        let cek = [9u8; CEK_LEN];
        let payload = encrypt_payload(&cek, b"prefix", b"hello container").unwrap();
        assert_eq!(payload.len(), NONCE_LEN + b"hello container".len() + 16);

        let plaintext = decrypt_payload(&cek, b"prefix", &payload).unwrap();
        assert_eq!(plaintext.as_slice(), b"hello container");
    }

    #[test]
    fn payload_bound_to_aad() {
        let cek = [9u8; CEK_LEN];
        let payload = encrypt_payload(&cek, b"prefix", b"data").unwrap();

        assert!(matches!(
            decrypt_payload(&cek, b"other", &payload),
            Err(Cdoc2Error::PayloadDecryptionFailed)
        ));
    }

    #[test]
    fn truncated_payload_fails() {
        let cek = [1u8; CEK_LEN];
        assert!(decrypt_payload(&cek, b"", &[0u8; 4]).is_err());
    }
}
