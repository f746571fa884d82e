//! CDOC2 container envelope.
//!
//! A payload is encrypted once under a random File Master Key (FMK). The FMK
//! is wrapped separately for every recipient, each with its own Key Encryption
//! Key (KEK) derived from a password, a pre-shared secret, an EC or RSA public
//! key, or a capsule escrowed on a key server. Anyone holding the container and
//! one matching secret recovers the FMK; the header HMAC confirms the unwrap.
//!
//! ```no_run
//! use cdoc2::{DecryptionKeyMaterial, EncryptionKeyMaterial, EnvelopeOptions};
//! use zeroize::Zeroizing;
//!
//! let material =
//!     EncryptionKeyMaterial::from_password(Zeroizing::new("correct horse".into()), "alice")?;
//! let container = cdoc2::encrypt(b"hello", &[material], &EnvelopeOptions::default(), None)?;
//!
//! let key = DecryptionKeyMaterial::from_password(Zeroizing::new("correct horse".into()), "alice");
//! let plaintext = cdoc2::decrypt(&container, &key, None)?;
//! assert_eq!(plaintext.as_slice(), b"hello");
//! # Ok::<(), cdoc2::Cdoc2Error>(())
//! ```

pub mod capsule;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod format;
pub mod kek;
pub mod keymaterial;
pub mod keys;
pub mod label;
pub mod recipient;
mod storage;

pub use crate::capsule::{Capsule, CapsuleError, KeyCapsuleClient, MemoryKeyCapsuleClient};
pub use crate::crypto::{Fmk, Kek, Pbkdf2Params};
pub use crate::envelope::{EnvelopeOptions, unwrap_fmk, wrap_fmk};
pub use crate::error::{Cdoc2Error, Result};
pub use crate::format::Header;
pub use crate::kek::derive_kek;
pub use crate::keymaterial::{
    DecryptionKeyMaterial, DecryptionPayload, EncryptionKeyMaterial, EncryptionKeyOrigin,
    EncryptionPayload,
};
pub use crate::keys::{KeyPair, PublicKey, SecretKey};
pub use crate::label::{KeyLabelParams, KeyLabelType};
pub use crate::recipient::{FmkEncryptionMethod, Recipient, RecipientId, RecipientKind};
pub use crate::storage::Storage;

use tracing::info;
use zeroize::Zeroizing;

use crate::format::ContainerFile;

/// Encrypt `payload` for every entry of `materials`.
///
/// With a `key_server`, public key recipients are escrowed as capsules on it.
///
/// # Errors
///
/// `NoRecipients` for an empty list, or the first key material that cannot be
/// turned into a recipient.
pub fn encrypt(
    payload: &[u8],
    materials: &[EncryptionKeyMaterial],
    options: &EnvelopeOptions,
    key_server: Option<&dyn KeyCapsuleClient>,
) -> Result<Vec<u8>> {
    let fmk = crypto::generate_fmk()?;
    let recipients = wrap_fmk(&fmk, materials, options, key_server)?;

    let header = Header::new(recipients).to_bytes()?;
    let header_hmac = crypto::header_hmac(&fmk, &header)?;
    let mut container = ContainerFile::new(header, header_hmac, Vec::new());

    let cek = crypto::derive_cek(&fmk)?;
    let aad = container.authenticated_prefix()?;
    container.set_payload(crypto::encrypt_payload(&cek, &aad, payload)?);

    let bytes = format::serialize(&container)?;
    info!(recipients = materials.len(), bytes = bytes.len(), "container encrypted");
    Ok(bytes)
}

/// Decrypt a container with one piece of key material.
///
/// # Errors
///
/// `InvalidContainer`/`MalformedHeader` for broken framing, `NoMatchingRecipient`
/// when no recipient opens with `material`, `Capsule` when the key server
/// cannot supply a capsule, `UnsupportedKeyMaterial` when `material` fits none
/// of the recipients carrying its id, `PayloadDecryptionFailed` when the
/// payload fails authentication.
pub fn decrypt(
    container: &[u8],
    material: &DecryptionKeyMaterial,
    key_server: Option<&dyn KeyCapsuleClient>,
) -> Result<Zeroizing<Vec<u8>>> {
    let container = format::parse(container)?;
    let header = Header::from_bytes(container.header())?;

    let fmk = unwrap_fmk(header.recipients(), material, key_server, |candidate| {
        crypto::verify_header_hmac(candidate, container.header(), container.header_hmac())
    })?;

    let cek = crypto::derive_cek(&fmk)?;
    let aad = container.authenticated_prefix()?;
    let plaintext = crypto::decrypt_payload(&cek, &aad, container.payload())?;

    info!(bytes = plaintext.len(), "container decrypted");
    Ok(plaintext)
}

/// Recipients of a container, without decrypting anything.
pub fn read_recipients(container: &[u8]) -> Result<Vec<Recipient>> {
    let container = format::parse(container)?;
    Ok(Header::from_bytes(container.header())?.into_recipients())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> EnvelopeOptions {
        EnvelopeOptions::with_pbkdf2(Pbkdf2Params::new(1_000).unwrap())
    }

    fn password(s: &str) -> Zeroizing<String> {
        Zeroizing::new(s.to_string())
    }

    #[test]
    fn password_container_roundtrip() {
        let material = EncryptionKeyMaterial::from_password(password("correct horse"), "alice").unwrap();
        let container = encrypt(b"secret data", &[material], &fast(), None).unwrap();

        let key = DecryptionKeyMaterial::from_password(password("correct horse"), "alice");
        let plaintext = decrypt(&container, &key, None).unwrap();
        assert_eq!(plaintext.as_slice(), b"secret data");
    }

    #[test]
    fn wrong_password_fails() {
        let material = EncryptionKeyMaterial::from_password(password("correct horse"), "alice").unwrap();
        let container = encrypt(b"secret data", &[material], &fast(), None).unwrap();

        let key = DecryptionKeyMaterial::from_password(password("battery staple"), "alice");
        assert!(matches!(
            decrypt(&container, &key, None),
            Err(Cdoc2Error::NoMatchingRecipient)
        ));
    }

    #[test]
    fn header_tampering_is_detected() {
        let secret = SecretKey::new(vec![5u8; 32]).unwrap();
        let material = EncryptionKeyMaterial::from_secret_key(secret.clone(), "team");
        let mut container = encrypt(b"payload", &[material], &fast(), None).unwrap();

        // flip a bit of the wrapped FMK inside the first record
        let wrapped_fmk_offset = 9 + 3 + 1 + 4 + 1 + 2;
        container[wrapped_fmk_offset] ^= 0x01;

        let key = DecryptionKeyMaterial::from_secret_key("team", secret);
        assert!(matches!(
            decrypt(&container, &key, None),
            Err(Cdoc2Error::NoMatchingRecipient)
        ));
    }

    #[test]
    fn payload_tampering_is_detected() {
        let secret = SecretKey::new(vec![5u8; 32]).unwrap();
        let material = EncryptionKeyMaterial::from_secret_key(secret.clone(), "team");
        let mut container = encrypt(b"payload", &[material], &fast(), None).unwrap();

        let last = container.len() - 1;
        container[last] ^= 0x80;

        let key = DecryptionKeyMaterial::from_secret_key("team", secret);
        assert!(matches!(
            decrypt(&container, &key, None),
            Err(Cdoc2Error::PayloadDecryptionFailed)
        ));
    }

    #[test]
    fn recipients_are_listed_in_order() {
        let pair = KeyPair::generate_ec();
        let materials = vec![
            EncryptionKeyMaterial::from_eid(pair.public_key(), "MARI", "PNOEE-1"),
            EncryptionKeyMaterial::from_password(password("correct horse"), "alice").unwrap(),
        ];
        let container = encrypt(b"", &materials, &fast(), None).unwrap();

        let recipients = read_recipients(&container).unwrap();
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[0].kind().name(), "EC");
        assert_eq!(recipients[0].recipient_id(), RecipientId::PublicKey(pair.public_key()));
        assert_eq!(recipients[1].key_label(), "alice");
    }

    #[test]
    fn key_server_container_roundtrip() {
        let client = MemoryKeyCapsuleClient::new("ks-test");
        let pair = KeyPair::generate_ec();
        let material = EncryptionKeyMaterial::from_eid(pair.public_key(), "MARI", "PNOEE-1");
        let container = encrypt(b"escrowed", &[material], &fast(), Some(&client)).unwrap();

        let key = DecryptionKeyMaterial::from_key_pair(pair);
        assert_eq!(decrypt(&container, &key, Some(&client)).unwrap().as_slice(), b"escrowed");
        assert!(matches!(
            decrypt(&container, &key, None),
            Err(Cdoc2Error::Capsule(CapsuleError::ServiceUnavailable(_)))
        ));
    }

    struct OfflineKeyServer;

    impl KeyCapsuleClient for OfflineKeyServer {
        fn server_id(&self) -> &str {
            "ks-test"
        }

        fn store_capsule(&self, _capsule: Capsule) -> std::result::Result<String, CapsuleError> {
            Err(CapsuleError::ServiceUnavailable("503".into()))
        }

        fn fetch_capsule(&self, _transaction_id: &str) -> std::result::Result<Capsule, CapsuleError> {
            Err(CapsuleError::ServiceUnavailable("503".into()))
        }
    }

    #[test]
    fn unreachable_key_server_is_not_a_wrong_key() {
        let client = MemoryKeyCapsuleClient::new("ks-test");
        let pair = KeyPair::generate_ec();
        let material = EncryptionKeyMaterial::from_eid(pair.public_key(), "MARI", "PNOEE-1");
        let container = encrypt(b"escrowed", &[material], &fast(), Some(&client)).unwrap();

        let key = DecryptionKeyMaterial::from_key_pair(pair);
        assert!(matches!(
            decrypt(&container, &key, Some(&OfflineKeyServer)),
            Err(Cdoc2Error::Capsule(CapsuleError::ServiceUnavailable(msg))) if msg == "503"
        ));
    }
}
