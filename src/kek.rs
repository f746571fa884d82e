//! Per-recipient key encryption key derivation.
//!
//! The encryption side turns [`EncryptionKeyMaterial`] into a fresh KEK and the
//! public parameters stored in the header. The decryption side re-derives the
//! same KEK from a parsed [`Recipient`] and the caller's
//! [`DecryptionKeyMaterial`]. Both dispatch on the (recipient kind, key
//! material) pair.

use tracing::debug;

use crate::capsule::{Capsule, CapsuleError, KeyCapsuleClient};
use crate::crypto::kdf::{self, KEK_INFO, KEK_PREMASTER_SALT};
use crate::crypto::{KEK_LEN, Kek, Pbkdf2Params, ec, generate_salt, oaep, secure_random};
use crate::error::{Cdoc2Error, Result};
use crate::keymaterial::{DecryptionKeyMaterial, DecryptionPayload, EncryptionKeyMaterial, EncryptionPayload};
use crate::keys::{KeyPair, PublicKey};
use crate::recipient::{
    EcCapsule, EllipticCurve, FmkEncryptionMethod, KdfAlgorithm, KeyServerCapsule, Pbkdf2Capsule,
    Recipient, RecipientKind, RsaCapsule, SymmetricKeyCapsule,
};

/// Re-derive the KEK of `recipient` from the caller's key material.
///
/// `key_server` is only consulted for key server recipients.
pub fn derive_kek(
    recipient: &Recipient,
    material: &DecryptionKeyMaterial,
    key_server: Option<&dyn KeyCapsuleClient>,
) -> Result<Kek> {
    let method = recipient.fmk_method();
    debug!(
        recipient = recipient.kind().name(),
        material = material.payload().name(),
        "deriving KEK"
    );

    match (recipient.kind(), material.payload()) {
        (RecipientKind::Ec(capsule), DecryptionPayload::KeyPair(KeyPair::Ec(secret))) => {
            let shared = ec::agreement(secret, &capsule.sender_key);
            ec_kek(&shared[..], &capsule.recipient_key, &capsule.sender_key, method)
        }
        (RecipientKind::Rsa(capsule), DecryptionPayload::KeyPair(KeyPair::Rsa(private))) => {
            rsa_kek(private, capsule.encrypted_kek())
        }
        (RecipientKind::KeyServer(capsule), DecryptionPayload::KeyPair(pair)) => {
            key_server_kek(capsule, pair, method, key_server)
        }
        (RecipientKind::Symmetric(capsule), DecryptionPayload::Secret(secret)) => {
            symmetric_kek(secret.as_bytes(), &capsule.salt, recipient.key_label(), method)
        }
        (RecipientKind::Pbkdf2(capsule), DecryptionPayload::Password(password)) => {
            password_kek(password, capsule, recipient.key_label(), method)
        }
        (kind, payload) => Err(Cdoc2Error::UnsupportedKeyMaterial {
            recipient: kind.name(),
            material: payload.name(),
        }),
    }
}

/// Derive a fresh KEK for `material` and the recipient parameters that let
/// the holder of the matching secret derive it again.
pub fn derive_encryption_kek(
    material: &EncryptionKeyMaterial,
    method: FmkEncryptionMethod,
    pbkdf2: Pbkdf2Params,
    key_server: Option<&dyn KeyCapsuleClient>,
) -> Result<(RecipientKind, Kek)> {
    match (material.payload(), key_server) {
        (EncryptionPayload::PublicKey(key), Some(client)) => {
            key_server_encryption_kek(key, method, client)
        }
        (EncryptionPayload::PublicKey(PublicKey::Ec(recipient_key)), None) => {
            let (sender_key, shared) = ec::ephemeral_agreement(recipient_key);
            let kek = ec_kek(&shared[..], recipient_key, &sender_key, method)?;
            let capsule = EcCapsule {
                curve: EllipticCurve::Secp256r1,
                recipient_key: recipient_key.clone(),
                sender_key,
            };
            Ok((RecipientKind::Ec(capsule), kek))
        }
        (EncryptionPayload::PublicKey(PublicKey::Rsa(recipient_key)), None) => {
            let (kek, encrypted_kek) = random_rsa_kek(recipient_key)?;
            let capsule = RsaCapsule::new(recipient_key.clone(), &encrypted_kek)?;
            Ok((RecipientKind::Rsa(capsule), kek))
        }
        (EncryptionPayload::Secret(secret), _) => {
            let salt = generate_salt()?;
            let kek = symmetric_kek(secret.as_bytes(), &salt, material.label(), method)?;
            Ok((RecipientKind::Symmetric(SymmetricKeyCapsule { salt }), kek))
        }
        (EncryptionPayload::Password(password), _) => {
            pbkdf2.validate()?;
            let capsule = Pbkdf2Capsule {
                encryption_salt: generate_salt()?,
                password_salt: generate_salt()?,
                kdf_algorithm: KdfAlgorithm::Pbkdf2HmacSha256,
                params: pbkdf2,
            };
            let kek = password_kek(password, &capsule, material.label(), method)?;
            Ok((RecipientKind::Pbkdf2(capsule), kek))
        }
    }
}

fn ec_kek(
    shared: &[u8],
    recipient_key: &p256::PublicKey,
    sender_key: &p256::PublicKey,
    method: FmkEncryptionMethod,
) -> Result<Kek> {
    let recipient = ec::encode_public_key(recipient_key);
    let sender = ec::encode_public_key(sender_key);
    kdf::derive_kek(
        KEK_PREMASTER_SALT,
        shared,
        &[KEK_INFO, method.name().as_bytes(), &recipient, &sender],
    )
}

fn symmetric_kek(secret: &[u8], salt: &[u8], label: &str, method: FmkEncryptionMethod) -> Result<Kek> {
    kdf::derive_kek(salt, secret, &[KEK_INFO, method.name().as_bytes(), label.as_bytes()])
}

fn password_kek(
    password: &str,
    capsule: &Pbkdf2Capsule,
    label: &str,
    method: FmkEncryptionMethod,
) -> Result<Kek> {
    match capsule.kdf_algorithm {
        KdfAlgorithm::Pbkdf2HmacSha256 => {
            let password_key = kdf::derive_password_key(password, &capsule.password_salt, capsule.params)?;
            symmetric_kek(&password_key[..], &capsule.encryption_salt, label, method)
        }
    }
}

fn random_rsa_kek(recipient_key: &rsa::RsaPublicKey) -> Result<(Kek, Vec<u8>)> {
    let mut kek = Kek::zeroed();
    secure_random(kek.as_mut_bytes())?;
    let encrypted = oaep::encrypt(recipient_key, kek.as_bytes())?;
    Ok((kek, encrypted))
}

fn rsa_kek(private: &rsa::RsaPrivateKey, encrypted_kek: &[u8]) -> Result<Kek> {
    let decrypted = oaep::decrypt(private, encrypted_kek)?;
    if decrypted.len() != KEK_LEN {
        return Err(Cdoc2Error::kdf(format!(
            "decrypted KEK is {} bytes, expected {KEK_LEN}",
            decrypted.len()
        )));
    }
    let mut kek = Kek::zeroed();
    kek.as_mut_bytes().copy_from_slice(&decrypted);
    Ok(kek)
}

fn key_server_encryption_kek(
    key: &PublicKey,
    method: FmkEncryptionMethod,
    client: &dyn KeyCapsuleClient,
) -> Result<(RecipientKind, Kek)> {
    let (capsule, kek) = match key {
        PublicKey::Ec(recipient_key) => {
            let (sender_key, shared) = ec::ephemeral_agreement(recipient_key);
            let kek = ec_kek(&shared[..], recipient_key, &sender_key, method)?;
            let capsule = Capsule::Ec {
                recipient_key: recipient_key.clone(),
                sender_key,
            };
            (capsule, kek)
        }
        PublicKey::Rsa(recipient_key) => {
            let (kek, encrypted_kek) = random_rsa_kek(recipient_key)?;
            let capsule = Capsule::Rsa {
                recipient_key: recipient_key.clone(),
                encrypted_kek,
            };
            (capsule, kek)
        }
    };

    let transaction_id = client.store_capsule(capsule)?;
    let capsule = KeyServerCapsule::new(key.clone(), client.server_id(), &transaction_id)?;
    Ok((RecipientKind::KeyServer(capsule), kek))
}

fn key_server_kek(
    capsule: &KeyServerCapsule,
    pair: &KeyPair,
    method: FmkEncryptionMethod,
    key_server: Option<&dyn KeyCapsuleClient>,
) -> Result<Kek> {
    let client = key_server.ok_or_else(|| {
        CapsuleError::ServiceUnavailable(format!(
            "no client configured for key server {}",
            capsule.key_server_id()
        ))
    })?;
    if client.server_id() != capsule.key_server_id() {
        return Err(CapsuleError::ServerMismatch {
            expected: capsule.key_server_id().to_string(),
            actual: client.server_id().to_string(),
        }
        .into());
    }

    match (client.fetch_capsule(capsule.transaction_id())?, pair) {
        (
            Capsule::Ec {
                recipient_key,
                sender_key,
            },
            KeyPair::Ec(secret),
        ) => {
            if recipient_key != secret.public_key() {
                return Err(Cdoc2Error::kdf("capsule was issued for a different EC key"));
            }
            let shared = ec::agreement(secret, &sender_key);
            ec_kek(&shared[..], &recipient_key, &sender_key, method)
        }
        (Capsule::Rsa { encrypted_kek, .. }, KeyPair::Rsa(private)) => rsa_kek(private, &encrypted_kek),
        (_, pair) => Err(Cdoc2Error::UnsupportedKeyMaterial {
            recipient: "key server",
            material: match pair {
                KeyPair::Ec(_) => "EC key pair",
                KeyPair::Rsa(_) => "RSA key pair",
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::MemoryKeyCapsuleClient;
    use crate::crypto::FMK_LEN;
    use crate::keys::SecretKey;
    use crate::label::KeyLabelParams;
    use zeroize::Zeroizing;

    fn fast() -> Pbkdf2Params {
        Pbkdf2Params::new(1_000).unwrap()
    }

    fn recipient_for(
        material: &EncryptionKeyMaterial,
        key_server: Option<&dyn KeyCapsuleClient>,
    ) -> (Recipient, Kek) {
        let (kind, kek) =
            derive_encryption_kek(material, FmkEncryptionMethod::Xor, fast(), key_server).unwrap();
        (Recipient::new(kind, material.label(), [0u8; FMK_LEN]), kek)
    }

    fn password(s: &str) -> Zeroizing<String> {
        Zeroizing::new(s.to_string())
    }

    #[test]
    fn password_kek_is_deterministic() {
        let capsule = Pbkdf2Capsule {
            encryption_salt: [1u8; 32],
            password_salt: [2u8; 32],
            kdf_algorithm: KdfAlgorithm::Pbkdf2HmacSha256,
            params: fast(),
        };
        let recipient = Recipient::new(RecipientKind::Pbkdf2(capsule), "alice", [0u8; FMK_LEN]);
        let material = DecryptionKeyMaterial::from_password(password("correct horse"), "alice");

        let a = derive_kek(&recipient, &material, None).unwrap();
        let b = derive_kek(&recipient, &material, None).unwrap();
        assert_eq!(a, b);

        let wrong = DecryptionKeyMaterial::from_password(password("incorrect horse"), "alice");
        assert_ne!(derive_kek(&recipient, &wrong, None).unwrap(), a);
    }

    #[test]
    fn password_sides_agree() {
        let material = EncryptionKeyMaterial::from_password(password("correct horse"), "alice").unwrap();
        let (recipient, kek) = recipient_for(&material, None);

        let decrypt = DecryptionKeyMaterial::from_password(password("correct horse"), "alice");
        assert_eq!(derive_kek(&recipient, &decrypt, None).unwrap(), kek);
    }

    #[test]
    fn ec_sides_agree() {
        let pair = KeyPair::generate_ec();
        let material =
            EncryptionKeyMaterial::from_public_key(pair.public_key(), &KeyLabelParams::public_key("bob", None));
        let (recipient, kek) = recipient_for(&material, None);

        let decrypt = DecryptionKeyMaterial::from_key_pair(pair);
        assert_eq!(derive_kek(&recipient, &decrypt, None).unwrap(), kek);
    }

    #[test]
    fn rsa_sides_agree() {
        let pair = KeyPair::generate_rsa(2048).unwrap();
        let material =
            EncryptionKeyMaterial::from_public_key(pair.public_key(), &KeyLabelParams::public_key("carol", None));
        let (recipient, kek) = recipient_for(&material, None);

        let decrypt = DecryptionKeyMaterial::from_key_pair(pair);
        assert_eq!(derive_kek(&recipient, &decrypt, None).unwrap(), kek);
    }

    #[test]
    fn symmetric_kek_depends_on_label() {
        let secret = SecretKey::new(vec![7u8; 32]).unwrap();
        let material = EncryptionKeyMaterial::from_secret_key(secret.clone(), "team");
        let (recipient, kek) = recipient_for(&material, None);

        assert_ne!(kek.as_bytes(), &[7u8; 32]);
        let decrypt = DecryptionKeyMaterial::from_secret_key("team", secret.clone());
        assert_eq!(derive_kek(&recipient, &decrypt, None).unwrap(), kek);

        let SymmetricKeyCapsule { salt } = match recipient.kind() {
            RecipientKind::Symmetric(capsule) => capsule.clone(),
            other => panic!("unexpected kind {other:?}"),
        };
        let relabelled = Recipient::new(
            RecipientKind::Symmetric(SymmetricKeyCapsule { salt }),
            "other",
            [0u8; FMK_LEN],
        );
        assert_ne!(derive_kek(&relabelled, &decrypt, None).unwrap(), kek);
    }

    #[test]
    fn mismatched_material_is_unsupported() {
        let material = EncryptionKeyMaterial::from_password(password("correct horse"), "alice").unwrap();
        let (recipient, _) = recipient_for(&material, None);

        let secret = DecryptionKeyMaterial::from_secret_key("alice", SecretKey::new(vec![1u8; 32]).unwrap());
        let err = derive_kek(&recipient, &secret, None).unwrap_err();
        assert!(matches!(
            err,
            Cdoc2Error::UnsupportedKeyMaterial {
                recipient: "password",
                material: "secret key"
            }
        ));
    }

    #[test]
    fn key_server_ec_sides_agree() {
        let client = MemoryKeyCapsuleClient::new("ks-1");
        let pair = KeyPair::generate_ec();
        let material = EncryptionKeyMaterial::from_eid(pair.public_key(), "MARI", "PNOEE-2");
        let (recipient, kek) = recipient_for(&material, Some(&client));

        let RecipientKind::KeyServer(capsule) = recipient.kind() else {
            panic!("expected key server recipient");
        };
        assert_eq!(capsule.key_server_id(), "ks-1");
        assert_eq!(client.len(), 1);

        let decrypt = DecryptionKeyMaterial::from_key_pair(pair);
        assert_eq!(derive_kek(&recipient, &decrypt, Some(&client)).unwrap(), kek);
    }

    #[test]
    fn key_server_requires_matching_client() {
        let client = MemoryKeyCapsuleClient::new("ks-1");
        let pair = KeyPair::generate_ec();
        let material = EncryptionKeyMaterial::from_eid(pair.public_key(), "MARI", "PNOEE-2");
        let (recipient, _) = recipient_for(&material, Some(&client));
        let decrypt = DecryptionKeyMaterial::from_key_pair(pair);

        assert!(matches!(
            derive_kek(&recipient, &decrypt, None),
            Err(Cdoc2Error::Capsule(CapsuleError::ServiceUnavailable(_)))
        ));

        let other = MemoryKeyCapsuleClient::new("ks-2");
        assert!(matches!(
            derive_kek(&recipient, &decrypt, Some(&other)),
            Err(Cdoc2Error::Capsule(CapsuleError::ServerMismatch { .. }))
        ));
    }
}
