//! FMK wrapping for a set of recipients and unwrapping by any one of them.

use tracing::{debug, warn};

use crate::capsule::KeyCapsuleClient;
use crate::crypto::{Fmk, Pbkdf2Params};
use crate::error::{Cdoc2Error, Result};
use crate::kek::{derive_encryption_kek, derive_kek};
use crate::keymaterial::{DecryptionKeyMaterial, EncryptionKeyMaterial};
use crate::recipient::{FmkEncryptionMethod, Recipient};

/// Encryption-time settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeOptions {
    pub pbkdf2: Pbkdf2Params,
}

impl EnvelopeOptions {
    pub fn with_pbkdf2(pbkdf2: Pbkdf2Params) -> Self {
        Self { pbkdf2 }
    }
}

/// Wrap `fmk` once per key material, preserving order.
///
/// Public keys become key server recipients when `key_server` is given.
pub fn wrap_fmk(
    fmk: &Fmk,
    materials: &[EncryptionKeyMaterial],
    options: &EnvelopeOptions,
    key_server: Option<&dyn KeyCapsuleClient>,
) -> Result<Vec<Recipient>> {
    if materials.is_empty() {
        return Err(Cdoc2Error::NoRecipients);
    }

    let method = FmkEncryptionMethod::Xor;
    let mut recipients = Vec::with_capacity(materials.len());
    for material in materials {
        let (kind, kek) = derive_encryption_kek(material, method, options.pbkdf2, key_server)?;
        debug!(recipient = kind.name(), label = material.label(), "FMK wrapped");
        recipients.push(Recipient::with_method(
            kind,
            material.label(),
            method,
            method.wrap(fmk, &kek),
        ));
    }
    Ok(recipients)
}

/// Recover the FMK from the first recipient that both matches `material`
/// and yields a candidate accepted by `verify`.
///
/// Every identity match is tried, since labels may collide. Per-candidate
/// failures are logged and skipped. When nothing verifies, a key server
/// failure is returned as [`Cdoc2Error::Capsule`], and a material that fits
/// none of the matching records as [`Cdoc2Error::UnsupportedKeyMaterial`].
/// Otherwise the error is [`Cdoc2Error::NoMatchingRecipient`].
pub fn unwrap_fmk<F>(
    recipients: &[Recipient],
    material: &DecryptionKeyMaterial,
    key_server: Option<&dyn KeyCapsuleClient>,
    mut verify: F,
) -> Result<Fmk>
where
    F: FnMut(&Fmk) -> bool,
{
    let wanted = material.recipient_id();
    let mut capsule_failure = None;
    let mut unsupported = None;
    let mut attempted = false;

    for (index, recipient) in recipients.iter().enumerate() {
        if recipient.recipient_id() != *wanted {
            continue;
        }

        let kek = match derive_kek(recipient, material, key_server) {
            Ok(kek) => kek,
            Err(e) => {
                warn!(index, recipient = recipient.kind().name(), error = %e, "skipping recipient");
                match e {
                    Cdoc2Error::Capsule(_) => capsule_failure = Some(e),
                    Cdoc2Error::UnsupportedKeyMaterial { .. } => unsupported = Some(e),
                    _ => attempted = true,
                }
                continue;
            }
        };

        attempted = true;
        let candidate = recipient.fmk_method().unwrap(recipient.encrypted_fmk(), &kek);
        if verify(&candidate) {
            debug!(index, recipient = recipient.kind().name(), "FMK recovered");
            return Ok(candidate);
        }
        debug!(index, "candidate FMK rejected");
    }

    if let Some(e) = capsule_failure {
        return Err(e);
    }
    match unsupported {
        Some(e) if !attempted => Err(e),
        _ => Err(Cdoc2Error::NoMatchingRecipient),
    }
}
