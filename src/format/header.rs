//! Binary recipient header.
//!
//! Header Format (big-endian, `bytes16`/`str16` are a u16 length followed by
//! that many bytes):
//! ```text
//! HEADER := PAYLOAD_METHOD (1) | COUNT (2) | RECORD * COUNT
//! RECORD := TAG (1) | BODY_LEN (4) | BODY
//! BODY   := FMK_METHOD (1) | ENC_FMK bytes16 | KEY_LABEL str16 | CAPSULE | ignored tail
//!
//! TAG 1 EC        : CURVE (1) | RECIPIENT_KEY bytes16 | SENDER_KEY bytes16
//! TAG 2 RSA       : RECIPIENT_KEY bytes16 | ENCRYPTED_KEK bytes16
//! TAG 3 KEY SERVER: KEY_KIND (1) | [CURVE (1)] | RECIPIENT_KEY bytes16 | SERVER_ID str16 | TRANSACTION_ID str16
//! TAG 4 SYMMETRIC : SALT bytes16
//! TAG 5 PBKDF2    : ENCRYPTION_SALT bytes16 | PASSWORD_SALT bytes16 | KDF_ALG (1) | ITERATIONS (4)
//! ```
//!
//! Records with an unknown tag or FMK method are skipped, so newer writers can
//! add recipient kinds without breaking older readers.

use tracing::warn;

use crate::crypto::{Pbkdf2Params, SALT_LEN, ec, oaep};
use crate::error::{Cdoc2Error, Result};
use crate::keys::PublicKey;
use crate::recipient::{
    EcCapsule, EllipticCurve, FmkEncryptionMethod, KdfAlgorithm, KeyServerCapsule, Pbkdf2Capsule,
    Recipient, RecipientKind, RsaCapsule, SymmetricKeyCapsule,
};

const KEY_KIND_EC: u8 = 1;
const KEY_KIND_RSA: u8 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadEncryptionMethod {
    #[default]
    ChaCha20Poly1305 = 1,
}

impl TryFrom<u8> for PayloadEncryptionMethod {
    type Error = Cdoc2Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PayloadEncryptionMethod::ChaCha20Poly1305),
            other => Err(Cdoc2Error::malformed(format!("unsupported payload method {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    payload_method: PayloadEncryptionMethod,
    recipients: Vec<Recipient>,
}

impl Header {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self {
            payload_method: PayloadEncryptionMethod::default(),
            recipients,
        }
    }

    pub fn payload_method(&self) -> PayloadEncryptionMethod {
        self.payload_method
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    pub fn into_recipients(self) -> Vec<Recipient> {
        self.recipients
    }

    /// Serialize in recipient order.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let count = u16::try_from(self.recipients.len())
            .map_err(|_| Cdoc2Error::malformed("too many recipients"))?;

        let mut buf = Vec::new();
        buf.push(self.payload_method as u8);
        buf.extend_from_slice(&count.to_be_bytes());

        for recipient in &self.recipients {
            let body = encode_body(recipient)?;
            let body_len = u32::try_from(body.len())
                .map_err(|_| Cdoc2Error::malformed("recipient record too large"))?;

            buf.push(recipient.kind().tag());
            buf.extend_from_slice(&body_len.to_be_bytes());
            buf.extend_from_slice(&body);
        }

        Ok(buf)
    }

    /// Parse a header, skipping records this reader does not understand.
    ///
    /// # Errors
    ///
    /// Returns `MalformedHeader` on truncation, trailing bytes, or a known
    /// record with invalid contents.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);

        let payload_method = PayloadEncryptionMethod::try_from(r.u8()?)?;
        let count = r.u16()?;

        let mut recipients = Vec::new();
        for index in 0..count {
            let tag = r.u8()?;
            let body_len = r.u32()? as usize;
            let body = r.take(body_len)?;

            match decode_record(tag, body) {
                Ok(recipient) => recipients.push(recipient),
                Err(e) if e.is_recoverable() => {
                    warn!(index, tag, error = %e, "skipping recipient record");
                }
                Err(e) => return Err(e),
            }
        }

        if !r.is_empty() {
            return Err(Cdoc2Error::malformed(format!(
                "{} trailing bytes after last record",
                r.remaining()
            )));
        }

        Ok(Self {
            payload_method,
            recipients,
        })
    }
}

fn encode_body(recipient: &Recipient) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.push(recipient.fmk_method() as u8);
    put_bytes16(&mut buf, recipient.encrypted_fmk())?;
    put_bytes16(&mut buf, recipient.key_label().as_bytes())?;

    match recipient.kind() {
        RecipientKind::Ec(capsule) => {
            buf.push(capsule.curve as u8);
            put_bytes16(&mut buf, &ec::encode_public_key(&capsule.recipient_key))?;
            put_bytes16(&mut buf, &ec::encode_public_key(&capsule.sender_key))?;
        }
        RecipientKind::Rsa(capsule) => {
            put_bytes16(&mut buf, &oaep::encode_public_key(capsule.recipient_key())?)?;
            put_bytes16(&mut buf, capsule.encrypted_kek())?;
        }
        RecipientKind::KeyServer(capsule) => {
            match capsule.recipient_key() {
                PublicKey::Ec(_) => {
                    buf.push(KEY_KIND_EC);
                    buf.push(EllipticCurve::Secp256r1 as u8);
                }
                PublicKey::Rsa(_) => buf.push(KEY_KIND_RSA),
            }
            put_bytes16(&mut buf, &capsule.recipient_key().to_bytes()?)?;
            put_bytes16(&mut buf, capsule.key_server_id().as_bytes())?;
            put_bytes16(&mut buf, capsule.transaction_id().as_bytes())?;
        }
        RecipientKind::Symmetric(capsule) => {
            put_bytes16(&mut buf, &capsule.salt)?;
        }
        RecipientKind::Pbkdf2(capsule) => {
            put_bytes16(&mut buf, &capsule.encryption_salt)?;
            put_bytes16(&mut buf, &capsule.password_salt)?;
            buf.push(capsule.kdf_algorithm as u8);
            buf.extend_from_slice(&capsule.params.iterations().to_be_bytes());
        }
    }

    Ok(buf)
}

fn decode_record(tag: u8, body: &[u8]) -> Result<Recipient> {
    if !(RecipientKind::TAG_EC..=RecipientKind::TAG_PBKDF2).contains(&tag) {
        return Err(Cdoc2Error::UnknownRecipientVariant(tag));
    }

    let mut r = Reader::new(body);
    let fmk_method = FmkEncryptionMethod::try_from(r.u8()?)?;
    let encrypted_fmk = r.bytes16()?;
    let key_label = r.str16()?;

    let kind = match tag {
        RecipientKind::TAG_EC => {
            let curve = EllipticCurve::try_from(r.u8()?)?;
            RecipientKind::Ec(EcCapsule {
                curve,
                recipient_key: ec::decode_public_key(r.bytes16()?)?,
                sender_key: ec::decode_public_key(r.bytes16()?)?,
            })
        }
        RecipientKind::TAG_RSA => {
            let recipient_key = oaep::decode_public_key(r.bytes16()?)?;
            RecipientKind::Rsa(RsaCapsule::new(recipient_key, r.bytes16()?)?)
        }
        RecipientKind::TAG_KEY_SERVER => {
            let recipient_key = match r.u8()? {
                KEY_KIND_EC => {
                    EllipticCurve::try_from(r.u8()?)?;
                    PublicKey::Ec(ec::decode_public_key(r.bytes16()?)?)
                }
                KEY_KIND_RSA => PublicKey::Rsa(oaep::decode_public_key(r.bytes16()?)?),
                other => return Err(Cdoc2Error::malformed(format!("unknown key kind {other}"))),
            };
            let server_id = r.str16()?;
            let transaction_id = r.str16()?;
            RecipientKind::KeyServer(KeyServerCapsule::new(recipient_key, server_id, transaction_id)?)
        }
        RecipientKind::TAG_SYMMETRIC => RecipientKind::Symmetric(SymmetricKeyCapsule { salt: r.salt()? }),
        _ => {
            let encryption_salt = r.salt()?;
            let password_salt = r.salt()?;
            let kdf_algorithm = KdfAlgorithm::try_from(r.u8()?)?;
            let iterations = r.u32()?;
            let params = Pbkdf2Params::new(iterations)
                .map_err(|_| Cdoc2Error::malformed(format!("PBKDF2 iterations {iterations} out of range")))?;
            RecipientKind::Pbkdf2(Pbkdf2Capsule {
                encryption_salt,
                password_salt,
                kdf_algorithm,
                params,
            })
        }
    };

    Recipient::from_parts(kind, key_label, fmk_method, encrypted_fmk)
}

fn put_bytes16(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len = u16::try_from(bytes.len())
        .map_err(|_| Cdoc2Error::malformed(format!("field of {} bytes too long", bytes.len())))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Cdoc2Error::malformed(format!(
                "truncated: wanted {len} bytes at offset {}, {} left",
                self.offset,
                self.remaining()
            )));
        }
        let data = self.data;
        let out = &data[self.offset..self.offset + len];
        self.offset += len;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        b.copy_from_slice(self.take(2)?);
        Ok(u16::from_be_bytes(b))
    }

    fn u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(b))
    }

    fn bytes16(&mut self) -> Result<&'a [u8]> {
        let len = self.u16()?;
        self.take(usize::from(len))
    }

    fn str16(&mut self) -> Result<&'a str> {
        std::str::from_utf8(self.bytes16()?).map_err(|_| Cdoc2Error::malformed("string is not UTF-8"))
    }

    fn salt(&mut self) -> Result<[u8; SALT_LEN]> {
        let bytes = self.bytes16()?;
        bytes.try_into().map_err(|_| {
            Cdoc2Error::malformed(format!("salt must be {SALT_LEN} bytes, got {}", bytes.len()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FMK_LEN;
    use crate::keys::KeyPair;

    fn symmetric(label: &str, fill: u8) -> Recipient {
        Recipient::new(
            RecipientKind::Symmetric(SymmetricKeyCapsule { salt: [fill; SALT_LEN] }),
            label,
            [fill; FMK_LEN],
        )
    }

    fn password(label: &str) -> Recipient {
        Recipient::new(
            RecipientKind::Pbkdf2(Pbkdf2Capsule {
                encryption_salt: [1u8; SALT_LEN],
                password_salt: [2u8; SALT_LEN],
                kdf_algorithm: KdfAlgorithm::Pbkdf2HmacSha256,
                params: Pbkdf2Params::default(),
            }),
            label,
            [3u8; FMK_LEN],
        )
    }

    /// Append a raw record and bump the record count.
    fn push_raw_record(header: &mut Vec<u8>, tag: u8, body: &[u8]) {
        let count = u16::from_be_bytes([header[1], header[2]]) + 1;
        header[1..3].copy_from_slice(&count.to_be_bytes());
        header.push(tag);
        header.extend_from_slice(&(body.len() as u32).to_be_bytes());
        header.extend_from_slice(body);
    }

    #[test]
    fn every_recipient_kind_roundtrips() {
        let ec_pair = KeyPair::generate_ec();
        let rsa_pair = KeyPair::generate_rsa(2048).unwrap();
        let (PublicKey::Ec(ec_key), PublicKey::Rsa(rsa_key)) = (ec_pair.public_key(), rsa_pair.public_key())
        else {
            unreachable!()
        };

        let recipients = vec![
            password("alice"),
            Recipient::new(
                RecipientKind::Ec(EcCapsule {
                    curve: EllipticCurve::Secp256r1,
                    recipient_key: ec_key,
                    sender_key: ec::generate_secret_key().public_key(),
                }),
                "data:v=1&type=ID-card&serial_number=PNOEE-1&cn=MARI",
                [4u8; FMK_LEN],
            ),
            Recipient::new(
                RecipientKind::Rsa(RsaCapsule::new(rsa_key, &[5u8; 256]).unwrap()),
                "bob",
                [6u8; FMK_LEN],
            ),
            Recipient::new(
                RecipientKind::KeyServer(
                    KeyServerCapsule::new(ec_pair.public_key(), "ks-1", "KC0011").unwrap(),
                ),
                "carol",
                [7u8; FMK_LEN],
            ),
            symmetric("team", 8),
        ];

        let header = Header::new(recipients.clone());
        let bytes = header.to_bytes().unwrap();
        let parsed = Header::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.recipients(), recipients.as_slice());
        assert_eq!(parsed.payload_method(), PayloadEncryptionMethod::ChaCha20Poly1305);
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn unknown_tag_is_skipped() {
        let mut bytes = Header::new(vec![password("alice")]).to_bytes().unwrap();
        push_raw_record(&mut bytes, 42, b"from the future");

        let parsed = Header::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.into_recipients(), vec![password("alice")]);
    }

    #[test]
    fn unknown_tag_before_known_record_is_skipped() {
        let mut bytes = Header::new(vec![]).to_bytes().unwrap();
        push_raw_record(&mut bytes, 0, &[0xff; 3]);
        let known = Header::new(vec![symmetric("team", 1)]).to_bytes().unwrap();
        push_raw_record(&mut bytes, known[3], &known[8..]);

        let parsed = Header::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.recipients(), &[symmetric("team", 1)]);
    }

    #[test]
    fn unknown_fmk_method_is_skipped() {
        let mut bytes = Header::new(vec![symmetric("team", 1), symmetric("other", 2)])
            .to_bytes()
            .unwrap();
        // first record body starts after method, count, tag and body length
        bytes[1 + 2 + 1 + 4] = 9;

        let parsed = Header::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.recipients(), &[symmetric("other", 2)]);
    }

    #[test]
    fn record_tail_is_ignored() {
        let mut bytes = Header::new(vec![]).to_bytes().unwrap();
        let known = Header::new(vec![symmetric("team", 1)]).to_bytes().unwrap();
        let mut body = known[8..].to_vec();
        body.extend_from_slice(b"appended field");
        push_raw_record(&mut bytes, RecipientKind::TAG_SYMMETRIC, &body);

        let parsed = Header::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.recipients(), &[symmetric("team", 1)]);
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut bytes = Header::new(vec![password("alice")]).to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(Cdoc2Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn truncation_is_malformed() {
        let bytes = Header::new(vec![password("alice")]).to_bytes().unwrap();
        for len in [0, 2, 5, bytes.len() - 1] {
            assert!(
                matches!(Header::from_bytes(&bytes[..len]), Err(Cdoc2Error::MalformedHeader(_))),
                "length {len}"
            );
        }
    }

    #[test]
    fn bad_ec_point_is_malformed() {
        let mut body = vec![FmkEncryptionMethod::Xor as u8];
        put_bytes16(&mut body, &[0u8; FMK_LEN]).unwrap();
        put_bytes16(&mut body, b"bob").unwrap();
        body.push(EllipticCurve::Secp256r1 as u8);
        put_bytes16(&mut body, &[4u8; 65]).unwrap();
        put_bytes16(&mut body, &[4u8; 65]).unwrap();

        let mut bytes = Header::new(vec![]).to_bytes().unwrap();
        push_raw_record(&mut bytes, RecipientKind::TAG_EC, &body);

        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(Cdoc2Error::MalformedHeader(_))
        ));
    }

    fn record_prefix(label: &[u8]) -> Vec<u8> {
        let mut body = vec![FmkEncryptionMethod::Xor as u8];
        put_bytes16(&mut body, &[0u8; FMK_LEN]).unwrap();
        put_bytes16(&mut body, label).unwrap();
        body
    }

    #[test]
    fn malformed_fields_are_rejected() {
        let point = ec::encode_public_key(&crate::crypto::ec::generate_secret_key().public_key());

        let mut bad_utf8 = record_prefix(&[0xff, 0xfe, b'a']);
        put_bytes16(&mut bad_utf8, &[1u8; SALT_LEN]).unwrap();

        let mut short_salt = record_prefix(b"team");
        put_bytes16(&mut short_salt, &[1u8; SALT_LEN - 1]).unwrap();

        let mut short_fmk = vec![FmkEncryptionMethod::Xor as u8];
        put_bytes16(&mut short_fmk, &[0u8; FMK_LEN - 1]).unwrap();
        put_bytes16(&mut short_fmk, b"team").unwrap();
        put_bytes16(&mut short_fmk, &[1u8; SALT_LEN]).unwrap();

        let mut unknown_curve = record_prefix(b"bob");
        unknown_curve.push(9);
        put_bytes16(&mut unknown_curve, &point).unwrap();
        put_bytes16(&mut unknown_curve, &point).unwrap();

        let mut unknown_kdf = record_prefix(b"alice");
        put_bytes16(&mut unknown_kdf, &[1u8; SALT_LEN]).unwrap();
        put_bytes16(&mut unknown_kdf, &[2u8; SALT_LEN]).unwrap();
        unknown_kdf.push(9);
        unknown_kdf.extend_from_slice(&600_000u32.to_be_bytes());

        let cases = [
            ("label not UTF-8", RecipientKind::TAG_SYMMETRIC, bad_utf8),
            ("short salt", RecipientKind::TAG_SYMMETRIC, short_salt),
            ("short encrypted FMK", RecipientKind::TAG_SYMMETRIC, short_fmk),
            ("unknown curve", RecipientKind::TAG_EC, unknown_curve),
            ("unknown KDF algorithm", RecipientKind::TAG_PBKDF2, unknown_kdf),
        ];
        for (name, tag, body) in cases {
            let mut bytes = Header::new(vec![]).to_bytes().unwrap();
            push_raw_record(&mut bytes, tag, &body);
            assert!(
                matches!(Header::from_bytes(&bytes), Err(Cdoc2Error::MalformedHeader(_))),
                "{name}"
            );
        }
    }

    #[test]
    fn huge_record_count_without_records_is_truncated() {
        let mut bytes = Header::new(vec![]).to_bytes().unwrap();
        bytes[1..3].copy_from_slice(&u16::MAX.to_be_bytes());

        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(Cdoc2Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn out_of_range_iterations_are_malformed() {
        let mut bytes = Header::new(vec![password("alice")]).to_bytes().unwrap();
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&1u32.to_be_bytes());

        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(Cdoc2Error::MalformedHeader(_))
        ));
    }
}
