//! Key label codec.
//!
//! Every recipient record carries one label string. A label is either plain
//! user text or a *formatted* label that packs structured metadata:
//!
//! ```text
//! data:v=1&type=pw&label=alice
//! data:;base64,dj0xJnR5cGU9cHcmbGFiZWw9YWxpY2U=
//! ```
//!
//! Values are URL encoded; the order of fields is preserved.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use std::str::FromStr;

use crate::error::{Cdoc2Error, Result};
use crate::keymaterial::EncryptionKeyOrigin;

/// Prefix that marks a formatted label.
pub const DATA_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64,";
/// Version written into the `v` field.
pub const KEY_LABEL_VERSION: &str = "1";

/// Well-known field names.
pub mod field {
    pub const VERSION: &str = "v";
    pub const TYPE: &str = "type";
    pub const LABEL: &str = "label";
    pub const CN: &str = "cn";
    pub const SERIAL_NUMBER: &str = "serial_number";
    pub const FILE: &str = "file";
    pub const CERT_SHA1: &str = "cert_sha1";
    pub const SERVER_ID: &str = "server_id";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLabelType {
    IdCard,
    Certificate,
    PublicKey,
    Secret,
    Password,
}

impl KeyLabelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyLabelType::IdCard => "ID-card",
            KeyLabelType::Certificate => "cert",
            KeyLabelType::PublicKey => "pub_key",
            KeyLabelType::Secret => "secret",
            KeyLabelType::Password => "pw",
        }
    }

    pub fn origin(&self) -> EncryptionKeyOrigin {
        match self {
            KeyLabelType::IdCard => EncryptionKeyOrigin::IdCard,
            KeyLabelType::Certificate => EncryptionKeyOrigin::Certificate,
            KeyLabelType::PublicKey => EncryptionKeyOrigin::PublicKey,
            KeyLabelType::Secret => EncryptionKeyOrigin::Secret,
            KeyLabelType::Password => EncryptionKeyOrigin::Password,
        }
    }
}

impl FromStr for KeyLabelType {
    type Err = Cdoc2Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ID-card" => Ok(KeyLabelType::IdCard),
            "cert" => Ok(KeyLabelType::Certificate),
            "pub_key" => Ok(KeyLabelType::PublicKey),
            "secret" => Ok(KeyLabelType::Secret),
            "pw" => Ok(KeyLabelType::Password),
            other => Err(Cdoc2Error::InvalidKeyLabel(format!(
                "unknown key label type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for KeyLabelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured label metadata. `v` and `type` are implicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLabelParams {
    key_type: KeyLabelType,
    params: Vec<(String, String)>,
}

impl KeyLabelParams {
    pub fn new(key_type: KeyLabelType) -> Self {
        Self {
            key_type,
            params: Vec::new(),
        }
    }

    pub fn password(label: &str) -> Self {
        Self::new(KeyLabelType::Password).add_param(field::LABEL, label)
    }

    pub fn secret(label: &str) -> Self {
        Self::new(KeyLabelType::Secret).add_param(field::LABEL, label)
    }

    pub fn public_key(label: &str, file: Option<&str>) -> Self {
        let params = Self::new(KeyLabelType::PublicKey).add_param(field::LABEL, label);
        match file {
            Some(file) => params.add_param(field::FILE, file),
            None => params,
        }
    }

    pub fn certificate(cn: &str, serial_number: &str, file: Option<&str>, sha1: &str) -> Self {
        let params = Self::new(KeyLabelType::Certificate)
            .add_param(field::CN, cn)
            .add_param(field::SERIAL_NUMBER, serial_number);
        let params = match file {
            Some(file) => params.add_param(field::FILE, file),
            None => params,
        };
        params.add_param(field::CERT_SHA1, sha1)
    }

    /// Label for an Estonian eID authentication certificate.
    pub fn id_card(cn: &str, serial_number: &str) -> Self {
        Self::new(KeyLabelType::IdCard)
            .add_param(field::CN, cn)
            .add_param(field::SERIAL_NUMBER, serial_number)
    }

    /// Set `key` to `value`, replacing an earlier value in place.
    pub fn add_param(mut self, key: &str, value: &str) -> Self {
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.params.push((key.to_string(), value.to_string())),
        }
        self
    }

    pub fn key_type(&self) -> KeyLabelType {
        self.key_type
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn encode_body(&self) -> String {
        let mut body = format!(
            "{}={}&{}={}",
            field::VERSION,
            KEY_LABEL_VERSION,
            field::TYPE,
            self.key_type
        );
        for (key, value) in &self.params {
            body.push('&');
            body.push_str(&urlencoding::encode(key));
            body.push('=');
            body.push_str(&urlencoding::encode(value));
        }
        body
    }

    /// `data:v=1&type=...` form.
    pub fn format(&self) -> String {
        format!("{DATA_PREFIX}{}", self.encode_body())
    }

    /// `data:;base64,...` form.
    pub fn format_base64(&self) -> String {
        format!(
            "{DATA_PREFIX}{BASE64_MARKER}{}",
            STANDARD.encode(self.encode_body())
        )
    }

    pub fn parse(label: &str) -> Result<Self> {
        let body = label
            .strip_prefix(DATA_PREFIX)
            .ok_or_else(|| Cdoc2Error::InvalidKeyLabel("missing data: prefix".into()))?;

        let body = match body.strip_prefix(BASE64_MARKER) {
            Some(encoded) => {
                let decoded = STANDARD
                    .decode(encoded)
                    .map_err(|e| Cdoc2Error::InvalidKeyLabel(format!("base64: {e}")))?;
                String::from_utf8(decoded)
                    .map_err(|_| Cdoc2Error::InvalidKeyLabel("label is not UTF-8".into()))?
            }
            None => body.to_string(),
        };

        let mut version = None;
        let mut key_type = None;
        let mut params: Vec<(String, String)> = Vec::new();

        for pair in body.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Cdoc2Error::InvalidKeyLabel(format!("field without value: {pair}")))?;
            let key = decode(key)?;
            let value = decode(value)?;

            match key.as_str() {
                field::VERSION => version = Some(value),
                field::TYPE => key_type = Some(value.parse::<KeyLabelType>()?),
                _ => params.push((key, value)),
            }
        }

        match version.as_deref() {
            Some(KEY_LABEL_VERSION) => {}
            Some(other) => {
                return Err(Cdoc2Error::InvalidKeyLabel(format!(
                    "unsupported key label version {other}"
                )));
            }
            None => return Err(Cdoc2Error::InvalidKeyLabel("missing version".into())),
        }

        let key_type =
            key_type.ok_or_else(|| Cdoc2Error::InvalidKeyLabel("missing type".into()))?;

        let mut parsed = Self::new(key_type);
        for (key, value) in params {
            parsed = parsed.add_param(&key, &value);
        }
        Ok(parsed)
    }
}

fn decode(s: &str) -> Result<String> {
    urlencoding::decode(s)
        .map(|v| v.into_owned())
        .map_err(|_| Cdoc2Error::InvalidKeyLabel("value is not UTF-8".into()))
}

/// `true` when `label` uses the structured `data:` form.
pub fn is_formatted(label: &str) -> bool {
    label.starts_with(DATA_PREFIX)
}

/// Human label carried by `label`.
///
/// For a formatted label this is its `label` (or `cn`) field. Anything
/// else, including formatted labels that fail to parse, is returned as is.
pub fn extract_key_label(label: &str) -> String {
    if !is_formatted(label) {
        return label.to_string();
    }

    match KeyLabelParams::parse(label) {
        Ok(params) => params
            .get(field::LABEL)
            .or_else(|| params.get(field::CN))
            .unwrap_or(label)
            .to_string(),
        Err(e) => {
            tracing::debug!(error = %e, "treating unparseable formatted label as plain");
            label.to_string()
        }
    }
}
