use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

mod auth;

use cdoc2::{
    Cdoc2Error, DecryptionKeyMaterial, EncryptionKeyMaterial, EncryptionKeyOrigin, EnvelopeOptions,
    KeyLabelParams, KeyPair, Pbkdf2Params, PublicKey, Recipient, RecipientKind, SecretKey, Storage, label,
};

#[derive(Debug, Parser)]
#[command(name = "cdoc2")]
#[command(version, about = "Encrypt and decrypt CDOC2 containers for multiple recipients.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Encrypts a file for one or more recipients
    #[command(arg_required_else_help = true)]
    Encrypt {
        /// Container to create
        #[arg(long, short, value_name = "OUT")]
        file: PathBuf,

        /// Recipient public key (PEM, SPKI or PKCS#1)
        #[arg(long = "pubkey", value_name = "PEM")]
        pubkeys: Vec<PathBuf>,

        /// Password recipient, password prompted if omitted
        #[arg(long = "password", value_name = "LABEL[:PASSWORD]")]
        passwords: Vec<String>,

        /// Pre-shared secret recipient
        #[arg(long = "secret", value_name = "LABEL:base64,B64|LABEL:hex,HEX")]
        secrets: Vec<String>,

        /// PBKDF2 iterations for password recipients
        #[arg(long, env = "CDOC2_PBKDF2_ITERATIONS", default_value_t = Pbkdf2Params::DEFAULT_ITERATIONS)]
        pbkdf2_iterations: u32,

        /// Replace OUT if it exists
        #[arg(long, default_value_t = false)]
        force: bool,

        /// File to encrypt
        input: PathBuf,
    },

    /// Decrypts a container with one key
    #[command(arg_required_else_help = true)]
    Decrypt {
        /// Container to read
        #[arg(long, short, value_name = "IN")]
        file: PathBuf,

        /// Private key (PEM, PKCS#8, SEC1 or PKCS#1)
        #[arg(long, value_name = "PEM", conflicts_with_all = ["password", "secret"])]
        key: Option<PathBuf>,

        /// Password, optionally with the recipient label
        #[arg(long, value_name = "[LABEL[:PASSWORD]]", num_args = 0..=1, default_missing_value = "", conflicts_with = "secret")]
        password: Option<String>,

        /// Pre-shared secret
        #[arg(long, value_name = "LABEL:base64,B64|LABEL:hex,HEX")]
        secret: Option<String>,

        /// Where to write the plaintext
        #[arg(long, short, value_name = "OUT")]
        output: PathBuf,

        /// Replace OUT if it exists
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Lists the recipients of a container
    #[command(arg_required_else_help = true)]
    Info {
        #[arg(long, short, value_name = "IN")]
        file: PathBuf,

        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct RecipientInfo {
    index: usize,
    kind: &'static str,
    label: String,
    key_label: String,
    /// Only known for formatted labels.
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<EncryptionKeyOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_id: Option<String>,
}

impl RecipientInfo {
    fn new(index: usize, recipient: &Recipient) -> Self {
        let (key_server, transaction_id) = match recipient.kind() {
            RecipientKind::KeyServer(capsule) => (
                Some(capsule.key_server_id().to_string()),
                Some(capsule.transaction_id().to_string()),
            ),
            _ => (None, None),
        };
        Self {
            index,
            kind: recipient.kind().name(),
            label: label::extract_key_label(recipient.key_label()),
            key_label: recipient.key_label().to_string(),
            origin: KeyLabelParams::parse(recipient.key_label())
                .ok()
                .map(|params| params.key_type().origin()),
            key_server,
            transaction_id,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    match args.command {
        Commands::Encrypt {
            file,
            pubkeys,
            passwords,
            secrets,
            pbkdf2_iterations,
            force,
            input,
        } => {
            let mut materials = Vec::new();
            for path in &pubkeys {
                materials.push(public_key_material(path)?);
            }
            for arg in &passwords {
                let (label, password) = match arg.split_once(':') {
                    Some((label, pw)) => (label, Zeroizing::new(pw.to_string())),
                    None => (arg.as_str(), auth::read_new_password(arg)?),
                };
                materials.push(EncryptionKeyMaterial::from_password(password, label)?);
            }
            for arg in &secrets {
                let (label, secret) = parse_secret(arg)?;
                materials.push(EncryptionKeyMaterial::from_secret_key(secret, &label));
            }
            if materials.is_empty() {
                return Err("at least one --pubkey, --password or --secret is required".into());
            }

            let options = EnvelopeOptions::with_pbkdf2(Pbkdf2Params::new(pbkdf2_iterations)?);
            let plaintext = Zeroizing::new(Storage::new(&input).load()?);
            let container = cdoc2::encrypt(&plaintext, &materials, &options, None)?;

            Storage::new(&file).create(&container, force)?;
            println!("encrypted {} for {} recipient(s)", file.display(), materials.len());
        }

        Commands::Decrypt {
            file,
            key,
            password,
            secret,
            output,
            force,
        } => {
            let container = Storage::new(&file).load()?;

            let plaintext = if let Some(path) = key {
                let pem = Zeroizing::new(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                );
                let pair = KeyPair::from_pem(&pem)?;
                cdoc2::decrypt(&container, &DecryptionKeyMaterial::from_key_pair(pair), None)?
            } else if let Some(arg) = secret {
                let (label, secret) = parse_secret(&arg)?;
                cdoc2::decrypt(&container, &DecryptionKeyMaterial::from_secret_key(&label, secret), None)?
            } else if let Some(arg) = password {
                decrypt_with_password(&container, &arg)?
            } else {
                return Err("one of --key, --password or --secret is required".into());
            };

            Storage::new(&output).create(&plaintext, force)?;
            println!("decrypted {} to {}", file.display(), output.display());
        }

        Commands::Info { file, json } => {
            let container = Storage::new(&file).load()?;
            let recipients: Vec<RecipientInfo> = cdoc2::read_recipients(&container)?
                .iter()
                .enumerate()
                .map(|(i, r)| RecipientInfo::new(i, r))
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&recipients)?);
            } else {
                for r in &recipients {
                    println!("{}: {} '{}'", r.index, r.kind, r.label);
                }
            }
        }
    }

    Ok(())
}

fn public_key_material(path: &Path) -> Result<EncryptionKeyMaterial> {
    let pem = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let key = PublicKey::from_pem(&pem)?;

    let file_name = path.file_name().map(|f| f.to_string_lossy().into_owned());
    let label = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| key.algorithm().to_string());

    Ok(EncryptionKeyMaterial::from_public_key(
        key,
        &KeyLabelParams::public_key(&label, file_name.as_deref()),
    ))
}

/// `LABEL:base64,<b64>` or `LABEL:hex,<hex>`.
fn parse_secret(arg: &str) -> Result<(String, SecretKey)> {
    let (label, bytes) = if let Some((label, b64)) = arg.rsplit_once(":base64,") {
        (label, STANDARD.decode(b64).context("secret is not valid base64")?)
    } else if let Some((label, hex)) = arg.rsplit_once(":hex,") {
        (label, hex::decode(hex).context("secret is not valid hex")?)
    } else {
        bail!("secret must be LABEL:base64,<value> or LABEL:hex,<value>");
    };

    if label.is_empty() {
        bail!("secret label cannot be empty");
    }
    Ok((label.to_string(), SecretKey::new(bytes)?))
}

/// Without a label every password recipient in the container is tried.
fn decrypt_with_password(container: &[u8], arg: &str) -> Result<Zeroizing<Vec<u8>>> {
    let (labels, password) = match arg.split_once(':') {
        Some((label, pw)) => (vec![label.to_string()], Some(Zeroizing::new(pw.to_string()))),
        None if !arg.is_empty() => (vec![arg.to_string()], None),
        None => {
            let mut labels: Vec<String> = cdoc2::read_recipients(container)?
                .iter()
                .filter(|r| matches!(r.kind(), RecipientKind::Pbkdf2(_)))
                .map(|r| label::extract_key_label(r.key_label()))
                .collect();
            labels.sort_unstable();
            labels.dedup();
            if labels.is_empty() {
                bail!("container has no password recipients");
            }
            (labels, None)
        }
    };

    let password = match password {
        Some(pw) => pw,
        None => auth::read_password(&labels.join(", "))?,
    };

    for label in &labels {
        let material = DecryptionKeyMaterial::from_password(password.clone(), label);
        match cdoc2::decrypt(container, &material, None) {
            Err(Cdoc2Error::NoMatchingRecipient) => continue,
            other => return Ok(other?),
        }
    }

    Err(Cdoc2Error::NoMatchingRecipient.into())
}
