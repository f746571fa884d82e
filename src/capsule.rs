//! Key capsule server interface.
//!
//! A capsule holds the half of a recipient's key exchange that is escrowed
//! on a key server instead of being written into the header. The network
//! client lives outside this crate; [`MemoryKeyCapsuleClient`] keeps capsules
//! in process.

use rsa::RsaPublicKey;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::crypto::secure_random;

#[derive(Debug, Error)]
pub enum CapsuleError {
    #[error("capsule not found: {0}")]
    NotFound(String),

    #[error("key server unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("capsule belongs to key server {expected}, client is connected to {actual}")]
    ServerMismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capsule {
    Ec {
        recipient_key: p256::PublicKey,
        sender_key: p256::PublicKey,
    },
    Rsa {
        recipient_key: RsaPublicKey,
        encrypted_kek: Vec<u8>,
    },
}

/// Client for one key capsule server.
///
/// Implementations own retries and timeouts; callers never retry.
pub trait KeyCapsuleClient: Send + Sync {
    /// Identifier written to key server recipient records.
    fn server_id(&self) -> &str;

    /// Store a capsule and return its transaction id.
    fn store_capsule(&self, capsule: Capsule) -> Result<String, CapsuleError>;

    fn fetch_capsule(&self, transaction_id: &str) -> Result<Capsule, CapsuleError>;
}

const TRANSACTION_PREFIX: &str = "KC";
const TRANSACTION_RANDOM_LEN: usize = 16;

pub struct MemoryKeyCapsuleClient {
    server_id: String,
    capsules: Mutex<HashMap<String, Capsule>>,
}

impl MemoryKeyCapsuleClient {
    pub fn new(server_id: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            capsules: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.capsules.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyCapsuleClient for MemoryKeyCapsuleClient {
    fn server_id(&self) -> &str {
        &self.server_id
    }

    fn store_capsule(&self, capsule: Capsule) -> Result<String, CapsuleError> {
        let mut random = [0u8; TRANSACTION_RANDOM_LEN];
        secure_random(&mut random).map_err(|e| CapsuleError::ServiceUnavailable(e.to_string()))?;

        let transaction_id = format!("{TRANSACTION_PREFIX}{}", hex::encode(random));

        self.capsules
            .lock()
            .map_err(|_| CapsuleError::ServiceUnavailable("capsule store poisoned".into()))?
            .insert(transaction_id.clone(), capsule);

        debug!(server = %self.server_id, transaction = %transaction_id, "capsule stored");
        Ok(transaction_id)
    }

    fn fetch_capsule(&self, transaction_id: &str) -> Result<Capsule, CapsuleError> {
        self.capsules
            .lock()
            .map_err(|_| CapsuleError::ServiceUnavailable("capsule store poisoned".into()))?
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| CapsuleError::NotFound(transaction_id.to_string()))
    }
}
