//! Vault transit key backend
//!
//! Keys are named transit keys. Signatures are Vault's `vault:vN:<base64>`
//! strings, returned and accepted verbatim.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info, warn};

use super::client::{KeyMetadata, TransitClient, TransitError};
use crate::backend::KeyBackend;
use crate::config::TransitConfig;
use crate::error::KeyError;
use crate::selector::BackendKind;
use crate::types::{AdapterState, Algorithm, GeneratedKeyPair, new_key_id};

pub const SUPPORTED_ALGORITHMS: &[Algorithm] =
    &[Algorithm::Rsa, Algorithm::Ecdsa, Algorithm::Ed25519];

/// Transit key type for an algorithm.
pub fn transit_key_type(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::Rsa => "rsa-2048",
        Algorithm::Ecdsa => "ecdsa-p256",
        Algorithm::Ed25519 => "ed25519",
    }
}

/// Decode Vault's public key text into raw bytes.
///
/// RSA and ECDSA keys come back as PEM (`SubjectPublicKeyInfo` DER inside);
/// Ed25519 keys as bare base64.
pub fn decode_public_key(public_key: &str) -> Result<Vec<u8>, KeyError> {
    let body: String = if public_key.trim_start().starts_with("-----BEGIN") {
        public_key
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("-----"))
            .collect()
    } else {
        public_key.trim().to_string()
    };

    BASE64
        .decode(body)
        .map_err(|e| KeyError::MalformedInput(format!("Invalid public key encoding: {}", e)))
}

/// Key backend over a Vault transit secrets engine.
pub struct TransitBackend {
    client: TransitClient,
    state: AdapterState,
}

impl std::fmt::Debug for TransitBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitBackend")
            .field("address", &self.client.address())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl TransitBackend {
    pub fn new(config: TransitConfig) -> Self {
        Self::with_client(TransitClient::new(&config))
    }

    pub fn with_client(client: TransitClient) -> Self {
        Self {
            client,
            state: AdapterState::Uninitialized,
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    async fn ensure_initialized(&mut self) -> Result<(), KeyError> {
        if self.state == AdapterState::Initialized {
            return Ok(());
        }

        self.client
            .health()
            .await
            .map_err(|e| KeyError::Connection(format!("Vault health check failed: {}", e)))?;
        self.client
            .lookup_self()
            .await
            .map_err(|e| KeyError::Connection(format!("Vault authentication failed: {}", e)))?;

        self.state = AdapterState::Initialized;
        info!(address = %self.client.address(), "Vault transit backend ready");
        Ok(())
    }

    fn public_key_hex(metadata: &KeyMetadata, label: &str) -> Result<String, KeyError> {
        let public_key = metadata.latest_public_key().ok_or_else(|| {
            KeyError::MalformedInput(format!(
                "Key '{}' exposes no public key for version {}",
                label, metadata.latest_version
            ))
        })?;
        debug!(label, version = metadata.latest_version, "Resolved latest key version");
        Ok(hex::encode(decode_public_key(public_key)?))
    }
}

/// Map a client error, keeping not-found distinct from the operation's own kind.
fn lookup_error(
    label: &str,
    e: TransitError,
    otherwise: impl FnOnce(String) -> KeyError,
) -> KeyError {
    if e.is_not_found() {
        KeyError::NotFound(format!("Transit key '{}'", label))
    } else {
        otherwise(e.to_string())
    }
}

#[async_trait]
impl KeyBackend for TransitBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Transit
    }

    fn supported_algorithms(&self) -> &'static [Algorithm] {
        SUPPORTED_ALGORITHMS
    }

    async fn initialize(&mut self) -> Result<(), KeyError> {
        self.ensure_initialized().await
    }

    fn is_initialized(&self) -> bool {
        self.state == AdapterState::Initialized
    }

    async fn generate_key_pair(
        &mut self,
        label: &str,
        algorithm: Option<Algorithm>,
    ) -> Result<GeneratedKeyPair, KeyError> {
        self.ensure_initialized().await?;
        let algorithm = self.resolve_algorithm(algorithm)?;
        let key_type = transit_key_type(algorithm);

        self.client
            .create_key(label, key_type)
            .await
            .map_err(|e| KeyError::Generation(e.to_string()))?;

        let metadata = self
            .client
            .read_key(label)
            .await
            .map_err(|e| KeyError::Generation(format!("Failed to read key: {}", e)))?;
        if metadata.key_type != key_type {
            return Err(KeyError::Generation(format!(
                "Key '{}' already exists with type {}, requested {}",
                label, metadata.key_type, key_type
            )));
        }

        let public_key_hex = Self::public_key_hex(&metadata, label)
            .map_err(|e| KeyError::Generation(e.to_string()))?;

        info!(label, %algorithm, "Generated transit key");

        Ok(GeneratedKeyPair {
            public_key_hex,
            key_id: new_key_id(),
        })
    }

    async fn public_key(&mut self, label: &str) -> Result<String, KeyError> {
        self.ensure_initialized().await?;

        let metadata = self
            .client
            .read_key(label)
            .await
            .map_err(|e| lookup_error(label, e, KeyError::Connection))?;
        Self::public_key_hex(&metadata, label)
    }

    async fn sign(
        &mut self,
        label: &str,
        payload: &[u8],
        algorithm: Option<Algorithm>,
    ) -> Result<String, KeyError> {
        self.ensure_initialized().await?;
        self.resolve_algorithm(algorithm)?;

        let input = BASE64.encode(payload);
        let signature = self
            .client
            .sign(label, &input)
            .await
            .map_err(|e| lookup_error(label, e, KeyError::Signing))?;

        debug!(label, "Signed payload");
        Ok(signature)
    }

    async fn verify(
        &mut self,
        label: &str,
        payload: &[u8],
        signature: &str,
        algorithm: Option<Algorithm>,
    ) -> Result<bool, KeyError> {
        self.ensure_initialized().await?;
        if self.resolve_algorithm(algorithm).is_err() {
            return Ok(false);
        }

        let input = BASE64.encode(payload);
        match self.client.verify(label, &input, signature).await {
            Ok(valid) => Ok(valid),
            Err(e) if e.is_not_found() => {
                Err(KeyError::NotFound(format!("Transit key '{}'", label)))
            }
            // Indistinguishable from an invalid signature for the caller
            Err(e) => {
                warn!(label, "Transit verify failed, reporting invalid: {}", e);
                Ok(false)
            }
        }
    }

    async fn delete_key_pair(&mut self, label: &str) -> Result<(), KeyError> {
        self.ensure_initialized().await?;

        self.client
            .allow_deletion(label)
            .await
            .map_err(|e| lookup_error(label, e, KeyError::Deletion))?;
        self.client
            .delete_key(label)
            .await
            .map_err(|e| lookup_error(label, e, KeyError::Deletion))?;

        info!(label, "Deleted transit key");
        Ok(())
    }

    async fn close(&mut self) {
        if self.state == AdapterState::Initialized {
            self.state = AdapterState::Closed;
            info!("Vault transit backend closed");
        }
    }
}
