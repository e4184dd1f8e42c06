//! Vault transit HTTP client
//!
//! Thin wrapper over the handful of Vault endpoints the transit backend
//! needs. All calls authenticate with `X-Vault-Token`.

use std::collections::BTreeMap;

use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::TransitConfig;

/// Hash used for every sign/verify request. Ignored by Vault for Ed25519.
pub const HASH_ALGORITHM: &str = "sha2-256";
/// RSA padding, matching CKM_SHA256_RSA_PKCS on the PKCS#11 backend.
/// Ignored by Vault for non-RSA keys.
pub const RSA_SIGNATURE_ALGORITHM: &str = "pkcs1v15";

#[derive(Error, Debug)]
pub enum TransitError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Vault returned {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("Unexpected response: {0}")]
    Malformed(String),
}

impl TransitError {
    /// Whether Vault reported the named key as missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            TransitError::Status { status, message } => {
                if *status == StatusCode::NOT_FOUND {
                    return true;
                }
                let message = message.to_ascii_lowercase();
                status.is_client_error()
                    && (message.contains("not found")
                        || message.contains("no existing key")
                        || message.contains("could not be found"))
            }
            _ => false,
        }
    }
}

// ==================== Vault API Types ====================

#[derive(Debug, Deserialize)]
struct VaultResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CreateKeyRequest<'a> {
    #[serde(rename = "type")]
    key_type: &'a str,
    exportable: bool,
}

#[derive(Debug, Serialize)]
struct KeyConfigRequest {
    deletion_allowed: bool,
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    input: &'a str,
    hash_algorithm: &'a str,
    signature_algorithm: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signature: String,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    input: &'a str,
    signature: &'a str,
    hash_algorithm: &'a str,
    signature_algorithm: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    valid: bool,
}

/// Key metadata as returned by `GET /v1/{mount}/keys/{name}`.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyMetadata {
    #[serde(rename = "type")]
    pub key_type: String,
    pub latest_version: u64,
    /// Version number to per-version details. Asymmetric keys carry `public_key`.
    #[serde(default)]
    pub keys: BTreeMap<String, serde_json::Value>,
}

impl KeyMetadata {
    /// Public key of `latest_version`, as Vault reports it.
    pub fn latest_public_key(&self) -> Option<&str> {
        self.keys
            .get(&self.latest_version.to_string())?
            .get("public_key")?
            .as_str()
    }
}

// ==================== Transit Client ====================

/// HTTP client bound to one Vault address, token and transit mount.
pub struct TransitClient {
    client: Client,
    address: String,
    token: String,
    mount: String,
    namespace: Option<String>,
}

impl TransitClient {
    pub fn new(config: &TransitConfig) -> Self {
        Self {
            client: Client::new(),
            address: config.address.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            mount: config.mount.trim_matches('/').to_string(),
            namespace: config.namespace.clone(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// `{address}/v1/{segments...}`, each segment percent-encoded on its own.
    fn url(&self, segments: &[&str]) -> Result<Url, TransitError> {
        let mut url = Url::parse(&self.address).map_err(|e| {
            TransitError::Malformed(format!("Invalid Vault address '{}': {}", self.address, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                TransitError::Malformed(format!("Invalid Vault address '{}'", self.address))
            })?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    /// URL under the transit mount. The mount may be nested (`a/b`); `name`
    /// is always a single segment.
    fn mount_url(&self, endpoint: &str, name: &str) -> Result<Url, TransitError> {
        let mut segments: Vec<&str> = self
            .mount
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        segments.push(endpoint);
        segments.push(name);
        self.url(&segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header("X-Vault-Token", &self.token);
        if let Some(namespace) = &self.namespace {
            builder = builder.header("X-Vault-Namespace", namespace);
        }
        builder
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransitError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorResponse>().await {
            Ok(body) if !body.errors.is_empty() => body.errors.join("; "),
            _ => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        Err(TransitError::Status { status, message })
    }

    async fn send_empty(builder: RequestBuilder) -> Result<(), TransitError> {
        Self::check(builder.send().await?).await?;
        Ok(())
    }

    async fn send_data<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, TransitError> {
        let response = Self::check(builder.send().await?).await?;
        let body: VaultResponse<T> = response
            .json()
            .await
            .map_err(|e| TransitError::Malformed(format!("Failed to parse response: {}", e)))?;
        Ok(body.data)
    }

    /// `GET /v1/sys/health`, counting standby nodes as healthy.
    pub async fn health(&self) -> Result<(), TransitError> {
        let mut url = self.url(&["sys", "health"])?;
        url.query_pairs_mut().append_pair("standbyok", "true");
        Self::send_empty(self.request(Method::GET, url)).await
    }

    /// `GET /v1/auth/token/lookup-self`: proves the token is valid.
    pub async fn lookup_self(&self) -> Result<(), TransitError> {
        let url = self.url(&["auth", "token", "lookup-self"])?;
        Self::send_empty(self.request(Method::GET, url)).await
    }

    pub async fn create_key(&self, name: &str, key_type: &str) -> Result<(), TransitError> {
        let request = CreateKeyRequest {
            key_type,
            exportable: true,
        };
        let url = self.mount_url("keys", name)?;
        Self::send_empty(self.request(Method::POST, url).json(&request)).await
    }

    pub async fn read_key(&self, name: &str) -> Result<KeyMetadata, TransitError> {
        let url = self.mount_url("keys", name)?;
        Self::send_data(self.request(Method::GET, url)).await
    }

    /// Sign base64 `input`, returning Vault's `vault:vN:...` signature verbatim.
    pub async fn sign(&self, name: &str, input: &str) -> Result<String, TransitError> {
        let request = SignRequest {
            input,
            hash_algorithm: HASH_ALGORITHM,
            signature_algorithm: RSA_SIGNATURE_ALGORITHM,
        };
        let url = self.mount_url("sign", name)?;
        let response: SignResponse =
            Self::send_data(self.request(Method::POST, url).json(&request)).await?;
        Ok(response.signature)
    }

    pub async fn verify(
        &self,
        name: &str,
        input: &str,
        signature: &str,
    ) -> Result<bool, TransitError> {
        let request = VerifyRequest {
            input,
            signature,
            hash_algorithm: HASH_ALGORITHM,
            signature_algorithm: RSA_SIGNATURE_ALGORITHM,
        };
        let url = self.mount_url("verify", name)?;
        let response: VerifyResponse =
            Self::send_data(self.request(Method::POST, url).json(&request)).await?;
        Ok(response.valid)
    }

    /// Lift Vault's default deletion protection on a key.
    pub async fn allow_deletion(&self, name: &str) -> Result<(), TransitError> {
        let mut url = self.mount_url("keys", name)?;
        url.path_segments_mut()
            .map_err(|_| TransitError::Malformed(format!("Invalid key URL for '{}'", name)))?
            .push("config");
        let request = KeyConfigRequest {
            deletion_allowed: true,
        };
        Self::send_empty(self.request(Method::POST, url).json(&request)).await
    }

    pub async fn delete_key(&self, name: &str) -> Result<(), TransitError> {
        let url = self.mount_url("keys", name)?;
        Self::send_empty(self.request(Method::DELETE, url)).await
    }
}
